//! Deployment generation
//!
//! One Deployment per app, one container named after the app. Environment is
//! assembled in three layers: literal values from the config, platform
//! logging variables when enabled, then one `secretKeyRef` per key of the
//! app's env file.

use std::collections::{BTreeMap, BTreeSet};

use super::secret::read_env_file;
use super::{
    Container, ContainerPort, Deployment, DeploymentSpec, EnvVar, ExecAction, LabelSelector,
    Lifecycle, LifecycleHandler, LocalObjectReference, Manifest, ManifestDocument, ObjectMeta,
    PodMeta, PodSpec, PodTemplateSpec, ResourceQuantity, ResourceRequirements,
};
use crate::config::{self, AppConfig, ProjectConfig, ProjectLayout};
use crate::envfile;
use crate::Result;

/// Seconds the container keeps serving after it is marked for termination
pub const PRE_STOP_SLEEP_SECONDS: u32 = 30;

/// Build the app's Deployment document
pub fn generate(
    project: &ProjectConfig,
    app: &AppConfig,
    app_name: &str,
    image: &str,
    layout: &ProjectLayout,
) -> Result<ManifestDocument> {
    let secret_keys = match app.env_secret_name() {
        Some(name) => envfile::env_keys(&read_env_file(layout, name)?),
        None => vec![],
    };
    let deployment = deployment(project, app, app_name, image, &secret_keys);
    Ok(ManifestDocument::app(
        "deployment.yml",
        Manifest::Deployment(deployment),
    ))
}

/// Deployment for an app, with `secret_keys` referenced from its env Secret
pub fn deployment(
    project: &ProjectConfig,
    app: &AppConfig,
    app_name: &str,
    image: &str,
    secret_keys: &[String],
) -> Deployment {
    let mut selector = BTreeMap::new();
    selector.insert("app".to_string(), app_name.to_string());

    let mut pod_labels = selector.clone();
    pod_labels.insert("name".to_string(), app_name.to_string());

    let image_pull_secrets = app
        .pull_secret_name()
        .map(|name| {
            vec![LocalObjectReference {
                name: name.to_string(),
            }]
        })
        .unwrap_or_default();

    Deployment {
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        metadata: ObjectMeta::new(app_name, &project.namespace).with_label("app", app_name),
        spec: DeploymentSpec {
            replicas: app.replicas,
            selector: LabelSelector {
                match_labels: selector,
            },
            template: PodTemplateSpec {
                metadata: PodMeta { labels: pod_labels },
                spec: PodSpec {
                    containers: vec![container(project, app, app_name, image, secret_keys)],
                    image_pull_secrets,
                },
            },
        },
    }
}

fn container(
    project: &ProjectConfig,
    app: &AppConfig,
    app_name: &str,
    image: &str,
    secret_keys: &[String],
) -> Container {
    let ports = app
        .ports
        .iter()
        .map(|p| ContainerPort {
            name: Some(p.name.clone()),
            container_port: p.container_port(),
        })
        .collect();

    Container {
        name: app_name.to_string(),
        image: image.to_string(),
        image_pull_policy: Some("Always".to_string()),
        ports,
        resources: app.resources.as_ref().map(resources),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: ExecAction {
                    command: vec!["sleep".to_string(), PRE_STOP_SLEEP_SECONDS.to_string()],
                },
            }),
        }),
        env: env_vars(project, app, app_name, secret_keys),
    }
}

fn resources(spec: &config::ResourceSpec) -> ResourceRequirements {
    let quantity = |q: &config::ResourceQuantity| ResourceQuantity {
        cpu: q.cpu.clone(),
        memory: q.memory.clone(),
    };
    ResourceRequirements {
        requests: spec.requests.as_ref().map(quantity),
        limits: spec.limits.as_ref().map(quantity),
    }
}

/// Container environment; a name already set by an earlier layer wins
fn env_vars(
    project: &ProjectConfig,
    app: &AppConfig,
    app_name: &str,
    secret_keys: &[String],
) -> Vec<EnvVar> {
    let mut vars: Vec<EnvVar> = app
        .env
        .iter()
        .map(|(k, v)| EnvVar::literal(k, v))
        .collect();

    if let Some(logging) = project.logging.as_ref().filter(|_| app.logging) {
        vars.push(EnvVar::from_field("POD_NAME", "metadata.name"));
        vars.push(EnvVar::from_field("POD_NAMESPACE", "metadata.namespace"));
        vars.push(EnvVar::literal("LOG_ENDPOINT", &logging.endpoint));
        vars.push(EnvVar::literal("LOG_SERVICE", app_name));
        vars.push(EnvVar::literal(
            "LOG_ENVIRONMENT",
            format!("{}-{}", project.name, project.env),
        ));
    }

    if let Some(secret) = app.env_secret_name() {
        vars.extend(secret_keys.iter().map(|key| EnvVar::from_secret(key, secret)));
    }

    let mut seen = BTreeSet::new();
    vars.retain(|v| seen.insert(v.name.clone()));
    vars
}
