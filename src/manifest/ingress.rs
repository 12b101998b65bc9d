//! Ingress generation
//!
//! Two flavours, picked by the app's ingress `type`:
//! - `default`: a plain Ingress, terminating TLS itself when certificate
//!   files are configured (a `<app>-tls` Secret is generated from them)
//! - `aws_alb`: an Ingress bound to a shared load balancer class; every
//!   load balancer of the project gets its IngressClass and
//!   IngressClassParams written to the shared directory

use super::secret::tls_secret;
use super::{
    HttpIngressPath, HttpIngressRuleValue, Ingress, IngressBackend, IngressClass,
    IngressClassParametersReference, IngressClassParams, IngressClassParamsSpec, IngressClassSpec,
    IngressRule, IngressServiceBackend, IngressSpec, IngressTls, Manifest, ManifestDocument,
    ObjectMeta, ServiceBackendPort, SubnetSelector,
};
use crate::config::{self, AppConfig, LoadBalancerDefinition, ProjectConfig, ProjectLayout};
use crate::{Error, Result};

/// Controller implementing the load balancer ingress classes
pub const ALB_CONTROLLER: &str = "eks.amazonaws.com/alb";
/// API group of IngressClassParams
pub const ALB_PARAMS_GROUP: &str = "eks.amazonaws.com";

/// Build the app's ingress documents; none when the app has no ingress
pub fn generate(
    project: &ProjectConfig,
    app: &AppConfig,
    app_name: &str,
    layout: &ProjectLayout,
) -> Result<Vec<ManifestDocument>> {
    let Some(spec) = &app.ingress else {
        return Ok(vec![]);
    };

    let mut docs = vec![];
    let mut resource = ingress(project, app_name, spec.host(), spec.service_port());

    match spec {
        config::IngressSpec::DirectTls { host, tls, .. } => {
            if let Some(files) = tls.as_ref().filter(|t| t.is_complete()) {
                let secret_name = format!("{}-tls", app_name);
                let cert = read_tls_file(layout, &files.cert)?;
                let key = read_tls_file(layout, &files.key)?;
                docs.push(ManifestDocument::app(
                    "tls.yml",
                    Manifest::Secret(tls_secret(&secret_name, &project.namespace, &cert, &key)),
                ));
                resource.spec.tls.push(IngressTls {
                    hosts: vec![host.clone()],
                    secret_name,
                });
            }
        }
        config::IngressSpec::LoadBalancerClass {
            ingress_class_name,
            ..
        } => {
            for lb in project.load_balancers() {
                docs.push(ManifestDocument::shared(
                    format!("{}-ingressClassParams.yml", lb.name),
                    Manifest::IngressClassParams(class_params(lb)),
                ));
                docs.push(ManifestDocument::shared(
                    format!("{}-ingressClass.yml", lb.name),
                    Manifest::IngressClass(class(lb)),
                ));
            }
            resource.spec.ingress_class_name = Some(ingress_class_name.clone());
        }
    }

    docs.insert(0, ManifestDocument::app("ingress.yml", Manifest::Ingress(resource)));
    Ok(docs)
}

fn read_tls_file(layout: &ProjectLayout, relative: &str) -> Result<Vec<u8>> {
    let path = layout.resolve(relative);
    std::fs::read(&path).map_err(|e| {
        Error::configuration(format!("tls file {} unreadable: {}", path.display(), e))
    })
}

/// Ingress routing `/` on `host` to the app's Service
pub fn ingress(project: &ProjectConfig, app_name: &str, host: &str, service_port: u16) -> Ingress {
    Ingress {
        api_version: "networking.k8s.io/v1".to_string(),
        kind: "Ingress".to_string(),
        metadata: ObjectMeta::new(app_name, &project.namespace),
        spec: IngressSpec {
            ingress_class_name: None,
            rules: vec![IngressRule {
                host: host.to_string(),
                http: HttpIngressRuleValue {
                    paths: vec![HttpIngressPath {
                        path: "/".to_string(),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: IngressServiceBackend {
                                name: app_name.to_string(),
                                port: ServiceBackendPort {
                                    number: service_port,
                                },
                            },
                        },
                    }],
                },
            }],
            tls: vec![],
        },
    }
}

/// IngressClassParams for a load balancer; cluster-scoped
pub fn class_params(lb: &LoadBalancerDefinition) -> IngressClassParams {
    IngressClassParams {
        api_version: format!("{}/v1", ALB_PARAMS_GROUP),
        kind: "IngressClassParams".to_string(),
        metadata: ObjectMeta::cluster_scoped(&lb.name),
        spec: IngressClassParamsSpec {
            scheme: "internet-facing".to_string(),
            certificate_arns: lb.certificate_arns.clone(),
            subnets: (!lb.subnets.is_empty()).then(|| SubnetSelector {
                ids: lb.subnets.clone(),
            }),
        },
    }
}

/// IngressClass pointing at its params; cluster-scoped
pub fn class(lb: &LoadBalancerDefinition) -> IngressClass {
    IngressClass {
        api_version: "networking.k8s.io/v1".to_string(),
        kind: "IngressClass".to_string(),
        metadata: ObjectMeta::cluster_scoped(&lb.name),
        spec: IngressClassSpec {
            controller: ALB_CONTROLLER.to_string(),
            parameters: IngressClassParametersReference {
                api_group: ALB_PARAMS_GROUP.to_string(),
                kind: "IngressClassParams".to_string(),
                name: lb.name.clone(),
            },
        },
    }
}
