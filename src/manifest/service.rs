//! Service generation

use std::collections::BTreeMap;

use super::{Manifest, ManifestDocument, ObjectMeta, Service, ServicePort, ServiceSpec};
use crate::config::{AppConfig, ProjectConfig, PublicLoadBalancer};

/// Annotation prefix understood by the cloud load balancer controller
pub const LB_ANNOTATION_PREFIX: &str = "service.beta.kubernetes.io/alibaba-cloud-loadbalancer";

/// Build the app's Service document
///
/// Apps with neither ports nor public exposure get no Service.
pub fn generate(
    project: &ProjectConfig,
    app: &AppConfig,
    app_name: &str,
) -> Option<ManifestDocument> {
    let service = match app.public_load_balancer() {
        Some(lb) => public_service(project, app, app_name, lb)?,
        None if app.ports.is_empty() => return None,
        None => cluster_service(project, app, app_name),
    };
    Some(ManifestDocument::app("service.yml", Manifest::Service(service)))
}

fn selector(app_name: &str) -> BTreeMap<String, String> {
    let mut selector = BTreeMap::new();
    selector.insert("app".to_string(), app_name.to_string());
    selector
}

/// ClusterIP Service with one port per declared port
pub fn cluster_service(project: &ProjectConfig, app: &AppConfig, app_name: &str) -> Service {
    let ports = app
        .ports
        .iter()
        .map(|p| ServicePort {
            name: Some(p.name.clone()),
            port: p.port,
            target_port: Some(p.container_port()),
            protocol: None,
        })
        .collect();

    Service {
        api_version: "v1".to_string(),
        kind: "Service".to_string(),
        metadata: ObjectMeta::new(app_name, &project.namespace),
        spec: ServiceSpec {
            selector: selector(app_name),
            ports,
            type_: Some("ClusterIP".to_string()),
        },
    }
}

/// LoadBalancer Service terminating http and https on the first declared port
///
/// Returns `None` when the app declares no port to forward to.
pub fn public_service(
    project: &ProjectConfig,
    app: &AppConfig,
    app_name: &str,
    lb: &PublicLoadBalancer,
) -> Option<Service> {
    let target = app.ports.first()?.container_port();

    let mut metadata = ObjectMeta::new(app_name, &project.namespace)
        .with_annotation(format!("{}-cert-id", LB_ANNOTATION_PREFIX), &lb.certificate_id)
        .with_annotation(
            format!("{}-protocol-port", LB_ANNOTATION_PREFIX),
            "http:80,https:443",
        )
        .with_annotation(
            format!("{}-force-override-listeners", LB_ANNOTATION_PREFIX),
            lb.force_override_listeners.to_string(),
        );
    if let Some(id) = lb.load_balancer_id.as_deref().filter(|id| !id.is_empty()) {
        metadata = metadata.with_annotation(format!("{}-id", LB_ANNOTATION_PREFIX), id);
    }

    let port = |name: &str, port: u16| ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(target),
        protocol: Some("TCP".to_string()),
    };

    Some(Service {
        api_version: "v1".to_string(),
        kind: "Service".to_string(),
        metadata,
        spec: ServiceSpec {
            selector: selector(app_name),
            ports: vec![port("http", 80), port("https", 443)],
            type_: Some("LoadBalancer".to_string()),
        },
    })
}
