//! Project and application configuration
//!
//! The configuration layer persists one `config.json` per project
//! environment. This module reads it into typed structs and validates the
//! invariants the rollout pipeline relies on. It never writes the file back.

mod layout;

pub use layout::ProjectLayout;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How the cluster kubeconfig is obtained
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ClusterMode {
    /// Operator supplies `kube_conf.yml`
    #[default]
    #[serde(rename = "standard")]
    SelfManaged,
    /// Exported from the cloud provider (EKS)
    #[serde(rename = "aws")]
    CloudManaged,
}

/// Container registry flavour
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum RegistryKind {
    /// Registry with static username/password
    #[default]
    #[serde(rename = "standard")]
    Static,
    /// Cloud registry (ECR) using exchanged short-lived tokens
    #[serde(rename = "aws")]
    Cloud,
}

impl std::fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static => write!(f, "standard"),
            Self::Cloud => write!(f, "aws"),
        }
    }
}

/// Cloud provider credentials and shared load balancers
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudCredentials {
    /// Region, e.g. `us-east-1`
    #[serde(default)]
    pub region: String,
    /// Access key id
    #[serde(default)]
    pub access_key: String,
    /// Secret access key
    #[serde(default)]
    pub secret_key: String,
    /// Load balancers shared by the project's ingresses
    #[serde(default)]
    pub albs: Vec<LoadBalancerDefinition>,
}

impl CloudCredentials {
    /// True when region and both keys are set
    pub fn is_complete(&self) -> bool {
        !self.region.is_empty() && !self.access_key.is_empty() && !self.secret_key.is_empty()
    }
}

/// A named load balancer class definition
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LoadBalancerDefinition {
    /// Ingress class name
    pub name: String,
    /// Certificate identifiers attached to the listeners
    #[serde(rename = "certificateARNs", default)]
    pub certificate_arns: Vec<String>,
    /// Subnet identifiers the balancer is placed in
    #[serde(default)]
    pub subnets: Vec<String>,
}

/// Container registry descriptor
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RegistryConfig {
    /// Registry flavour
    #[serde(rename = "type", default)]
    pub kind: RegistryKind,
    /// Registry URL, used as the image prefix
    #[serde(default)]
    pub url: String,
    /// Static username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Static password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Platform logging settings shared by all apps of a project
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Log collector endpoint handed to containers
    pub endpoint: String,
}

/// Project + environment configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Project name
    #[serde(default)]
    pub name: String,
    /// Environment name
    #[serde(default)]
    pub env: String,
    /// Target namespace
    #[serde(default)]
    pub namespace: String,
    /// Cluster access mode
    #[serde(default)]
    pub k8s_type: ClusterMode,
    /// Cluster identifier for cloud-managed clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    /// Cloud credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<CloudCredentials>,
    /// Registry descriptor
    #[serde(rename = "docker_repository", default)]
    pub registry: RegistryConfig,
    /// Platform logging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
    /// Applications by name
    #[serde(rename = "app", default)]
    pub apps: BTreeMap<String, AppConfig>,
}

impl ProjectConfig {
    /// Read and validate `config.json`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: ProjectConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up an application
    pub fn app(&self, name: &str) -> Result<&AppConfig> {
        self.apps
            .get(name)
            .ok_or_else(|| Error::configuration(format!("app '{}' not found", name)))
    }

    /// Whether any part of the project talks to the cloud provider
    pub fn is_cloud_managed(&self) -> bool {
        self.k8s_type == ClusterMode::CloudManaged || self.registry.kind == RegistryKind::Cloud
    }

    /// Load balancer definitions, empty when none are configured
    pub fn load_balancers(&self) -> &[LoadBalancerDefinition] {
        self.aws.as_ref().map(|a| a.albs.as_slice()).unwrap_or(&[])
    }

    /// Fully-qualified image reference for an app and tag
    pub fn image_ref(&self, app_name: &str, tag: &str) -> String {
        format!("{}/{}:{}", self.registry.url.trim_end_matches('/'), app_name, tag)
    }

    /// Check the invariants every rollout depends on
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::configuration("namespace must not be empty"));
        }

        if self.is_cloud_managed() {
            match &self.aws {
                Some(aws) if aws.is_complete() => {}
                _ => {
                    return Err(Error::configuration(
                        "cloud-managed cluster or registry requires aws region, accessKey and secretKey",
                    ))
                }
            }
        }

        if self.k8s_type == ClusterMode::CloudManaged
            && self.cluster_name.as_deref().map_or(true, str::is_empty)
        {
            return Err(Error::configuration(
                "cloud-managed cluster requires clusterName",
            ));
        }

        for (name, app) in &self.apps {
            app.validate(name, self)?;
        }
        Ok(())
    }
}

/// CPU and memory quantities
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResourceQuantity {
    /// CPU, e.g. `500m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory, e.g. `512Mi`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Resource requests and limits
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResourceSpec {
    /// Requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceQuantity>,
    /// Limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceQuantity>,
}

/// A named container port
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    /// Port name
    pub name: String,
    /// Service port
    pub port: u16,
    /// Container port, defaults to `port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
}

impl PortSpec {
    /// Port the container listens on
    pub fn container_port(&self) -> u16 {
        self.target_port.unwrap_or(self.port)
    }
}

/// Cloud load balancer exposure for the app's Service
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicLoadBalancer {
    /// Certificate for the https listener
    pub certificate_id: String,
    /// Reuse an existing load balancer instead of provisioning one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_id: Option<String>,
    /// Let the cluster overwrite listeners on a reused balancer
    #[serde(default)]
    pub force_override_listeners: bool,
}

/// Service exposure options
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceExposure {
    /// Expose through a public cloud load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_load_balancer: Option<PublicLoadBalancer>,
}

/// Certificate and key files, relative to the project directory
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct TlsFiles {
    /// PEM certificate path
    #[serde(default)]
    pub cert: String,
    /// PEM key path
    #[serde(default)]
    pub key: String,
}

impl TlsFiles {
    /// Both paths are set
    pub fn is_complete(&self) -> bool {
        !self.cert.is_empty() && !self.key.is_empty()
    }
}

/// Ingress definition; exactly one kind
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum IngressSpec {
    /// Ingress terminating TLS with a certificate stored as a Secret
    #[serde(rename = "default")]
    DirectTls {
        /// Host name
        host: String,
        /// Service port traffic is forwarded to
        service_port: u16,
        /// Certificate files
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tls: Option<TlsFiles>,
    },
    /// Ingress served by a shared load balancer class
    #[serde(rename = "aws_alb")]
    LoadBalancerClass {
        /// Host name
        host: String,
        /// Service port traffic is forwarded to
        service_port: u16,
        /// Ingress class to use
        #[serde(rename = "ingressClassName")]
        ingress_class_name: String,
    },
}

impl IngressSpec {
    /// Host name
    pub fn host(&self) -> &str {
        match self {
            Self::DirectTls { host, .. } | Self::LoadBalancerClass { host, .. } => host,
        }
    }

    /// Service port
    pub fn service_port(&self) -> u16 {
        match self {
            Self::DirectTls { service_port, .. } | Self::LoadBalancerClass { service_port, .. } => {
                *service_port
            }
        }
    }
}

fn default_replicas() -> u32 {
    1
}

/// One deployable application
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Replica count
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Resource requests/limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,
    /// Declared ports
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    /// Source repository URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    /// Source branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    /// Image pull secret name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,
    /// Name of the materialized env file (`envs/<name>.env`) and its Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_secret: Option<String>,
    /// Keys always present in the env Secret, empty when absent from the file
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_env: Vec<String>,
    /// Literal environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Inject platform logging variables
    #[serde(default)]
    pub logging: bool,
    /// Service exposure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceExposure>,
    /// Ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            resources: None,
            ports: vec![],
            git_url: None,
            git_branch: None,
            image_pull_secret: None,
            env_secret: None,
            required_env: vec![],
            env: BTreeMap::new(),
            logging: false,
            service: None,
            ingress: None,
        }
    }
}

impl AppConfig {
    /// Pull secret name, ignoring empty strings
    pub fn pull_secret_name(&self) -> Option<&str> {
        self.image_pull_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Env secret name, ignoring empty strings
    pub fn env_secret_name(&self) -> Option<&str> {
        self.env_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Public load balancer settings, if configured
    pub fn public_load_balancer(&self) -> Option<&PublicLoadBalancer> {
        self.service
            .as_ref()
            .and_then(|s| s.public_load_balancer.as_ref())
    }

    fn validate(&self, name: &str, project: &ProjectConfig) -> Result<()> {
        if self.replicas < 1 {
            return Err(Error::configuration(format!(
                "app '{}': replicas must be at least 1",
                name
            )));
        }
        if self.logging && project.logging.is_none() {
            return Err(Error::configuration(format!(
                "app '{}': logging is enabled but the project has no logging block",
                name
            )));
        }
        if let Some(IngressSpec::LoadBalancerClass {
            ingress_class_name, ..
        }) = &self.ingress
        {
            if ingress_class_name.is_empty() {
                return Err(Error::configuration(format!(
                    "app '{}': aws_alb ingress requires ingressClassName",
                    name
                )));
            }
            if !project
                .load_balancers()
                .iter()
                .any(|lb| &lb.name == ingress_class_name)
            {
                return Err(Error::configuration(format!(
                    "app '{}': ingressClassName '{}' is not one of the project's albs",
                    name, ingress_class_name
                )));
            }
        }
        Ok(())
    }
}
