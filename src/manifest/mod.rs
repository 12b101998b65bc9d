//! Kubernetes manifest synthesis
//!
//! This module defines the Kubernetes resource types launchpad emits and the
//! generators that build them from a project's configuration:
//! - [`workload`]: Deployment
//! - [`service`]: Service (ClusterIP or public load balancer)
//! - [`ingress`]: Ingress, TLS Secret, IngressClass + IngressClassParams
//! - [`secret`]: env Secret and image-pull Secret
//!
//! Generators return [`ManifestDocument`]s; [`ManifestSet::write`] lays them
//! out on disk, shared documents under `ymls/` and app documents under
//! `ymls/<app>/`.

pub mod ingress;
pub mod secret;
pub mod service;
pub mod workload;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AppConfig, ProjectConfig, ProjectLayout};
use crate::Result;

/// Label every generated resource carries
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY: &str = "launchpad";

// =============================================================================
// Kubernetes Resource Types
// =============================================================================

/// Standard Kubernetes ObjectMeta
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace, absent for cluster-scoped resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Namespaced metadata with the managed-by label
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::cluster_scoped(name)
        }
    }

    /// Metadata for a cluster-scoped resource
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
        Self {
            name: name.into(),
            namespace: None,
            labels,
            annotations: BTreeMap::new(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

// -----------------------------------------------------------------------------
// Deployment
// -----------------------------------------------------------------------------

/// Kubernetes Deployment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: DeploymentSpec,
}

/// Deployment spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Number of replicas
    pub replicas: u32,
    /// Label selector
    pub selector: LabelSelector,
    /// Pod template
    pub template: PodTemplateSpec,
}

/// Label selector
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Match labels
    pub match_labels: BTreeMap<String, String>,
}

/// Pod template spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    /// Pod metadata
    pub metadata: PodMeta,
    /// Pod spec
    pub spec: PodSpec,
}

/// Pod metadata (subset of ObjectMeta)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodMeta {
    /// Labels
    pub labels: BTreeMap<String, String>,
}

/// Pod spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Containers
    pub containers: Vec<Container>,
    /// Registry credentials for pulling images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

/// Reference to an object in the same namespace
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocalObjectReference {
    /// Object name
    pub name: String,
}

/// Container spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name
    pub name: String,
    /// Image
    pub image: String,
    /// Pull policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    /// Ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    /// Resource requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Lifecycle hooks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Container port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port number
    pub container_port: u16,
}

/// Resource requirements
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceQuantity>,
    /// Limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceQuantity>,
}

/// Resource quantity
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuantity {
    /// CPU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Container lifecycle hooks
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    /// Hook run before the container is stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_stop: Option<LifecycleHandler>,
}

/// Lifecycle hook handler
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleHandler {
    /// Exec action
    pub exec: ExecAction,
}

/// Exec action
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecAction {
    /// Command
    pub command: Vec<String>,
}

/// Environment variable
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Value source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    /// Literal variable
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// Variable read from a Secret key
    pub fn from_secret(name: impl Into<String>, secret: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.into(),
                    key: name.clone(),
                }),
                field_ref: None,
            }),
            name,
        }
    }

    /// Variable read from a pod field
    pub fn from_field(name: impl Into<String>, field_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: None,
                field_ref: Some(ObjectFieldSelector {
                    field_path: field_path.into(),
                }),
            }),
        }
    }
}

/// Source of an environment variable value
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    /// Secret key reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeySelector>,
    /// Pod field reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<ObjectFieldSelector>,
}

/// Selects a key of a Secret
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SecretKeySelector {
    /// Secret name
    pub name: String,
    /// Key
    pub key: String,
}

/// Selects a pod field
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFieldSelector {
    /// Field path, e.g. `metadata.name`
    pub field_path: String,
}

// -----------------------------------------------------------------------------
// Service
// -----------------------------------------------------------------------------

/// Kubernetes Service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: ServiceSpec,
}

/// Service spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Selector
    pub selector: BTreeMap<String, String>,
    /// Ports
    pub ports: Vec<ServicePort>,
    /// Service type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Service port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port number
    pub port: u16,
    /// Target port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

// -----------------------------------------------------------------------------
// Secret
// -----------------------------------------------------------------------------

/// Kubernetes Secret with base64 `data`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Secret type
    #[serde(rename = "type")]
    pub type_: String,
    /// Base64-encoded values
    pub data: BTreeMap<String, String>,
}

// -----------------------------------------------------------------------------
// Ingress
// -----------------------------------------------------------------------------

/// Kubernetes Ingress
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: IngressSpec,
}

/// Ingress spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// Ingress class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    /// Host rules
    pub rules: Vec<IngressRule>,
    /// TLS termination
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<IngressTls>,
}

/// Host rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressRule {
    /// Host
    pub host: String,
    /// HTTP paths
    pub http: HttpIngressRuleValue,
}

/// HTTP paths of a rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HttpIngressRuleValue {
    /// Paths
    pub paths: Vec<HttpIngressPath>,
}

/// One routed path
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpIngressPath {
    /// Path
    pub path: String,
    /// Path match type
    pub path_type: String,
    /// Backend
    pub backend: IngressBackend,
}

/// Ingress backend
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressBackend {
    /// Service backend
    pub service: IngressServiceBackend,
}

/// Service backend
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressServiceBackend {
    /// Service name
    pub name: String,
    /// Service port
    pub port: ServiceBackendPort,
}

/// Service backend port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceBackendPort {
    /// Port number
    pub number: u16,
}

/// TLS block
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressTls {
    /// Hosts covered by the certificate
    pub hosts: Vec<String>,
    /// Secret holding the certificate
    pub secret_name: String,
}

/// Kubernetes IngressClass
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressClass {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: IngressClassSpec,
}

/// IngressClass spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressClassSpec {
    /// Controller implementing the class
    pub controller: String,
    /// Controller parameters
    pub parameters: IngressClassParametersReference,
}

/// Reference to the class parameters resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressClassParametersReference {
    /// API group
    pub api_group: String,
    /// Kind
    pub kind: String,
    /// Name
    pub name: String,
}

/// Load balancer parameters for an IngressClass
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressClassParams {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: IngressClassParamsSpec,
}

/// IngressClassParams spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressClassParamsSpec {
    /// `internet-facing` or `internal`
    pub scheme: String,
    /// Listener certificates
    #[serde(rename = "certificateARNs", default, skip_serializing_if = "Vec::is_empty")]
    pub certificate_arns: Vec<String>,
    /// Subnet selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnets: Option<SubnetSelector>,
}

/// Subnets by id
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubnetSelector {
    /// Subnet ids
    pub ids: Vec<String>,
}

// =============================================================================
// Manifest Documents
// =============================================================================

/// Any resource launchpad writes
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Manifest {
    /// Deployment
    Deployment(Deployment),
    /// Service
    Service(Service),
    /// Secret
    Secret(Secret),
    /// Ingress
    Ingress(Ingress),
    /// IngressClass
    IngressClass(IngressClass),
    /// IngressClassParams
    IngressClassParams(IngressClassParams),
}

impl Manifest {
    /// Resource kind
    pub fn kind(&self) -> &str {
        match self {
            Self::Deployment(r) => &r.kind,
            Self::Service(r) => &r.kind,
            Self::Secret(r) => &r.kind,
            Self::Ingress(r) => &r.kind,
            Self::IngressClass(r) => &r.kind,
            Self::IngressClassParams(r) => &r.kind,
        }
    }

    /// Resource name
    pub fn name(&self) -> &str {
        match self {
            Self::Deployment(r) => &r.metadata.name,
            Self::Service(r) => &r.metadata.name,
            Self::Secret(r) => &r.metadata.name,
            Self::Ingress(r) => &r.metadata.name,
            Self::IngressClass(r) => &r.metadata.name,
            Self::IngressClassParams(r) => &r.metadata.name,
        }
    }
}

/// Where a document is written
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestScope {
    /// Project-wide, applied before any app manifests
    Shared,
    /// Owned by one app
    App,
}

/// A generated resource and its file name
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestDocument {
    /// Output directory
    pub scope: ManifestScope,
    /// File name within the directory
    pub file_name: String,
    /// The resource
    pub manifest: Manifest,
}

impl ManifestDocument {
    /// Document in the app directory
    pub fn app(file_name: impl Into<String>, manifest: Manifest) -> Self {
        Self {
            scope: ManifestScope::App,
            file_name: file_name.into(),
            manifest,
        }
    }

    /// Document in the shared directory
    pub fn shared(file_name: impl Into<String>, manifest: Manifest) -> Self {
        Self {
            scope: ManifestScope::Shared,
            file_name: file_name.into(),
            manifest,
        }
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.manifest)?)
    }

    /// Target path for this document
    pub fn path(&self, layout: &ProjectLayout, app_name: &str) -> PathBuf {
        match self.scope {
            ManifestScope::Shared => layout.shared_manifest_dir().join(&self.file_name),
            ManifestScope::App => layout.app_manifest_dir(app_name).join(&self.file_name),
        }
    }
}

/// All documents generated for one rollout of an app
#[derive(Clone, Debug, Default)]
pub struct ManifestSet {
    app_name: String,
    documents: Vec<ManifestDocument>,
}

impl ManifestSet {
    /// Empty set for an app
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            documents: vec![],
        }
    }

    /// Add a document
    pub fn push(&mut self, document: ManifestDocument) {
        self.documents.push(document);
    }

    /// Add documents
    pub fn extend(&mut self, documents: impl IntoIterator<Item = ManifestDocument>) {
        self.documents.extend(documents);
    }

    /// Documents in generation order
    pub fn documents(&self) -> &[ManifestDocument] {
        &self.documents
    }

    /// First document of a kind
    pub fn find(&self, kind: &str) -> Option<&Manifest> {
        self.documents
            .iter()
            .map(|d| &d.manifest)
            .find(|m| m.kind() == kind)
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// True when nothing was generated
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Write every document, replacing the previous rollout's app documents
    ///
    /// Stale `.yml` files in the app directory are removed first so resources
    /// dropped from the configuration are not re-applied. The shared directory
    /// is left alone since other apps write there too.
    pub fn write(&self, layout: &ProjectLayout) -> Result<Vec<PathBuf>> {
        let shared_dir = layout.shared_manifest_dir();
        let app_dir = layout.app_manifest_dir(&self.app_name);
        std::fs::create_dir_all(&shared_dir)?;
        std::fs::create_dir_all(&app_dir)?;

        for entry in std::fs::read_dir(&app_dir)? {
            let path = entry?.path();
            if is_manifest_file(&path) {
                std::fs::remove_file(&path)?;
            }
        }

        let mut written = Vec::with_capacity(self.documents.len());
        for document in &self.documents {
            let path = document.path(layout, &self.app_name);
            std::fs::write(&path, document.to_yaml()?)?;
            debug!(
                kind = %document.manifest.kind(),
                name = %document.manifest.name(),
                path = %path.display(),
                "wrote manifest"
            );
            written.push(path);
        }
        Ok(written)
    }
}

/// Whether a path is a manifest file launchpad writes
pub fn is_manifest_file(path: &std::path::Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map_or(false, |ext| ext == "yml" || ext == "yaml")
}

/// Generate every app-level manifest in a fixed order
///
/// Order: env Secret, Deployment, Service, Ingress (with its TLS Secret or
/// shared load balancer class documents). The image-pull Secret is produced
/// by the registry step, which needs a login first.
pub fn generate_app_manifests(
    project: &ProjectConfig,
    app: &AppConfig,
    app_name: &str,
    image: &str,
    layout: &ProjectLayout,
) -> Result<ManifestSet> {
    let mut set = ManifestSet::new(app_name);
    if let Some(doc) = secret::generate_env_secret(project, app, layout)? {
        set.push(doc);
    }
    set.push(workload::generate(project, app, app_name, image, layout)?);
    if let Some(doc) = service::generate(project, app, app_name) {
        set.push(doc);
    }
    set.extend(ingress::generate(project, app, app_name, layout)?);
    Ok(set)
}
