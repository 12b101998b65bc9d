//! Launchpad - manifest synthesis and rollout orchestration for per-app Kubernetes deployments
//!
//! Launchpad turns a project environment's `config.json` plus an app's
//! source directory into a running workload: it builds and pushes the image,
//! generates Kubernetes manifests, and applies them with kubectl.
//!
//! # Layout
//!
//! Every project environment lives under `<projects root>/<project>/<env>/`
//! and holds its configuration, env files, kubeconfig and the generated
//! manifest tree (`ymls/` for shared resources, `ymls/<app>/` per app).
//!
//! # Modules
//!
//! - [`config`] - Project configuration and on-disk layout
//! - [`envfile`] - `KEY=VALUE` env file parser
//! - [`credentials`] - Cluster kubeconfig resolution
//! - [`registry`] - Registry login sessions and image-pull Secrets
//! - [`manifest`] - Kubernetes resource types and generators
//! - [`kubectl`] - Namespace and apply operations
//! - [`notify`] - Chat-robot progress notifications
//! - [`rollout`] - The rollout pipeline
//! - [`exec`] - External command execution
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod credentials;
pub mod envfile;
pub mod error;
pub mod exec;
pub mod kubectl;
pub mod manifest;
pub mod notify;
pub mod registry;
pub mod rollout;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default projects root, relative to the working directory
pub const DEFAULT_PROJECTS_DIR: &str = "./projects";
