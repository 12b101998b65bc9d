//! Error types for launchpad rollouts

use thiserror::Error;

use crate::rollout::RolloutStep;

/// Main error type for manifest synthesis and rollouts
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or inconsistent configuration, detected before any external tool runs
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external tool exited unsuccessfully
    #[error("command failed: {command}: {output}")]
    ExternalTool {
        /// The command line that failed (secrets never included)
        command: String,
        /// Captured stderr, or stdout when stderr was empty
        output: String,
    },

    /// Env file parsed to zero entries
    #[error("invalid or empty env input: {0}")]
    EmptyEnv(String),

    /// Cluster-access credential could not be produced
    #[error("credential resolution error: {0}")]
    CredentialResolution(String),

    /// Image-pull secret could not be produced
    #[error("image pull secret error: {0}")]
    ImagePullSecret(String),

    /// Another rollout of the same application holds the lock
    #[error("rollout already in progress for {0}")]
    RolloutInProgress(String),

    /// A rollout step failed; the rollout was aborted at that step
    #[error("rollout failed at step {step}: {source}")]
    Rollout {
        /// The step that failed
        step: RolloutStep,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an external tool error from a command line and its captured output
    pub fn external_tool(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ExternalTool {
            command: command.into(),
            output: output.into(),
        }
    }

    /// Create a credential resolution error with the given message
    pub fn credential_resolution(msg: impl Into<String>) -> Self {
        Self::CredentialResolution(msg.into())
    }

    /// Create an image pull secret error with the given message
    pub fn image_pull_secret(msg: impl Into<String>) -> Self {
        Self::ImagePullSecret(msg.into())
    }

    /// Wrap an error as the failure of a rollout step
    pub fn rollout(step: RolloutStep, source: Error) -> Self {
        Self::Rollout {
            step,
            source: Box::new(source),
        }
    }

    /// The rollout step this error was raised at, if any
    pub fn failed_step(&self) -> Option<RolloutStep> {
        match self {
            Self::Rollout { step, .. } => Some(*step),
            _ => None,
        }
    }
}
