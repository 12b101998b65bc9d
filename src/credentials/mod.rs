//! Cluster-access credential resolution
//!
//! Makes sure `kube_conf.yml` exists before anything talks to the cluster.
//! An existing file is never touched; operators may have supplied it by
//! hand. For cloud-managed clusters a missing file is exported through the
//! cloud CLI.

use std::path::Path;

use tracing::info;

use crate::config::{ClusterMode, ProjectConfig};
use crate::exec::{run_checked, CommandRunner, CommandSpec};
use crate::{Error, Result};

/// Process environment carrying cloud credentials to the cloud CLI
///
/// Credentials are scoped to the child process instead of being written
/// into the shared CLI profile.
pub(crate) fn cloud_cli(config: &ProjectConfig) -> Result<CommandSpec> {
    let aws = config
        .aws
        .as_ref()
        .filter(|a| a.is_complete())
        .ok_or_else(|| Error::configuration("aws region, accessKey and secretKey are required"))?;
    Ok(CommandSpec::new("aws")
        .env("AWS_ACCESS_KEY_ID", &aws.access_key)
        .env("AWS_SECRET_ACCESS_KEY", &aws.secret_key)
        .env("AWS_DEFAULT_REGION", &aws.region))
}

/// Ensure the kubeconfig at `path` exists
pub async fn ensure_kubeconfig<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &ProjectConfig,
    path: &Path,
) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    match config.k8s_type {
        ClusterMode::SelfManaged => Err(Error::credential_resolution(format!(
            "kubeconfig {} not found; self-managed clusters must supply it",
            path.display()
        ))),
        ClusterMode::CloudManaged => {
            let cluster = config
                .cluster_name
                .as_deref()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| Error::credential_resolution("clusterName is not configured"))?;
            let aws = cloud_cli(config).map_err(|e| Error::credential_resolution(e.to_string()))?;
            let region = config.aws.as_ref().map(|a| a.region.as_str()).unwrap_or_default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            info!(cluster = %cluster, region = %region, "exporting kubeconfig from cloud provider");
            let kubeconfig = path.to_string_lossy().to_string();
            let spec = aws.args([
                "eks",
                "update-kubeconfig",
                "--kubeconfig",
                kubeconfig.as_str(),
                "--region",
                region,
                "--name",
                cluster,
            ]);
            run_checked(runner, &spec)
                .await
                .map_err(|e| Error::credential_resolution(e.to_string()))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CloudCredentials;
    use crate::exec::{CommandOutput, MockCommandRunner};

    fn cloud_config() -> ProjectConfig {
        ProjectConfig {
            namespace: "shop".into(),
            k8s_type: ClusterMode::CloudManaged,
            cluster_name: Some("shop-eks".into()),
            aws: Some(CloudCredentials {
                region: "eu-west-1".into(),
                access_key: "AKIA".into(),
                secret_key: "secret".into(),
                albs: vec![],
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn existing_kubeconfig_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kube_conf.yml");
        std::fs::write(&path, "operator supplied").unwrap();

        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        ensure_kubeconfig(&runner, &cloud_config(), &path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "operator supplied");
    }

    #[tokio::test]
    async fn cloud_cluster_exports_kubeconfig_with_scoped_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kube_conf.yml");
        let expected_path = path.to_string_lossy().to_string();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(move |spec| {
                spec.starts_with("aws", &["eks", "update-kubeconfig", "--kubeconfig"])
                    && spec.args.contains(&expected_path)
                    && spec.args.contains(&"shop-eks".to_string())
                    && spec.args.contains(&"eu-west-1".to_string())
                    && spec
                        .env
                        .contains(&("AWS_ACCESS_KEY_ID".to_string(), "AKIA".to_string()))
                    && !spec.display().contains("secret")
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("Added new context")));

        ensure_kubeconfig(&runner, &cloud_config(), &path).await.unwrap();
    }

    #[tokio::test]
    async fn failed_export_is_a_credential_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kube_conf.yml");

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::failed("AccessDenied")));

        let err = ensure_kubeconfig(&runner, &cloud_config(), &path)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialResolution(ref m) if m.contains("AccessDenied")));
    }

    #[tokio::test]
    async fn self_managed_cluster_without_kubeconfig_fails_without_running_tools() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig {
            namespace: "shop".into(),
            ..Default::default()
        };

        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let err = ensure_kubeconfig(&runner, &config, &dir.path().join("kube_conf.yml"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialResolution(_)));
    }
}
