//! Cluster operations through kubectl
//!
//! Every call pins `--kubeconfig` to the project's resolved credential file,
//! so the operator's own kubectl context is never consulted.

use std::path::Path;

use tracing::{debug, info};

use crate::exec::{run_checked, CommandRunner, CommandSpec};
use crate::manifest::is_manifest_file;
use crate::{Error, Result};

/// True when tool output reports that the object already exists
///
/// Any mention of "exists" counts, which covers kubectl's `AlreadyExists`
/// wording as well as wrappers that phrase it differently.
pub fn is_already_exists(output: &str) -> bool {
    output.contains("exists")
}

/// Whether a directory holds any manifest file
pub fn has_manifests(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    for entry in std::fs::read_dir(dir)? {
        if is_manifest_file(&entry?.path()) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// kubectl bound to one kubeconfig
pub struct Kubectl<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    kubeconfig: String,
}

impl<'a, R: CommandRunner + ?Sized> Kubectl<'a, R> {
    /// Create a client for the given kubeconfig
    pub fn new(runner: &'a R, kubeconfig: &Path) -> Self {
        Self {
            runner,
            kubeconfig: kubeconfig.to_string_lossy().to_string(),
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("kubectl").args(["--kubeconfig", self.kubeconfig.as_str()])
    }

    /// Whether the namespace can be read
    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let spec = self.command().args(["get", "namespace", namespace]);
        Ok(self.runner.run(&spec).await?.success)
    }

    /// Create the namespace unless it exists
    pub async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespace_exists(namespace).await? {
            debug!(namespace = %namespace, "namespace exists");
            return Ok(());
        }

        let spec = self.command().args(["create", "namespace", namespace]);
        let output = self.runner.run(&spec).await?;
        if output.success {
            info!(namespace = %namespace, "created namespace");
            return Ok(());
        }

        let text = output.failure_text();
        if is_already_exists(&text) {
            debug!(namespace = %namespace, "namespace created concurrently");
            return Ok(());
        }
        Err(Error::external_tool(spec.display(), text))
    }

    /// Apply every manifest in a directory, returning kubectl's report
    ///
    /// Returns `None` without calling kubectl when the directory holds no
    /// manifest files.
    pub async fn apply_dir(&self, dir: &Path) -> Result<Option<String>> {
        if !has_manifests(dir)? {
            debug!(dir = %dir.display(), "no manifests to apply");
            return Ok(None);
        }
        let dir_arg = dir.to_string_lossy().to_string();
        let spec = self.command().args(["apply", "-f", dir_arg.as_str()]);
        let out = run_checked(self.runner, &spec).await?;
        for line in out.lines().filter(|l| !l.trim().is_empty()) {
            debug!(result = %line.trim(), "kubectl apply");
        }
        Ok(Some(out.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};

    const KUBECONFIG: &str = "/p/kube_conf.yml";

    #[test]
    fn story_already_exists_is_recognised() {
        assert!(is_already_exists(
            r#"Error from server (AlreadyExists): namespaces "shop" already exists"#
        ));
        assert!(is_already_exists(r#"Error: namespace "shop" exists"#));
        assert!(!is_already_exists("Unable to connect to the server"));
        assert!(!is_already_exists(""));
    }

    #[tokio::test]
    async fn story_existing_namespace_is_left_alone() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| {
                spec.starts_with(
                    "kubectl",
                    &["--kubeconfig", KUBECONFIG, "get", "namespace", "shop"],
                )
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("shop   Active")));

        let kubectl = Kubectl::new(&runner, Path::new(KUBECONFIG));
        kubectl.ensure_namespace("shop").await.unwrap();
    }

    #[tokio::test]
    async fn story_missing_namespace_is_created() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.args.contains(&"get".to_string()))
            .returning(|_| Ok(CommandOutput::failed("NotFound")));
        runner
            .expect_run()
            .withf(|spec| {
                spec.starts_with(
                    "kubectl",
                    &["--kubeconfig", KUBECONFIG, "create", "namespace", "shop"],
                )
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("namespace/shop created")));

        let kubectl = Kubectl::new(&runner, Path::new(KUBECONFIG));
        kubectl.ensure_namespace("shop").await.unwrap();
    }

    #[tokio::test]
    async fn story_namespace_created_concurrently_is_success() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.args.contains(&"get".to_string()))
            .returning(|_| Ok(CommandOutput::failed("NotFound")));
        runner
            .expect_run()
            .withf(|spec| spec.args.contains(&"create".to_string()))
            .returning(|_| {
                Ok(CommandOutput::failed(
                    "Error from server (AlreadyExists): namespaces \"shop\" already exists",
                ))
            });

        let kubectl = Kubectl::new(&runner, Path::new(KUBECONFIG));
        kubectl.ensure_namespace("shop").await.unwrap();
    }

    #[tokio::test]
    async fn story_any_exists_wording_on_create_is_success() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.args.contains(&"get".to_string()))
            .returning(|_| Ok(CommandOutput::failed("connection refused")));
        runner
            .expect_run()
            .withf(|spec| spec.args.contains(&"create".to_string()))
            .times(1)
            .returning(|_| Ok(CommandOutput::failed("Error: namespace \"shop\" exists")));

        let kubectl = Kubectl::new(&runner, Path::new("/k"));
        kubectl.ensure_namespace("shop").await.unwrap();
    }

    #[tokio::test]
    async fn story_other_create_failures_are_fatal() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::failed("Unable to connect to the server")));

        let kubectl = Kubectl::new(&runner, Path::new(KUBECONFIG));
        let err = kubectl.ensure_namespace("shop").await.unwrap_err();
        assert!(matches!(
            err,
            Error::ExternalTool { ref output, .. } if output.contains("Unable to connect")
        ));
    }

    #[tokio::test]
    async fn story_empty_directory_is_not_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.txt"), "not a manifest").unwrap();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let kubectl = Kubectl::new(&runner, Path::new(KUBECONFIG));
        assert!(kubectl.apply_dir(dir.path()).await.unwrap().is_none());
        assert!(kubectl
            .apply_dir(&dir.path().join("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn story_directory_with_manifests_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deployment.yml"), "kind: Deployment").unwrap();
        let expected = dir.path().to_string_lossy().to_string();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(move |spec| {
                spec.starts_with("kubectl", &["--kubeconfig", KUBECONFIG, "apply", "-f"])
                    && spec.args.last() == Some(&expected)
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("deployment.apps/api configured\n")));

        let kubectl = Kubectl::new(&runner, Path::new(KUBECONFIG));
        let report = kubectl.apply_dir(dir.path()).await.unwrap();
        assert_eq!(report.as_deref(), Some("deployment.apps/api configured"));
    }

    #[tokio::test]
    async fn story_apply_failure_surfaces_tool_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("service.yml"), "kind: Service").unwrap();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::failed("error validating data")));

        let kubectl = Kubectl::new(&runner, Path::new(KUBECONFIG));
        let err = kubectl.apply_dir(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("error validating data"));
    }
}
