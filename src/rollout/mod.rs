//! Rollout orchestration
//!
//! A rollout takes one app of one project environment from source to
//! running workload:
//!
//! ```text
//! acquire-lock -> pre-build-hook -> pull-secret -> build-image -> push-image
//!   -> resolve-credentials -> ensure-namespace -> generate-manifests
//!   -> apply-shared -> apply-app
//! ```
//!
//! Steps run strictly in order and the first failure aborts the rollout.
//! The failure is reported to the notifier and returned as
//! [`Error::Rollout`] naming the step. Nothing is retried.

mod lock;

pub use lock::RolloutLock;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ProjectConfig, ProjectLayout};
use crate::credentials::ensure_kubeconfig;
use crate::exec::{run_checked, CommandRunner, CommandSpec};
use crate::kubectl::Kubectl;
use crate::manifest::generate_app_manifests;
use crate::notify::Notifier;
use crate::registry::open_session;
use crate::{Error, Result};

/// Script run in the source directory before the image build, when present
pub const PRE_BUILD_HOOK: &str = "build.sh";

/// One stage of a rollout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RolloutStep {
    /// Take the per-app lock
    AcquireLock,
    /// Run the source directory's `build.sh`
    PreBuildHook,
    /// Log in to the registry and produce the pull Secret
    PullSecret,
    /// Build the container image
    BuildImage,
    /// Push the container image
    PushImage,
    /// Make sure the kubeconfig exists
    ResolveCredentials,
    /// Make sure the target namespace exists
    EnsureNamespace,
    /// Generate and write manifests
    GenerateManifests,
    /// Apply the shared manifest directory
    ApplyShared,
    /// Apply the app manifest directory
    ApplyApp,
}

impl RolloutStep {
    /// Every step, in execution order
    pub const ORDER: [RolloutStep; 10] = [
        Self::AcquireLock,
        Self::PreBuildHook,
        Self::PullSecret,
        Self::BuildImage,
        Self::PushImage,
        Self::ResolveCredentials,
        Self::EnsureNamespace,
        Self::GenerateManifests,
        Self::ApplyShared,
        Self::ApplyApp,
    ];

    /// Kebab-case step name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcquireLock => "acquire-lock",
            Self::PreBuildHook => "pre-build-hook",
            Self::PullSecret => "pull-secret",
            Self::BuildImage => "build-image",
            Self::PushImage => "push-image",
            Self::ResolveCredentials => "resolve-credentials",
            Self::EnsureNamespace => "ensure-namespace",
            Self::GenerateManifests => "generate-manifests",
            Self::ApplyShared => "apply-shared",
            Self::ApplyApp => "apply-app",
        }
    }
}

impl std::fmt::Display for RolloutStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image tag derived from the current time in milliseconds
pub fn timestamp_tag() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// What to roll out
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentSession {
    /// Project name
    pub project: String,
    /// Environment name
    pub env: String,
    /// App name
    pub app: String,
    /// Image tag
    pub image_tag: String,
    /// Directory holding the app's source and Dockerfile
    pub source_path: PathBuf,
}

impl DeploymentSession {
    /// Session with a timestamp image tag
    pub fn new(
        project: impl Into<String>,
        env: impl Into<String>,
        app: impl Into<String>,
        source_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project: project.into(),
            env: env.into(),
            app: app.into(),
            image_tag: timestamp_tag(),
            source_path: source_path.into(),
        }
    }

    /// Use an explicit image tag
    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = tag.into();
        self
    }

    fn describe(&self) -> String {
        format!("{} {} {} {}", self.project, self.env, self.app, self.image_tag)
    }
}

/// Outcome of a successful rollout
#[derive(Clone, Debug)]
pub struct RolloutReport {
    /// Pushed image reference
    pub image: String,
    /// Manifest files written
    pub manifests: Vec<PathBuf>,
    /// kubectl's report for the app directory
    pub apply_output: String,
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Drives rollouts against projects under one root directory
pub struct Orchestrator {
    projects_root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(
        projects_root: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            projects_root: projects_root.into(),
            runner,
            notifier,
        }
    }

    /// Layout of a project environment
    pub fn layout(&self, project: &str, env: &str) -> ProjectLayout {
        ProjectLayout::new(&self.projects_root, project, env)
    }

    /// Write an app's manifests without building, pushing or applying
    ///
    /// No external tool runs, so the image-pull Secret is not produced.
    pub fn render(
        &self,
        project: &str,
        env: &str,
        app_name: &str,
        image_tag: &str,
    ) -> Result<Vec<PathBuf>> {
        let layout = self.layout(project, env);
        let config = ProjectConfig::load(&layout.config_path())?;
        let app = config.app(app_name)?;
        let image = config.image_ref(app_name, image_tag);
        let set = generate_app_manifests(&config, app, app_name, &image, &layout)?;
        let written = set.write(&layout)?;
        info!(
            project = %project,
            env = %env,
            app = %app_name,
            files = written.len(),
            "rendered manifests"
        );
        Ok(written)
    }

    /// Run a full rollout
    ///
    /// Every failure, including configuration problems found before the
    /// first step, is reported to the notifier before being returned.
    pub async fn deploy(&self, session: &DeploymentSession) -> Result<RolloutReport> {
        info!(
            project = %session.project,
            env = %session.env,
            app = %session.app,
            tag = %session.image_tag,
            "starting rollout"
        );
        match self.run(session).await {
            Ok(report) => {
                self.notifier
                    .send_text(&format!(
                        "Deployed {} K8s result: {} ({})",
                        session.describe(),
                        report.apply_output,
                        now()
                    ))
                    .await;
                info!(app = %session.app, image = %report.image, "rollout complete");
                Ok(report)
            }
            Err(e) => {
                warn!(
                    app = %session.app,
                    step = ?e.failed_step().map(|s| s.as_str()),
                    error = %e,
                    "rollout failed"
                );
                self.notifier
                    .send_text(&format!("Deploy {} failed: {} ({})", session.describe(), e, now()))
                    .await;
                Err(e)
            }
        }
    }

    async fn run(&self, session: &DeploymentSession) -> Result<RolloutReport> {
        let runner = self.runner.as_ref();
        let layout = self.layout(&session.project, &session.env);
        let config = ProjectConfig::load(&layout.config_path())?;
        let app = config.app(&session.app)?;
        check_source(&session.source_path)?;
        let image = config.image_ref(&session.app, &session.image_tag);

        let _lock = step(RolloutStep::AcquireLock, async {
            RolloutLock::acquire(&layout.lock_path(&session.app), &session.app)
        })
        .await?;

        step(RolloutStep::PreBuildHook, run_pre_build_hook(runner, &session.source_path)).await?;

        let (registry, pull_secret) =
            step(RolloutStep::PullSecret, open_session(runner, &config, app)).await?;

        self.notifier
            .send_text(&format!("Start building {} ({})", session.describe(), now()))
            .await;
        step(RolloutStep::BuildImage, async {
            info!(image = %image, "building image");
            run_checked(runner, &registry.build(&image, &session.source_path)).await
        })
        .await?;
        step(RolloutStep::PushImage, async {
            info!(image = %image, "pushing image");
            run_checked(runner, &registry.push(&image)).await
        })
        .await?;

        self.notifier
            .send_text(&format!("Start deploying {} ({})", session.describe(), now()))
            .await;
        let kubeconfig = layout.kubeconfig_path();
        step(
            RolloutStep::ResolveCredentials,
            ensure_kubeconfig(runner, &config, &kubeconfig),
        )
        .await?;

        let kubectl = Kubectl::new(runner, &kubeconfig);
        step(
            RolloutStep::EnsureNamespace,
            kubectl.ensure_namespace(&config.namespace),
        )
        .await?;

        let manifests = step(RolloutStep::GenerateManifests, async {
            let mut set = generate_app_manifests(&config, app, &session.app, &image, &layout)?;
            set.extend(pull_secret);
            set.write(&layout)
        })
        .await?;

        step(
            RolloutStep::ApplyShared,
            kubectl.apply_dir(&layout.shared_manifest_dir()),
        )
        .await?;
        let apply_output = step(
            RolloutStep::ApplyApp,
            kubectl.apply_dir(&layout.app_manifest_dir(&session.app)),
        )
        .await?
        .unwrap_or_default();

        Ok(RolloutReport {
            image,
            manifests,
            apply_output,
        })
    }
}

async fn step<T>(
    step: RolloutStep,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    info!(step = %step, "rollout step");
    fut.await.map_err(|e| Error::rollout(step, e))
}

fn check_source(source: &Path) -> Result<()> {
    if !source.join("Dockerfile").is_file() {
        return Err(Error::configuration(format!(
            "no Dockerfile in source directory {}",
            source.display()
        )));
    }
    Ok(())
}

async fn run_pre_build_hook<R: CommandRunner + ?Sized>(runner: &R, source: &Path) -> Result<()> {
    if !source.join(PRE_BUILD_HOOK).is_file() {
        return Ok(());
    }
    info!(dir = %source.display(), "running pre-build hook");
    let spec = CommandSpec::new("sh").arg(PRE_BUILD_HOOK).current_dir(source);
    run_checked(runner, &spec).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};
    use crate::notify::MockNotifier;

    const CONFIG: &str = r#"{
  "name": "shop",
  "env": "prod",
  "namespace": "shop",
  "docker_repository": { "type": "standard", "url": "registry.example.com", "username": "bot", "password": "pw" },
  "app": {
    "api": { "replicas": 2, "ports": [{ "name": "http", "port": 8080 }], "imagePullSecret": "regcred" }
  }
}"#;

    struct Fixture {
        root: tempfile::TempDir,
        source: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let layout = ProjectLayout::new(root.path(), "shop", "prod");
            std::fs::create_dir_all(layout.root()).unwrap();
            std::fs::write(layout.config_path(), CONFIG).unwrap();
            std::fs::write(layout.kubeconfig_path(), "apiVersion: v1").unwrap();

            let source = tempfile::tempdir().unwrap();
            std::fs::write(source.path().join("Dockerfile"), "FROM scratch").unwrap();
            Self { root, source }
        }

        fn session(&self) -> DeploymentSession {
            DeploymentSession::new("shop", "prod", "api", self.source.path()).with_image_tag("42")
        }
    }

    fn quiet_notifier() -> MockNotifier {
        let mut notifier = MockNotifier::new();
        notifier.expect_send_text().returning(|_| ());
        notifier
    }

    #[test]
    fn story_steps_have_stable_names_in_order() {
        let names: Vec<_> = RolloutStep::ORDER.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec![
                "acquire-lock",
                "pre-build-hook",
                "pull-secret",
                "build-image",
                "push-image",
                "resolve-credentials",
                "ensure-namespace",
                "generate-manifests",
                "apply-shared",
                "apply-app",
            ]
        );
    }

    #[test]
    fn story_timestamp_tags_are_numeric() {
        let tag = timestamp_tag();
        assert!(tag.len() >= 13);
        assert!(tag.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn story_successful_rollout_runs_tools_in_order() {
        let fixture = Fixture::new();
        let mut runner = MockCommandRunner::new();
        let mut seq = mockall::Sequence::new();
        let expect = |runner: &mut MockCommandRunner,
                      seq: &mut mockall::Sequence,
                      program: &'static str,
                      arg: &'static str,
                      out: &'static str| {
            runner
                .expect_run()
                .withf(move |spec| spec.program == program && spec.args.iter().any(|a| a == arg))
                .times(1)
                .in_sequence(seq)
                .returning(move |_| Ok(CommandOutput::ok(out)));
        };
        expect(&mut runner, &mut seq, "docker", "login", "Login Succeeded");
        expect(&mut runner, &mut seq, "docker", "build", "");
        expect(&mut runner, &mut seq, "docker", "push", "");
        expect(&mut runner, &mut seq, "kubectl", "get", "shop Active");
        for (dir, out) in [
            ("ymls", "secret/regcred configured"),
            ("api", "deployment.apps/api configured"),
        ] {
            runner
                .expect_run()
                .withf(move |spec| {
                    spec.starts_with("kubectl", &["--kubeconfig"])
                        && spec.args.iter().any(|a| a == "apply")
                        && spec.args.last().is_some_and(|a| a.ends_with(dir))
                })
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| Ok(CommandOutput::ok(out)));
        }

        let mut notifier = MockNotifier::new();
        let mut nseq = mockall::Sequence::new();
        for prefix in ["Start building", "Start deploying", "Deployed"] {
            notifier
                .expect_send_text()
                .withf(move |text| text.starts_with(prefix) && text.contains("shop prod api 42"))
                .times(1)
                .in_sequence(&mut nseq)
                .returning(|_| ());
        }

        let orchestrator = Orchestrator::new(
            fixture.root.path(),
            Arc::new(runner),
            Arc::new(notifier),
        );
        let report = orchestrator.deploy(&fixture.session()).await.unwrap();

        assert_eq!(report.image, "registry.example.com/api:42");
        assert_eq!(report.apply_output, "deployment.apps/api configured");
        let layout = orchestrator.layout("shop", "prod");
        assert!(layout.shared_manifest_dir().join("regcred-secret.yml").exists());
        assert!(layout.app_manifest_dir("api").join("deployment.yml").exists());
        assert!(layout.app_manifest_dir("api").join("service.yml").exists());
    }

    #[tokio::test]
    async fn story_failed_push_stops_the_rollout_and_notifies() {
        let fixture = Fixture::new();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.args.iter().any(|a| a == "push"))
            .times(1)
            .returning(|_| {
                Ok(CommandOutput::failed(
                    "denied: requested access to the resource is denied",
                ))
            });
        runner
            .expect_run()
            .withf(|spec| spec.program == "kubectl")
            .never();
        runner
            .expect_run()
            .withf(|spec| spec.program == "docker" && !spec.args.iter().any(|a| a == "push"))
            .returning(|_| Ok(CommandOutput::ok("")));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_send_text()
            .withf(|text| text.starts_with("Start building"))
            .times(1)
            .returning(|_| ());
        notifier
            .expect_send_text()
            .withf(|text| {
                text.starts_with("Deploy shop prod api 42 failed") && text.contains("push-image")
            })
            .times(1)
            .returning(|_| ());

        let orchestrator = Orchestrator::new(
            fixture.root.path(),
            Arc::new(runner),
            Arc::new(notifier),
        );
        let err = orchestrator.deploy(&fixture.session()).await.unwrap_err();

        assert_eq!(err.failed_step(), Some(RolloutStep::PushImage));
        let layout = orchestrator.layout("shop", "prod");
        assert!(!layout.app_manifest_dir("api").exists(), "nothing generated after a failed push");
    }

    #[tokio::test]
    async fn story_missing_dockerfile_fails_before_any_tool_runs() {
        let fixture = Fixture::new();
        std::fs::remove_file(fixture.source.path().join("Dockerfile")).unwrap();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let orchestrator = Orchestrator::new(
            fixture.root.path(),
            Arc::new(runner),
            Arc::new(quiet_notifier()),
        );
        let err = orchestrator.deploy(&fixture.session()).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("Dockerfile")));
    }

    #[tokio::test]
    async fn story_pre_build_hook_runs_in_source_directory() {
        let fixture = Fixture::new();
        std::fs::write(fixture.source.path().join(PRE_BUILD_HOOK), "echo prep").unwrap();
        let source = fixture.source.path().to_path_buf();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(move |spec| {
                spec.program == "sh"
                    && spec.args == vec![PRE_BUILD_HOOK.to_string()]
                    && spec.current_dir.as_deref() == Some(source.as_path())
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::failed("npm ERR!")));

        let orchestrator = Orchestrator::new(
            fixture.root.path(),
            Arc::new(runner),
            Arc::new(quiet_notifier()),
        );
        let err = orchestrator.deploy(&fixture.session()).await.unwrap_err();
        assert_eq!(err.failed_step(), Some(RolloutStep::PreBuildHook));
    }

    #[tokio::test]
    async fn story_concurrent_rollout_of_same_app_is_rejected() {
        let fixture = Fixture::new();
        let layout = ProjectLayout::new(fixture.root.path(), "shop", "prod");
        let _held = RolloutLock::acquire(&layout.lock_path("api"), "api").unwrap();

        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let orchestrator = Orchestrator::new(
            fixture.root.path(),
            Arc::new(runner),
            Arc::new(quiet_notifier()),
        );
        let err = orchestrator.deploy(&fixture.session()).await.unwrap_err();
        assert_eq!(err.failed_step(), Some(RolloutStep::AcquireLock));
        assert!(err.to_string().contains("already in progress"));
    }

    #[test]
    fn story_render_writes_manifests_without_tools() {
        let fixture = Fixture::new();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();
        let mut notifier = MockNotifier::new();
        notifier.expect_send_text().never();

        let orchestrator = Orchestrator::new(
            fixture.root.path(),
            Arc::new(runner),
            Arc::new(notifier),
        );
        let written = orchestrator.render("shop", "prod", "api", "7").unwrap();

        let names: Vec<_> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["deployment.yml", "service.yml"]);
        let deployment = std::fs::read_to_string(&written[0]).unwrap();
        assert!(deployment.contains("registry.example.com/api:7"));
    }
}
