//! Container registry sessions
//!
//! A rollout logs in to its registry once, builds and pushes through that
//! session, and hands the same credentials to the cluster as an image-pull
//! Secret. Each session keeps its own docker config directory, so two
//! rollouts never share (or clobber) a login.
//!
//! Apps without a pull-secret name use an ambient session: no login, the
//! docker client's default configuration.

use std::path::Path;

use tempfile::TempDir;
use tracing::{debug, info};

use crate::config::{AppConfig, ProjectConfig, RegistryKind};
use crate::credentials::cloud_cli;
use crate::exec::{run_checked, CommandRunner, CommandSpec};
use crate::manifest::secret::pull_secret;
use crate::manifest::ManifestDocument;
use crate::{Error, Result};

/// Username for cloud registry tokens
pub const CLOUD_REGISTRY_USER: &str = "AWS";

/// Login for one rollout
#[derive(Debug)]
pub struct RegistrySession {
    url: String,
    config_dir: Option<TempDir>,
}

impl RegistrySession {
    /// Session using the docker client's default configuration
    pub fn ambient(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            config_dir: None,
        }
    }

    /// Registry URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether this session performed its own login
    pub fn is_authenticated(&self) -> bool {
        self.config_dir.is_some()
    }

    /// Session docker config directory, if any
    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_ref().map(TempDir::path)
    }

    /// A docker command running inside this session
    pub fn docker(&self) -> CommandSpec {
        let spec = CommandSpec::new("docker");
        match self.config_dir() {
            Some(dir) => spec.arg("--config").arg(dir.to_string_lossy()),
            None => spec,
        }
    }

    /// `docker build -t <image> <context>`
    pub fn build(&self, image: &str, context: &Path) -> CommandSpec {
        self.docker()
            .args(["build", "-t", image])
            .arg(context.to_string_lossy())
            .current_dir(context)
    }

    /// `docker push <image>`
    pub fn push(&self, image: &str) -> CommandSpec {
        self.docker().args(["push", image])
    }

    async fn login<R: CommandRunner + ?Sized>(
        runner: &R,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("launchpad-docker-").tempdir()?;
        let session = Self {
            url: url.to_string(),
            config_dir: Some(dir),
        };
        let spec = session
            .docker()
            .args(["login", url, "--username", username, "--password-stdin"])
            .stdin(password);
        run_checked(runner, &spec)
            .await
            .map_err(|e| Error::image_pull_secret(format!("registry login failed: {}", e)))?;
        debug!(registry = %url, "registry login succeeded");
        Ok(session)
    }
}

fn required<'a>(value: Option<&'a str>, field: &str, kind: RegistryKind) -> Result<&'a str> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        Error::image_pull_secret(format!("{} registry requires {}", kind, field))
    })
}

/// Exchange cloud credentials for a short-lived registry token
pub async fn cloud_registry_token<R: CommandRunner + ?Sized>(
    runner: &R,
    project: &ProjectConfig,
) -> Result<String> {
    let aws = cloud_cli(project).map_err(|e| Error::image_pull_secret(e.to_string()))?;
    let region = project.aws.as_ref().map(|a| a.region.as_str()).unwrap_or_default();
    let spec = aws.args(["ecr", "get-login-password", "--region", region]);
    let token = run_checked(runner, &spec)
        .await
        .map_err(|e| Error::image_pull_secret(format!("token exchange failed: {}", e)))?;
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::image_pull_secret("token exchange returned nothing"));
    }
    Ok(token.to_string())
}

/// Log in to the project's registry and produce the app's pull Secret
///
/// Without a pull-secret name no login happens: the returned session is
/// ambient and there is no document.
pub async fn open_session<R: CommandRunner + ?Sized>(
    runner: &R,
    project: &ProjectConfig,
    app: &AppConfig,
) -> Result<(RegistrySession, Option<ManifestDocument>)> {
    let registry = &project.registry;
    let Some(secret_name) = app.pull_secret_name() else {
        return Ok((RegistrySession::ambient(&registry.url), None));
    };

    let url = required(Some(registry.url.as_str()), "url", registry.kind)?;
    let (username, password) = match registry.kind {
        RegistryKind::Static => (
            required(registry.username.as_deref(), "username", registry.kind)?.to_string(),
            required(registry.password.as_deref(), "password", registry.kind)?.to_string(),
        ),
        RegistryKind::Cloud => (
            CLOUD_REGISTRY_USER.to_string(),
            cloud_registry_token(runner, project).await?,
        ),
    };

    info!(registry = %url, kind = %registry.kind, secret = %secret_name, "logging in to registry");
    let session = RegistrySession::login(runner, url, &username, &password).await?;
    let doc = pull_secret(secret_name, &project.namespace, url, &username, &password);
    Ok((session, Some(doc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CloudCredentials, RegistryConfig};
    use crate::exec::{CommandOutput, MockCommandRunner};
    use crate::manifest::secret::decode_value;
    use crate::manifest::Manifest;

    fn static_project() -> ProjectConfig {
        ProjectConfig {
            namespace: "shop".into(),
            registry: RegistryConfig {
                kind: RegistryKind::Static,
                url: "registry.example.com".into(),
                username: Some("bot".into()),
                password: Some("hunter2".into()),
            },
            ..Default::default()
        }
    }

    fn cloud_project() -> ProjectConfig {
        ProjectConfig {
            namespace: "shop".into(),
            aws: Some(CloudCredentials {
                region: "us-east-1".into(),
                access_key: "AKIA".into(),
                secret_key: "s3cr3t".into(),
                albs: vec![],
            }),
            registry: RegistryConfig {
                kind: RegistryKind::Cloud,
                url: "1234.dkr.ecr.us-east-1.amazonaws.com".into(),
                username: None,
                password: None,
            },
            ..Default::default()
        }
    }

    fn app_with_secret() -> AppConfig {
        AppConfig {
            image_pull_secret: Some("regcred".into()),
            ..Default::default()
        }
    }

    fn dockerconfig(doc: &ManifestDocument) -> serde_json::Value {
        let Manifest::Secret(secret) = &doc.manifest else {
            panic!("expected Secret");
        };
        serde_json::from_str(&decode_value(secret, ".dockerconfigjson").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn story_static_registry_logs_in_through_stdin() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| {
                spec.program == "docker"
                    && spec.args[0] == "--config"
                    && spec.args[2..]
                        == [
                            "login",
                            "registry.example.com",
                            "--username",
                            "bot",
                            "--password-stdin",
                        ]
                    && spec.stdin.as_deref() == Some("hunter2")
            })
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("Login Succeeded")));

        let (session, doc) = open_session(&runner, &static_project(), &app_with_secret())
            .await
            .unwrap();

        assert!(session.is_authenticated());
        assert!(!session.push("img").display().contains("hunter2"));
        let doc = doc.expect("pull secret document");
        assert_eq!(doc.file_name, "regcred-secret.yml");
        let config = dockerconfig(&doc);
        assert_eq!(config["auths"]["registry.example.com"]["username"], "bot");
    }

    #[tokio::test]
    async fn story_cloud_registry_exchanges_token() {
        let mut runner = MockCommandRunner::new();
        let mut seq = mockall::Sequence::new();
        runner
            .expect_run()
            .withf(|spec| {
                spec.starts_with("aws", &["ecr", "get-login-password", "--region", "us-east-1"])
                    && spec
                        .env
                        .contains(&("AWS_SECRET_ACCESS_KEY".to_string(), "s3cr3t".to_string()))
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok("eyJ0b2tlbiI6MX0=\n")));
        runner
            .expect_run()
            .withf(|spec| {
                spec.program == "docker"
                    && spec.args.contains(&"AWS".to_string())
                    && spec.stdin.as_deref() == Some("eyJ0b2tlbiI6MX0=")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok("Login Succeeded")));

        let (_, doc) = open_session(&runner, &cloud_project(), &app_with_secret())
            .await
            .unwrap();
        let config = dockerconfig(&doc.unwrap());
        let entry = &config["auths"]["1234.dkr.ecr.us-east-1.amazonaws.com"];
        assert_eq!(entry["username"], "AWS");
        assert_eq!(entry["password"], "eyJ0b2tlbiI6MX0=");
    }

    #[tokio::test]
    async fn story_no_pull_secret_means_ambient_session() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let (session, doc) = open_session(&runner, &static_project(), &AppConfig::default())
            .await
            .unwrap();
        assert!(!session.is_authenticated());
        assert!(doc.is_none());
        assert_eq!(session.push("r/app:1").display(), "docker push r/app:1");
    }

    #[tokio::test]
    async fn story_missing_static_password_fails_before_login() {
        let mut project = static_project();
        project.registry.password = None;
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let err = open_session(&runner, &project, &app_with_secret())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImagePullSecret(ref m) if m.contains("password")));
    }

    #[tokio::test]
    async fn story_failed_token_exchange_is_a_pull_secret_error() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::failed("ExpiredToken")));

        let err = open_session(&runner, &cloud_project(), &app_with_secret())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImagePullSecret(ref m) if m.contains("ExpiredToken")));
    }

    #[tokio::test]
    async fn story_cloud_registry_without_credentials_is_rejected() {
        let mut project = cloud_project();
        project.aws = None;
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let err = open_session(&runner, &project, &app_with_secret())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImagePullSecret(_)));
    }

    #[tokio::test]
    async fn story_sessions_are_isolated() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::ok("Login Succeeded")));

        let (a, _) = open_session(&runner, &static_project(), &app_with_secret())
            .await
            .unwrap();
        let (b, _) = open_session(&runner, &static_project(), &app_with_secret())
            .await
            .unwrap();
        assert_ne!(a.config_dir(), b.config_dir());

        let build = a.build("r/app:1", Path::new("/src/app"));
        assert!(build.display().ends_with("build -t r/app:1 /src/app"));
        assert_eq!(build.args[1], a.config_dir().unwrap().to_string_lossy());
    }
}
