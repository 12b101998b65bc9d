//! On-disk layout of a project environment directory

use std::path::{Path, PathBuf};

/// Paths under `<projects_root>/<project>/<env>/`
#[derive(Clone, Debug)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    /// Layout for a project environment under the projects root
    pub fn new(projects_root: impl AsRef<Path>, project: &str, env: &str) -> Self {
        Self {
            root: projects_root.as_ref().join(project).join(env),
        }
    }

    /// Layout rooted at an existing project environment directory
    pub fn from_dir(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project environment directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persisted project configuration
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Cluster-access kubeconfig
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.root.join("kube_conf.yml")
    }

    /// Materialized env file for an env secret name
    pub fn env_file(&self, env_secret: &str) -> PathBuf {
        self.root.join("envs").join(format!("{}.env", env_secret))
    }

    /// Manifests shared by all apps, applied first
    pub fn shared_manifest_dir(&self) -> PathBuf {
        self.root.join("ymls")
    }

    /// Manifests owned by one app
    pub fn app_manifest_dir(&self, app_name: &str) -> PathBuf {
        self.shared_manifest_dir().join(app_name)
    }

    /// Advisory lock file for an app's rollouts
    pub fn lock_path(&self, app_name: &str) -> PathBuf {
        self.root.join("locks").join(format!("{}.lock", app_name))
    }

    /// Resolve a path stored in the config relative to the project directory
    pub fn resolve(&self, relative: &str) -> PathBuf {
        let path = Path::new(relative);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
