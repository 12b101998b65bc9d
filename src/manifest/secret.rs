//! Secret generation
//!
//! Three kinds of Secret come out of a rollout: the app's env Secret (Opaque,
//! one key per env-file entry), the image-pull Secret
//! (`kubernetes.io/dockerconfigjson`) and the ingress TLS Secret
//! (`kubernetes.io/tls`). All values are base64-encoded into `data`.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;

use super::{Manifest, ManifestDocument, ObjectMeta, Secret};
use crate::config::{AppConfig, ProjectConfig, ProjectLayout};
use crate::envfile::{self, EnvVars};
use crate::{Error, Result};

/// Secret type for env values
pub const OPAQUE: &str = "Opaque";
/// Secret type for registry credentials
pub const DOCKER_CONFIG_JSON: &str = "kubernetes.io/dockerconfigjson";
/// Secret type for certificates
pub const TLS: &str = "kubernetes.io/tls";

fn secret(name: &str, namespace: &str, type_: &str, data: BTreeMap<String, String>) -> Secret {
    Secret {
        api_version: "v1".to_string(),
        kind: "Secret".to_string(),
        metadata: ObjectMeta::new(name, namespace),
        type_: type_.to_string(),
        data,
    }
}

/// Read the materialized env file for an env secret name
pub fn read_env_file(layout: &ProjectLayout, env_secret: &str) -> Result<String> {
    let path = layout.env_file(env_secret);
    std::fs::read_to_string(&path).map_err(|e| {
        Error::configuration(format!("env file {} unreadable: {}", path.display(), e))
    })
}

/// Opaque Secret holding env values
pub fn env_secret(name: &str, namespace: &str, vars: &EnvVars) -> Secret {
    let data = vars
        .iter()
        .map(|(k, v)| (k.to_string(), STANDARD.encode(v)))
        .collect();
    secret(name, namespace, OPAQUE, data)
}

/// Env Secret for an app, if it names one
///
/// Required keys missing from the file are added with empty values; a file
/// that still yields nothing is [`Error::EmptyEnv`].
pub fn generate_env_secret(
    project: &ProjectConfig,
    app: &AppConfig,
    layout: &ProjectLayout,
) -> Result<Option<ManifestDocument>> {
    let Some(name) = app.env_secret_name() else {
        return Ok(None);
    };
    let text = read_env_file(layout, name)?;
    let vars = envfile::parse_with_required(&text, &app.required_env, name)?;
    Ok(Some(ManifestDocument::app(
        "env-secret.yml",
        Manifest::Secret(env_secret(name, &project.namespace, &vars)),
    )))
}

/// Image-pull Secret for a registry login, written to the shared directory
///
/// The `.dockerconfigjson` payload is keyed by the registry URL.
pub fn pull_secret(
    name: &str,
    namespace: &str,
    registry_url: &str,
    username: &str,
    password: &str,
) -> ManifestDocument {
    let auth = STANDARD.encode(format!("{}:{}", username, password));
    let config = json!({
        "auths": {
            registry_url: {
                "username": username,
                "password": password,
                "auth": auth,
            }
        }
    });
    let mut data = BTreeMap::new();
    data.insert(".dockerconfigjson".to_string(), STANDARD.encode(config.to_string()));
    ManifestDocument::shared(
        format!("{}-secret.yml", name),
        Manifest::Secret(secret(name, namespace, DOCKER_CONFIG_JSON, data)),
    )
}

/// TLS Secret from PEM contents
pub fn tls_secret(name: &str, namespace: &str, cert: &[u8], key: &[u8]) -> Secret {
    let mut data = BTreeMap::new();
    data.insert("tls.crt".to_string(), STANDARD.encode(cert));
    data.insert("tls.key".to_string(), STANDARD.encode(key));
    secret(name, namespace, TLS, data)
}

/// Decoded value of a Secret key
pub fn decode_value(secret: &Secret, key: &str) -> Option<String> {
    let raw = STANDARD.decode(secret.data.get(key)?).ok()?;
    String::from_utf8(raw).ok()
}
