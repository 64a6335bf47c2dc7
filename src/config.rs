//! Configuration manager for reaper.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_REQUEST_TIMEOUT: u64 = 30; // seconds.
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    #[serde(default)]
    pub name: String,
    /// Listening port.
    pub port: Option<u16>,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Backend endpoint and credentials.
    #[serde(default)]
    pub backend: Backend,
    /// Storage buckets names.
    #[serde(default)]
    pub buckets: Buckets,
    /// What to do when blob cleanup fails.
    #[serde(default)]
    pub cleanup: CleanupPolicy,
    /// Seconds before a read-only request answers 408.
    pub request_timeout: Option<u64>,
    /// Related to telemetry export.
    #[serde(default)]
    pub telemetry: Telemetry,
}

/// Backend-as-a-service configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    #[serde(default)]
    pub url: String,
    /// Public key, used with the caller's token.
    #[serde(default, skip_serializing)]
    pub anon_key: String,
    /// Privileged key. Only the deletion orchestrator uses it.
    #[serde(default, skip_serializing)]
    pub service_role_key: String,
    /// Per-request timeout in seconds.
    pub timeout: Option<u64>,
}

/// Buckets holding user uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Buckets {
    pub avatars: String,
    pub posts: String,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            avatars: "avatars".into(),
            posts: "posts".into(),
        }
    }
}

/// Failure policy for blob deletion.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Abort the deletion when a blob cannot be removed.
    #[default]
    Strict,
    /// Log the failure and still delete the identity.
    BestEffort,
}

/// Telemetry configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Expose `/metrics`.
    #[serde(default)]
    pub prometheus: bool,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Listening port, `8080` by default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Seconds before a request times out.
    pub fn request_timeout(&self) -> u64 {
        self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies environment overrides.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let mut config = match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader(file) {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        config.version = VERSION.to_owned();
        config.apply_env(|key| std::env::var(key).ok());

        if config.backend.url.is_empty() {
            tracing::warn!("missing backend url, set `SUPABASE_URL`");
        } else {
            config.backend.url = self.normalize_url(&config.backend.url)?;
        }

        Ok(Arc::new(config))
    }

    /// Environment wins over the file.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("SUPABASE_URL") {
            self.backend.url = url;
        }
        if let Some(key) = var("SUPABASE_ANON_KEY") {
            self.backend.anon_key = key;
        }
        if let Some(key) = var("SUPABASE_SERVICE_ROLE_KEY") {
            self.backend.service_role_key = key;
        }
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.port = Some(port);
        }
        if self.name.is_empty() {
            self.name = env!("CARGO_PKG_NAME").to_owned();
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const YAML: &str = r#"
name: photos
port: 9000
backend:
  url: xyz.supabase.co
  anon_key: file-anon
  service_role_key: file-service
buckets:
  avatars: pfp
  posts: posts
cleanup: best_effort
telemetry:
  prometheus: true
"#;

    #[test]
    fn test_parse_yaml() {
        let config: Configuration = serde_yaml::from_str(YAML).unwrap();

        assert_eq!(config.port(), 9000);
        assert_eq!(config.buckets.avatars, "pfp");
        assert_eq!(config.cleanup, CleanupPolicy::BestEffort);
        assert!(config.telemetry.prometheus);
        assert_eq!(config.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_defaults() {
        let config: Configuration = serde_yaml::from_str("{}").unwrap();

        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.buckets, Buckets::default());
        assert_eq!(config.cleanup, CleanupPolicy::Strict);
    }

    #[test]
    fn test_env_overrides() {
        let mut config: Configuration = serde_yaml::from_str(YAML).unwrap();
        let env = HashMap::from([
            ("SUPABASE_URL", "https://env.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "env-service"),
            ("PORT", "not-a-port"),
        ]);

        config.apply_env(|key| env.get(key).map(|v| (*v).to_owned()));

        assert_eq!(config.backend.url, "https://env.supabase.co");
        assert_eq!(config.backend.anon_key, "file-anon");
        assert_eq!(config.backend.service_role_key, "env-service");
        assert_eq!(config.port(), 9000);
    }

    #[test]
    fn test_keys_never_serialized() {
        let config: Configuration = serde_yaml::from_str(YAML).unwrap();
        let json = serde_json::to_string(&config).unwrap();

        assert!(!json.contains("file-anon"));
        assert!(!json.contains("file-service"));
    }

    #[test]
    fn test_normalize_url() {
        let config = Configuration::default();
        assert_eq!(
            config.normalize_url("xyz.supabase.co").unwrap(),
            "https://xyz.supabase.co/"
        );
        assert_eq!(
            config.normalize_url("http://127.0.0.1:54321").unwrap(),
            "http://127.0.0.1:54321/"
        );
    }
}
