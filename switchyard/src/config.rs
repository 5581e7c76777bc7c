use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Top-level gateway configuration.
///
/// Loaded from a YAML file, then overlaid with `SWITCHYARD_*` environment
/// variables. Every section has serde defaults so a partial file (or no file
/// at all) yields a usable config; `validate` catches the keys that have no
/// sensible default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub sync: SyncConfig,
    pub oauth: OauthConfig,
    pub upstream: UpstreamConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-request deadline, in seconds. LLM completions with extended
    /// thinking routinely run minutes, hence the generous default.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            request_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_folder: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_folder: base.join(".switchyard").join("data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub enabled: bool,
    pub max_concurrent: usize,
    pub session_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: 3,
            session_ttl_secs: 300,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// The external OAuth collaborator that issues and refreshes upstream
/// credentials. The gateway never initiates the authorization flow itself;
/// it only exchanges codes handed to it and refreshes tokens it holds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OauthConfig {
    pub client_id: String,
    pub token_url: String,
    pub authorize_url: String,
    pub redirect_uri: String,
    pub scope: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Legacy shared admin key, matched against `X-API-Key`. Admin-role
    /// client keys work regardless of whether this is set.
    pub api_key: Option<String>,
}

impl GatewayConfig {
    /// Load from a YAML file (when present) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| Error::Config(format!("read {}: {}", p.display(), e)))?;
                serde_yaml::from_str(&raw)
                    .map_err(|e| Error::Config(format!("parse {}: {}", p.display(), e)))?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Overlay `SWITCHYARD_*` environment variables onto the loaded values.
    pub fn apply_env(&mut self) {
        env_string("SWITCHYARD_SERVER_HOST", &mut self.server.host);
        env_parse("SWITCHYARD_SERVER_PORT", &mut self.server.port);
        env_parse(
            "SWITCHYARD_SERVER_REQUEST_TIMEOUT_SECS",
            &mut self.server.request_timeout_secs,
        );
        if let Ok(v) = std::env::var("SWITCHYARD_STORAGE_DATA_FOLDER") {
            self.storage.data_folder = PathBuf::from(v);
        }
        env_parse("SWITCHYARD_SESSION_ENABLED", &mut self.session.enabled);
        env_parse(
            "SWITCHYARD_SESSION_MAX_CONCURRENT",
            &mut self.session.max_concurrent,
        );
        env_parse(
            "SWITCHYARD_SESSION_TTL_SECS",
            &mut self.session.session_ttl_secs,
        );
        env_parse(
            "SWITCHYARD_SESSION_CLEANUP_INTERVAL_SECS",
            &mut self.session.cleanup_interval_secs,
        );
        env_parse("SWITCHYARD_SYNC_INTERVAL_SECS", &mut self.sync.interval_secs);
        env_string("SWITCHYARD_OAUTH_CLIENT_ID", &mut self.oauth.client_id);
        env_string("SWITCHYARD_OAUTH_TOKEN_URL", &mut self.oauth.token_url);
        env_string(
            "SWITCHYARD_OAUTH_AUTHORIZE_URL",
            &mut self.oauth.authorize_url,
        );
        env_string("SWITCHYARD_OAUTH_REDIRECT_URI", &mut self.oauth.redirect_uri);
        env_string("SWITCHYARD_OAUTH_SCOPE", &mut self.oauth.scope);
        env_string("SWITCHYARD_UPSTREAM_BASE_URL", &mut self.upstream.base_url);
        if let Ok(v) = std::env::var("SWITCHYARD_AUTH_API_KEY") {
            self.auth.api_key = Some(v);
        }
    }

    /// Check the keys that must be set for the data plane to function.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.base_url.is_empty() {
            return Err(Error::Config("upstream.base_url is required".into()));
        }
        Url::parse(&self.upstream.base_url)
            .map_err(|e| Error::Config(format!("upstream.base_url: {}", e)))?;
        if self.oauth.token_url.is_empty() {
            return Err(Error::Config("oauth.token_url is required".into()));
        }
        Url::parse(&self.oauth.token_url)
            .map_err(|e| Error::Config(format!("oauth.token_url: {}", e)))?;
        if self.oauth.client_id.is_empty() {
            return Err(Error::Config("oauth.client_id is required".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.session_ttl_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_string(key: &str, target: &mut String) {
    if let Ok(v) = std::env::var(key) {
        *target = v;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *target = parsed;
        } else {
            tracing::warn!(key, value = %v, "ignoring unparseable environment override");
        }
    }
}
