//! Server configuration.
//!
//! Loaded from an optional TOML file, then overridden by `COA_*`
//! environment variables, then by command-line flags. Every field has a
//! default, so an empty file (or none) is a valid configuration.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//! rate_limit = 120
//! api_key = "app-secret"
//! reconcile_interval_secs = 30
//!
//! [approval]
//! base_url = "https://coa.lab.example.com"
//! preview_base_url = "https://app.lab.example.com"
//! token_ttl_hours = 24
//! approver_email = "qa-manager@lab.example.com"
//!
//! [mail]
//! relay_url = "https://mail-relay.example.com/v1/send"
//! api_key = "relay-key"
//! from = "coa@lab.example.com"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Longest accepted approval token lifetime: one year.
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub approval: ApprovalConfig,
    pub mail: MailConfig,
    pub logging: LoggingConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests per minute per client IP on application routes.
    pub rate_limit: u64,
    /// When set, application routes require `Authorization: Bearer` or `X-API-Key`.
    pub api_key: Option<String>,
    /// Period of the token sweep + reconciliation tick.
    pub reconcile_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            rate_limit: 60,
            api_key: None,
            reconcile_interval_secs: 60,
        }
    }
}

/// `[approval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Public URL of this server, used in emailed links.
    /// Defaults to `http://localhost:{port}`.
    pub base_url: Option<String>,
    /// Where certificate previews redirect to. Defaults to `base_url`.
    pub preview_base_url: Option<String>,
    pub token_ttl_hours: i64,
    /// Recipient used when an approval request names none.
    pub approver_email: Option<String>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            preview_base_url: None,
            token_ttl_hours: coa_approval::DEFAULT_TOKEN_TTL.whole_hours(),
            approver_email: None,
        }
    }
}

/// `[mail]` section. Without `relay_url`, mail is logged instead of sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub relay_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            api_key: None,
            from: "coa@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// `[logging]` section. `RUST_LOG` overrides `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Read `path` if given and apply environment overrides.
    ///
    /// Call [`Config::validate`] once command-line flags are applied.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `COA_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(port) = lookup("COA_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("COA_PORT is not a port: '{}'", port)))?;
        }
        if let Some(limit) = lookup("COA_RATE_LIMIT") {
            self.server.rate_limit = limit.parse().map_err(|_| {
                ConfigError::Invalid(format!("COA_RATE_LIMIT is not a number: '{}'", limit))
            })?;
        }
        if let Some(key) = lookup("COA_API_KEY") {
            self.server.api_key = Some(key);
        }
        if let Some(url) = lookup("COA_BASE_URL") {
            self.approval.base_url = Some(url);
        }
        if let Some(key) = lookup("COA_MAIL_API_KEY") {
            self.mail.api_key = Some(key);
        }
        Ok(())
    }

    /// Check cross-field constraints once all overrides are in.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.approval.token_ttl_hours <= 0 {
            return Err(ConfigError::Invalid(
                "approval.token_ttl_hours must be positive".to_string(),
            ));
        }
        if self.approval.token_ttl_hours > MAX_TOKEN_TTL_HOURS {
            return Err(ConfigError::Invalid(format!(
                "approval.token_ttl_hours must be at most {}",
                MAX_TOKEN_TTL_HOURS
            )));
        }
        if self.server.reconcile_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.reconcile_interval_secs must be positive".to_string(),
            ));
        }
        coa_approval::links::parse_base_url(&self.base_url())
            .map_err(|e| ConfigError::Invalid(format!("approval.base_url: {}", e)))?;
        coa_approval::links::parse_base_url(&self.preview_base_url())
            .map_err(|e| ConfigError::Invalid(format!("approval.preview_base_url: {}", e)))?;
        Ok(())
    }

    /// Public base URL for emailed links.
    pub fn base_url(&self) -> String {
        self.approval
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.server.port))
    }

    pub fn preview_base_url(&self) -> String {
        self.approval
            .preview_base_url
            .clone()
            .unwrap_or_else(|| self.base_url())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.server.api_key.as_deref().filter(|k| !k.is_empty())
    }

    /// Replace configured secrets with a placeholder for display.
    pub fn mask_secrets(&mut self) {
        for secret in [&mut self.server.api_key, &mut self.mail.api_key] {
            if secret.is_some() {
                *secret = Some("********".to_string());
            }
        }
    }
}
