use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

const MAX_REFRESH_MARGIN_SECS: u64 = 3600;

/// Remote API settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Session persistence and refresh settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Seconds before token expiry to refresh proactively
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
    /// Directory holding credentials.json; defaults to ~/.loandesk
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

fn default_refresh_margin_secs() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: default_refresh_margin_secs(),
            store_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Layer as written on disk: only keys that are present override
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigLayer {
    #[serde(default)]
    api: ApiLayer,
    #[serde(default)]
    session: SessionLayer,
    #[serde(default)]
    audit: AuditLayer,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ApiLayer {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct SessionLayer {
    refresh_margin_secs: Option<u64>,
    store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct AuditLayer {
    enabled: Option<bool>,
    path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.loandesk/config.local.toml) > project (.loandesk/config.toml) > user (~/.loandesk/config.toml)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".loandesk").join("config.toml");
            if user_config.exists() {
                config.merge(read_layer(&user_config)?);
            }
        }

        let project_config = Path::new(".loandesk").join("config.toml");
        if project_config.exists() {
            config.merge(read_layer(&project_config)?);
        }

        // Should be gitignored
        let local_config = Path::new(".loandesk").join("config.local.toml");
        if local_config.exists() {
            config.merge(read_layer(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path over the built-in defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.merge(read_layer(path)?);
        Ok(config)
    }

    fn merge(&mut self, other: ConfigLayer) {
        if let Some(v) = other.api.base_url {
            self.api.base_url = v;
        }
        if let Some(v) = other.api.timeout_ms {
            self.api.timeout_ms = v;
        }
        if let Some(v) = other.session.refresh_margin_secs {
            self.session.refresh_margin_secs = v;
        }
        if other.session.store_dir.is_some() {
            self.session.store_dir = other.session.store_dir;
        }
        if let Some(v) = other.audit.enabled {
            self.audit.enabled = v;
        }
        if other.audit.path.is_some() {
            self.audit.path = other.audit.path;
        }
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.session.refresh_margin_secs)
    }

    /// Directory for credentials and the default audit log
    pub fn store_dir(&self) -> PathBuf {
        self.session.store_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".loandesk")
        })
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.store_dir().join("credentials.json")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.audit
            .path
            .clone()
            .unwrap_or_else(|| self.store_dir().join("audit.jsonl"))
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let url = &self.api.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Expected an http(s) URL, got '{}'", url),
            });
        }

        if self.api.timeout_ms == 0 {
            errors.push(ValidationError {
                field: "api.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.session.refresh_margin_secs > MAX_REFRESH_MARGIN_SECS {
            errors.push(ValidationError {
                field: "session.refresh_margin_secs".to_string(),
                message: format!(
                    "Must be at most {}, got {}",
                    MAX_REFRESH_MARGIN_SECS, self.session.refresh_margin_secs
                ),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn read_layer(path: &Path) -> Result<ConfigLayer> {
    let content = std::fs::read_to_string(path)?;
    let layer: ConfigLayer = toml::from_str(&content)?;
    Ok(layer)
}
