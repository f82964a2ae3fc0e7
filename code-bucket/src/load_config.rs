/// `load_config` module: loads the optional YAML config file and injects secrets from the environment.
///
/// This is the only place where user-supplied YAML is parsed. Every section is
/// optional and falls back to defaults, so running without a config file is the
/// same as running with an empty one.
///
/// # Accepted YAML
/// ```yaml
/// store:
///   api_url: http://localhost:7272
/// repos_dir: /tmp/code-bucket/repos
/// ingest:
///   request_delay_ms: 300
///   retry_attempts: 3
///   max_file_size_bytes: 20971520
/// ```
///
/// # Environment
/// - `R2R_API_URL` overrides `store.api_url`.
/// - `R2R_EMAIL` / `R2R_PASSWORD` supply credentials; they are never read from YAML.
///
/// # Errors
/// All errors use `anyhow::Error` with the offending path in the message.
use anyhow::{Context, Result};
use code_bucket_core::config::IngestConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const ENV_API_URL: &str = "R2R_API_URL";
pub const ENV_EMAIL: &str = "R2R_EMAIL";
pub const ENV_PASSWORD: &str = "R2R_PASSWORD";

const DEFAULT_API_URL: &str = "http://localhost:7272";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub store: StoreSection,
    pub ingest: IngestConfig,
    pub repos_dir: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            store: StoreSection::default(),
            ingest: IngestConfig::default(),
            repos_dir: std::env::temp_dir().join("code-bucket").join("repos"),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub api_url: String,
    #[serde(skip)]
    pub email: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            email: None,
            password: None,
        }
    }
}

// Hand-written so the password never reaches a log line.
impl std::fmt::Debug for StoreSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSection")
            .field("api_url", &self.api_url)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Loads `path` if given, otherwise starts from defaults, then applies the
/// environment on top.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            info!("No config file given, using defaults");
            CliConfig::default()
        }
    };
    apply_env(&mut config);
    config.ingest.trace_loaded();
    info!(
        api_url = %config.store.api_url,
        repos_dir = %config.repos_dir.display(),
        email_set = config.store.email.is_some(),
        password_set = config.store.password.is_some(),
        "Configuration ready"
    );
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<CliConfig> {
    info!(config_path = ?path, "Loading configuration from file");

    let content = fs::read_to_string(path).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to read config file");
        e
    })
    .with_context(|| format!("Failed to read config file {}", path.display()))?;

    // an empty file deserialises to null
    if content.trim().is_empty() {
        return Ok(CliConfig::default());
    }

    let config: CliConfig = serde_yaml::from_str(&content)
        .map_err(|e| {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            e
        })
        .with_context(|| format!("Failed to parse config YAML {}", path.display()))?;
    info!(config_path = ?path, "Parsed config YAML successfully");
    Ok(config)
}

fn apply_env(config: &mut CliConfig) {
    if let Some(url) = non_empty_env(ENV_API_URL) {
        config.store.api_url = url;
    }
    config.store.email = non_empty_env(ENV_EMAIL);
    config.store.password = non_empty_env(ENV_PASSWORD);
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
