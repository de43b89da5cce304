//! Configuration loading
//!
//! Resolution order for every setting:
//! 1. Command-line argument (highest priority, applied by the binary)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the database connection string
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Environment variable overriding the bind host
pub const ENV_HOST: &str = "EMPIRE_HOST";
/// Environment variable overriding the bind port
pub const ENV_PORT: &str = "EMPIRE_PORT";
/// Environment variable for the public base URL used in share links
pub const ENV_BASE_URL: &str = "BASE_URL";
/// Environment variable holding the API key encryption secret
pub const ENV_ENCRYPTION_SECRET: &str = "API_KEY_ENCRYPTION_SECRET";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5800;

/// Per-engine switches
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineToggles {
    /// Start background jobs after initialization
    pub run_jobs: bool,
    pub forum: bool,
    pub challenges: bool,
    pub newsletter: bool,
    pub ugc_video: bool,
}

impl Default for EngineToggles {
    fn default() -> Self {
        Self {
            run_jobs: true,
            forum: true,
            challenges: true,
            newsletter: true,
            ugc_video: true,
        }
    }
}

/// Resolved service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmpireConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub base_url: String,
    /// Secret used to derive the API key encryption key; random per process when absent
    pub encryption_secret: Option<String>,
    pub engines: EngineToggles,
}

impl Default for EmpireConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            base_url: format!("http://localhost:{}", DEFAULT_PORT),
            encryption_secret: None,
            engines: EngineToggles::default(),
        }
    }
}

impl EmpireConfig {
    /// Load configuration from TOML file (explicit path or platform default) and environment
    ///
    /// Command-line overrides are applied afterwards by the caller.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_file() {
                Some(path) => {
                    info!("Loading configuration from {}", path.display());
                    Self::from_file(&path)?
                }
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse TOML text; missing keys fall back to defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Overlay environment variables using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port
                .parse()
                .map_err(|_| Error::Config(format!("{} is not a valid port: {}", ENV_PORT, port)))?;
        }
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.base_url = base_url;
        }
        if let Some(secret) = lookup(ENV_ENCRYPTION_SECRET) {
            if !secret.trim().is_empty() {
                self.encryption_secret = Some(secret);
            }
        }
        Ok(())
    }

    /// Socket address string for the HTTP listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Platform config file: `~/.config/empire/config.toml`, then `/etc/empire/config.toml`
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("empire").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/empire/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// OS-dependent default database location
fn default_database_url() -> String {
    let data_dir = dirs::data_local_dir()
        .map(|d| d.join("empire"))
        .unwrap_or_else(|| PathBuf::from("./empire_data"));
    format!("sqlite://{}?mode=rwc", data_dir.join("empire.db").display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EmpireConfig::default();
        assert_eq!(config.port, 5800);
        assert_eq!(config.bind_addr(), "127.0.0.1:5800");
        assert!(config.database_url.starts_with("sqlite://"));
        assert!(config.engines.run_jobs);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EmpireConfig::from_toml_str(
            r#"
            port = 6000
            [engines]
            newsletter = false
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.host, "127.0.0.1");
        assert!(!config.engines.newsletter);
        assert!(config.engines.forum);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = EmpireConfig::from_toml_str("database_url = \"sqlite://file.db\"").unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_DATABASE_URL, "sqlite::memory:"),
            (ENV_PORT, "7001"),
            (ENV_ENCRYPTION_SECRET, "s3cret"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.port, 7001);
        assert_eq!(config.encryption_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_invalid_port_env_rejected() {
        let mut config = EmpireConfig::default();
        let result = config.apply_env(|key| (key == ENV_PORT).then(|| "not-a-port".to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_blank_secret_ignored() {
        let mut config = EmpireConfig::default();
        config
            .apply_env(|key| (key == ENV_ENCRYPTION_SECRET).then(|| "   ".to_string()))
            .unwrap();
        assert!(config.encryption_secret.is_none());
    }
}
