//! Configuration file management for ember.
//!
//! Provides a TOML-based config file at `~/.config/ember/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use ember_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub llm: Option<LlmSection>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LlmSection {
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub model: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the ember config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/ember` or `~/.config/ember`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("ember");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ember")
}

/// Return the path to the ember config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved database configuration, ready for use.
#[derive(Debug)]
pub struct EmberConfig {
    pub db_config: DbConfig,
}

impl EmberConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// DB URL: `cli_db_url` > `EMBER_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = env::var("EMBER_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        Ok(Self {
            db_config: DbConfig::new(db_url),
        })
    }
}

const DEFAULT_LLM_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_LLM_MODEL: &str = "claude-sonnet-4-5";

/// Resolved LLM provider configuration.
#[derive(Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl LlmConfig {
    /// Resolve configuration using the chain: env var > config file > default.
    ///
    /// - Base URL: `EMBER_LLM_BASE_URL` env > `config_file.llm.base_url` > default
    /// - API key: `EMBER_LLM_API_KEY` env > `config_file.llm.api_key` > error
    /// - Model: `EMBER_LLM_MODEL` env > `config_file.llm.model` > default
    pub fn resolve() -> Result<Self> {
        let file_config = load_config().ok();
        let llm_section = file_config.as_ref().and_then(|c| c.llm.as_ref());

        let base_url = env::var("EMBER_LLM_BASE_URL")
            .ok()
            .or_else(|| llm_section.map(|l| l.base_url.clone()))
            .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string());

        let api_key = env::var("EMBER_LLM_API_KEY")
            .ok()
            .or_else(|| llm_section.map(|l| l.api_key.clone()))
            .context(
                "LLM API key not found; set EMBER_LLM_API_KEY or add an [llm] section to the config file",
            )?;

        let model = env::var("EMBER_LLM_MODEL")
            .ok()
            .or_else(|| llm_section.and_then(|l| l.model.clone()))
            .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string());

        Ok(Self {
            base_url,
            api_key,
            model,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // Tests that set process-wide env vars serialize on this lock so they
    // don't stomp on each other when run concurrently.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let original = ConfigFile {
            database: DatabaseSection {
                url: "postgresql://testhost:5432/testdb".to_string(),
            },
            llm: None,
        };

        let contents = toml::to_string_pretty(&original).unwrap();
        let loaded: ConfigFile = toml::from_str(&contents).unwrap();

        assert_eq!(loaded.database.url, original.database.url);
        assert!(loaded.llm.is_none());
    }

    #[test]
    fn config_with_llm_section_roundtrips() {
        let original = ConfigFile {
            database: DatabaseSection {
                url: "postgresql://localhost:5432/ember".to_string(),
            },
            llm: Some(LlmSection {
                base_url: "https://api.example.com".to_string(),
                api_key: "sk-test".to_string(),
                model: Some("test-model".to_string()),
            }),
        };

        let contents = toml::to_string_pretty(&original).unwrap();
        let loaded: ConfigFile = toml::from_str(&contents).unwrap();

        assert_eq!(loaded.llm.unwrap().base_url, "https://api.example.com");
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("test.toml");
        std::fs::write(&file, "test").unwrap();

        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&file, perms).unwrap();

        let meta = std::fs::metadata(&file).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_env() {
        let _lock = lock_env();

        unsafe { env::set_var("EMBER_DATABASE_URL", "postgresql://env:5432/envdb") };
        let config = EmberConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");
        unsafe { env::remove_var("EMBER_DATABASE_URL") };
    }

    #[test]
    fn resolve_defaults_db_url_when_nothing_set() {
        let _lock = lock_env();

        unsafe { env::remove_var("EMBER_DATABASE_URL") };
        let config = EmberConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
    }

    #[test]
    fn llm_config_errors_without_api_key() {
        let _lock = lock_env();

        unsafe { env::remove_var("EMBER_LLM_API_KEY") };
        let result = LlmConfig::resolve();
        assert!(result.is_err());
    }

    #[test]
    fn llm_config_reads_env_vars() {
        let _lock = lock_env();

        unsafe { env::set_var("EMBER_LLM_API_KEY", "sk-from-env") };
        unsafe { env::set_var("EMBER_LLM_MODEL", "env-model") };
        let config = LlmConfig::resolve().unwrap();
        assert_eq!(config.api_key, "sk-from-env");
        assert_eq!(config.model, "env-model");
        unsafe { env::remove_var("EMBER_LLM_API_KEY") };
        unsafe { env::remove_var("EMBER_LLM_MODEL") };
    }
}
