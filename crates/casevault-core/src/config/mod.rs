//! Configuration management with file persistence
//!
//! The master encryption key is never part of the persisted configuration;
//! it is read exclusively from the `CASEVAULT_MASTER_KEY` environment
//! variable and a config file that tries to carry one fails validation.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Casevault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub security: SecurityConfig,
    pub auth: AuthConfig,
    pub compliance: ComplianceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip)]
    pub master_key: Option<String>,
    /// Whether new sensitive fields are written encrypted
    pub encryption_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub session_ttl_minutes: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_failures: u32,
    pub rate_limit_base_lockout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Require an active data_processing consent before export
    pub export_requires_consent: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            security: SecurityConfig {
                master_key: None,
                encryption_enabled: true,
            },
            auth: AuthConfig {
                session_ttl_minutes: 30,
                rate_limit_window_secs: 300,
                rate_limit_max_failures: 5,
                rate_limit_base_lockout_secs: 60,
            },
            compliance: ComplianceConfig {
                export_requires_consent: true,
            },
        }
    }
}

impl SecurityConfig {
    /// The master key from the environment, if set
    pub fn resolved_master_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;
        Ok(env::var(crate::crypto::MASTER_KEY_ENV).ok())
    }

    /// Presence indicator safe to print
    pub fn redacted_master_key(&self) -> anyhow::Result<Option<String>> {
        Ok(self.resolved_master_key()?.map(|_| "***".to_string()))
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.master_key.is_some() {
            return Err(anyhow!(
                "The master key must be provided via the {} environment variable, \
                 not stored in configuration",
                crate::crypto::MASTER_KEY_ENV
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("CASEVAULT_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("casevault")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or fall back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.security.enforce_env_only()?;
        if self.auth.session_ttl_minutes == 0 {
            return Err(anyhow!("session_ttl_minutes must be positive"));
        }
        if self.auth.rate_limit_max_failures == 0 {
            return Err(anyhow!("rate_limit_max_failures must be positive"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "security.encryption_enabled" => Ok(self.security.encryption_enabled.to_string()),
            "auth.session_ttl_minutes" => Ok(self.auth.session_ttl_minutes.to_string()),
            "auth.rate_limit_window_secs" => Ok(self.auth.rate_limit_window_secs.to_string()),
            "auth.rate_limit_max_failures" => Ok(self.auth.rate_limit_max_failures.to_string()),
            "auth.rate_limit_base_lockout_secs" => {
                Ok(self.auth.rate_limit_base_lockout_secs.to_string())
            }
            "compliance.export_requires_consent" => {
                Ok(self.compliance.export_requires_consent.to_string())
            }

            // Master key: show presence only
            "security.master_key" | "master_key" => match self.security.redacted_master_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok(format!(
                    "(not set - use the {} env var)",
                    crate::crypto::MASTER_KEY_ENV
                )),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `casevault config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "security.encryption_enabled" => {
                self.security.encryption_enabled = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "auth.session_ttl_minutes" => {
                let ttl: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid session_ttl_minutes value: {}", value))?;
                if ttl == 0 {
                    return Err(anyhow!("session_ttl_minutes must be positive"));
                }
                self.auth.session_ttl_minutes = ttl;
            }
            "auth.rate_limit_window_secs" => {
                self.auth.rate_limit_window_secs = value
                    .parse()
                    .with_context(|| format!("Invalid rate_limit_window_secs value: {}", value))?;
            }
            "auth.rate_limit_max_failures" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid rate_limit_max_failures value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("rate_limit_max_failures must be positive"));
                }
                self.auth.rate_limit_max_failures = max;
            }
            "auth.rate_limit_base_lockout_secs" => {
                self.auth.rate_limit_base_lockout_secs = value.parse().with_context(|| {
                    format!("Invalid rate_limit_base_lockout_secs value: {}", value)
                })?;
            }
            "compliance.export_requires_consent" => {
                self.compliance.export_requires_consent = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }

            // Master key cannot be set via config
            "security.master_key" | "master_key" => {
                return Err(anyhow!(
                    "The master key cannot be stored in configuration. \
                     Set the {} environment variable instead.",
                    crate::crypto::MASTER_KEY_ENV
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `casevault config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "security.encryption_enabled",
            "security.master_key",
            "auth.session_ttl_minutes",
            "auth.rate_limit_window_secs",
            "auth.rate_limit_max_failures",
            "auth.rate_limit_base_lockout_secs",
            "compliance.export_requires_consent",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_master_key_rejected_in_config() {
        let mut config = Config::default();
        config.security.master_key = Some("sneaky".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_master_key_cannot_be_set() {
        let mut config = Config::default();
        assert!(config.set("security.master_key", "abc").is_err());
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut config = Config::default();
        config.set("auth.session_ttl_minutes", "45").unwrap();
        assert_eq!(config.get("auth.session_ttl_minutes").unwrap(), "45");
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = Config::default();
        assert!(config.set("auth.session_ttl_minutes", "0").is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let config = Config::default();
        assert!(config.get("nonsense.key").is_err());
    }

    #[test]
    fn test_list_contains_all_sections() {
        let list = Config::default().list().unwrap();
        assert!(list.iter().any(|(k, _)| k.starts_with("security.")));
        assert!(list.iter().any(|(k, _)| k.starts_with("auth.")));
        assert!(list.iter().any(|(k, _)| k.starts_with("compliance.")));
    }
}
