//! Configuration management for the identity engine.

use crate::{CoreError, CoreResult, Paths};
use identity_engine::{EngineSettings, ProviderId};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable overriding `log_level`.
pub const LOG_LEVEL_ENV: &str = "STEPS_TOWARD_LOG_LEVEL";

/// Identity engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Provider whose previous session is restored at startup.
    #[serde(default = "default_restore_provider")]
    pub restore_provider: String,
    /// Providers whose credentials are checked for revocation at startup.
    #[serde(default = "default_revocable_providers")]
    pub revocable_providers: Vec<String>,
    /// Providers with their own sign-out step before the backend sign-out.
    #[serde(default = "default_external_sign_out_providers")]
    pub external_sign_out_providers: Vec<String>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_restore_provider() -> String {
    ProviderId::GOOGLE.to_string()
}

fn default_revocable_providers() -> Vec<String> {
    vec![ProviderId::APPLE.to_string()]
}

fn default_external_sign_out_providers() -> Vec<String> {
    vec![ProviderId::GOOGLE.to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            restore_provider: default_restore_provider(),
            revocable_providers: default_revocable_providers(),
            external_sign_out_providers: default_external_sign_out_providers(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load `<base>/config.json` if present (defaults otherwise), then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.restore_provider.trim().is_empty() {
            return Err(CoreError::Config(
                "restore_provider must not be empty".to_string(),
            ));
        }
        let blank = self
            .revocable_providers
            .iter()
            .chain(&self.external_sign_out_providers)
            .any(|p| p.trim().is_empty());
        if blank {
            return Err(CoreError::Config(
                "provider lists must not contain empty entries".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert into the engine's runtime settings.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            restore_provider: ProviderId::new(self.restore_provider.as_str()),
            revocable_providers: self
                .revocable_providers
                .iter()
                .map(|p| ProviderId::new(p.as_str()))
                .collect(),
            external_sign_out_providers: self
                .external_sign_out_providers
                .iter()
                .map(|p| ProviderId::new(p.as_str()))
                .collect(),
        }
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Only `log_level` can be overridden at runtime.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(LOG_LEVEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.log_level = level.trim().to_string();
        }
    }
}
