//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files, merging
//! configurations with proper precedence rules, and applying `EXT_*`
//! environment overrides.

use crate::concurrent::{Throttle, DEFAULT_MAX_CONCURRENT_TASKS};
use crate::error::ExtensionsError;
use crate::utils::parse_flag;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[cfg(feature = "auth")]
use crate::auth::BearerOptions;

/// Highest concurrency limit accepted from configuration.
pub const MAX_CONFIGURED_CONCURRENCY: usize = 1024;

/// Configuration loaded from TOML files.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Throttle defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle: Option<ThrottleConfig>,

    /// Bearer token settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer: Option<BearerConfig>,
}

/// `[throttle]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Maximum number of tasks in flight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tasks: Option<usize>,
}

/// `[bearer]` section. Every field is optional so files can be layered.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BearerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_issuer: Option<String>,

    /// Token lifetime in days
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
}

impl FileConfig {
    /// Build a throttle from the configured limit, or the default limit.
    pub fn throttle(&self) -> Result<Throttle, ExtensionsError> {
        let limit = self
            .throttle
            .as_ref()
            .and_then(|throttle| throttle.max_concurrent_tasks)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_TASKS);
        Throttle::new(limit)
    }

    /// Assemble complete bearer options.
    ///
    /// # Errors
    ///
    /// `MissingArgument` naming the absent section or field.
    #[cfg(feature = "auth")]
    pub fn bearer_options(&self) -> Result<BearerOptions, ExtensionsError> {
        let bearer = self
            .bearer
            .as_ref()
            .ok_or_else(|| ExtensionsError::missing_argument("bearer"))?;

        Ok(BearerOptions {
            secret_key: required(&bearer.secret_key, "bearer.secret_key")?,
            authority: bearer.authority.clone(),
            audience: required(&bearer.audience, "bearer.audience")?,
            valid_issuer: required(&bearer.valid_issuer, "bearer.valid_issuer")?,
            expires: bearer
                .expires
                .ok_or_else(|| ExtensionsError::missing_argument("bearer.expires"))?,
        })
    }
}

#[cfg(feature = "auth")]
fn required(value: &Option<String>, name: &str) -> Result<String, ExtensionsError> {
    value
        .clone()
        .ok_or_else(|| ExtensionsError::missing_argument(name))
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to log which files were considered
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load configuration from a specific file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration or an error if parsing fails.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, ExtensionsError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ExtensionsError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            ExtensionsError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content).map_err(|e| {
            ExtensionsError::config(format!("Failed to parse TOML configuration: {}", e))
        })?;

        // Validate the loaded configuration
        self.validate_config(&config)?;

        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// Looks for configuration files in standard locations and merges them;
    /// later locations override earlier ones field by field.
    pub fn discover_and_load(&self) -> Result<FileConfig, ExtensionsError> {
        let mut merged_config = FileConfig::default();
        let mut loaded_files = Vec::new();

        let candidates = [
            // 1. XDG config (lowest precedence)
            self.get_xdg_config_path(),
            // 2. Home directory config
            self.get_global_config_path(),
            // 3. Local config (highest precedence)
            self.get_local_config_path(),
        ];

        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    merged_config = self.merge_configs(merged_config, config);
                    loaded_files.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping configuration file"),
            }
        }

        if self.verbose {
            for path in &loaded_files {
                info!(path = %path.display(), "loaded configuration file");
            }
        }

        Ok(merged_config)
    }

    /// Get the local configuration file path.
    ///
    /// Looks for configuration files in the current directory.
    fn get_local_config_path(&self) -> Option<PathBuf> {
        let candidates = ["./extkit.toml", "./.extkit.toml"];

        candidates
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }

    /// Get the global configuration file path.
    ///
    /// Looks for configuration files in the user's home directory.
    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        let candidates = [".extkit.toml", "extkit.toml"];

        candidates
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    /// Get the XDG configuration file path.
    ///
    /// Follows the XDG Base Directory Specification.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("extkit").join("config.toml");
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    /// Merge two configurations with proper precedence.
    ///
    /// Values from `higher` take precedence over values from `lower`.
    pub fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            throttle: match (lower.throttle, higher.throttle) {
                (Some(mut lower_throttle), Some(higher_throttle)) => {
                    if higher_throttle.max_concurrent_tasks.is_some() {
                        lower_throttle.max_concurrent_tasks = higher_throttle.max_concurrent_tasks;
                    }
                    Some(lower_throttle)
                }
                (lower_throttle, higher_throttle) => higher_throttle.or(lower_throttle),
            },
            bearer: match (lower.bearer, higher.bearer) {
                (Some(mut lower_bearer), Some(higher_bearer)) => {
                    if higher_bearer.secret_key.is_some() {
                        lower_bearer.secret_key = higher_bearer.secret_key;
                    }
                    if higher_bearer.authority.is_some() {
                        lower_bearer.authority = higher_bearer.authority;
                    }
                    if higher_bearer.audience.is_some() {
                        lower_bearer.audience = higher_bearer.audience;
                    }
                    if higher_bearer.valid_issuer.is_some() {
                        lower_bearer.valid_issuer = higher_bearer.valid_issuer;
                    }
                    if higher_bearer.expires.is_some() {
                        lower_bearer.expires = higher_bearer.expires;
                    }
                    Some(lower_bearer)
                }
                (lower_bearer, higher_bearer) => higher_bearer.or(lower_bearer),
            },
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), ExtensionsError> {
        if let Some(limit) = config
            .throttle
            .as_ref()
            .and_then(|throttle| throttle.max_concurrent_tasks)
        {
            if limit == 0 || limit > MAX_CONFIGURED_CONCURRENCY {
                return Err(ExtensionsError::config(format!(
                    "max_concurrent_tasks must be between 1 and {}",
                    MAX_CONFIGURED_CONCURRENCY
                )));
            }
        }

        if let Some(bearer) = &config.bearer {
            if let Some(secret) = &bearer.secret_key {
                if secret.trim().is_empty() {
                    return Err(ExtensionsError::config("bearer.secret_key cannot be blank"));
                }
            }

            if let Some(expires) = bearer.expires {
                if expires < 0 {
                    return Err(ExtensionsError::config(format!(
                        "bearer.expires must not be negative (got {})",
                        expires
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Configuration values that can be set via `EXT_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub max_concurrent_tasks: Option<usize>,
    pub secret_key: Option<String>,
    pub authority: Option<String>,
    pub audience: Option<String>,
    pub valid_issuer: Option<String>,
    pub expires: Option<i64>,
    pub config: Option<String>,
    pub verbose: Option<bool>,
}

impl EnvConfig {
    /// Overlay these values on a file configuration; environment wins.
    pub fn apply_to(&self, config: FileConfig) -> FileConfig {
        let overrides = FileConfig {
            throttle: self.max_concurrent_tasks.map(|limit| ThrottleConfig {
                max_concurrent_tasks: Some(limit),
            }),
            bearer: self.bearer_overrides(),
        };

        ConfigManager::new(false).merge_configs(config, overrides)
    }

    fn bearer_overrides(&self) -> Option<BearerConfig> {
        let bearer = BearerConfig {
            secret_key: self.secret_key.clone(),
            authority: self.authority.clone(),
            audience: self.audience.clone(),
            valid_issuer: self.valid_issuer.clone(),
            expires: self.expires,
        };

        if bearer == BearerConfig::default() {
            None
        } else {
            Some(bearer)
        }
    }
}

/// Load configuration from the process environment.
///
/// Invalid values are logged as warnings and ignored.
pub fn load_env_config() -> EnvConfig {
    env_config_from(|key| env::var(key).ok())
}

/// Parse `EXT_*` values obtained through `lookup`.
pub(crate) fn env_config_from<F>(lookup: F) -> EnvConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut env_config = EnvConfig::default();

    // EXT_MAX_CONCURRENT_TASKS - throttle limit
    if let Some(val) = lookup("EXT_MAX_CONCURRENT_TASKS") {
        match val.trim().parse::<usize>() {
            Ok(limit) if limit > 0 && limit <= MAX_CONFIGURED_CONCURRENCY => {
                env_config.max_concurrent_tasks = Some(limit);
                debug!(limit, "using EXT_MAX_CONCURRENT_TASKS");
            }
            _ => warn!(
                value = %val,
                "invalid EXT_MAX_CONCURRENT_TASKS, must be 1-{}",
                MAX_CONFIGURED_CONCURRENCY
            ),
        }
    }

    // EXT_JWT_EXPIRES_DAYS - token lifetime
    if let Some(val) = lookup("EXT_JWT_EXPIRES_DAYS") {
        match val.trim().parse::<i64>() {
            Ok(days) if days >= 0 => {
                env_config.expires = Some(days);
                debug!(days, "using EXT_JWT_EXPIRES_DAYS");
            }
            _ => warn!(value = %val, "invalid EXT_JWT_EXPIRES_DAYS, must be a non-negative integer"),
        }
    }

    // EXT_VERBOSE - log loaded config files
    if let Some(val) = lookup("EXT_VERBOSE") {
        match parse_flag(&val) {
            Some(flag) => env_config.verbose = Some(flag),
            None => warn!(value = %val, "invalid EXT_VERBOSE, use true/false"),
        }
    }

    let text = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    // Never log the secret itself
    env_config.secret_key = text("EXT_JWT_SECRET");
    env_config.authority = text("EXT_JWT_AUTHORITY");
    env_config.audience = text("EXT_JWT_AUDIENCE");
    env_config.valid_issuer = text("EXT_JWT_ISSUER");
    env_config.config = text("EXT_CONFIG");

    env_config
}

/// Resolve the effective configuration: `EXT_CONFIG` (or discovered files),
/// then environment overrides.
pub fn resolve_config() -> Result<FileConfig, ExtensionsError> {
    let env_config = load_env_config();
    let manager = ConfigManager::new(env_config.verbose.unwrap_or(false));

    let file_config = match &env_config.config {
        Some(path) => manager.load_file(path)?,
        None => manager.discover_and_load()?,
    };

    Ok(env_config.apply_to(file_config))
}
