//! Provider configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or an explicit path), then applies `GUACAMOLE_HOME` and
//! `USERFILES_LOG_LEVEL` env overrides. When no path is given and the default
//! file does not exist, hardcoded defaults are used.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AuthError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const DEFAULT_HOME_DIR: &str = "/etc/guacamole";

/// Fully-resolved provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Directory holding every `*noauth-config.xml` file (already expanded, no `~`).
    pub home_dir: PathBuf,
    pub log_level: String,
    /// Reuse parsed documents while the file's modification time is unchanged.
    pub cache_enabled: bool,
    /// Reject documents that repeat a profile name instead of keeping the last one.
    pub strict_duplicates: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            home_dir: PathBuf::from(DEFAULT_HOME_DIR),
            log_level: default_log_level(),
            cache_enabled: true,
            strict_duplicates: false,
        }
    }
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    provider: RawProvider,
}

#[derive(Deserialize)]
struct RawProvider {
    #[serde(default = "default_home_dir")]
    home_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_true")]
    cache: bool,
    #[serde(default)]
    strict_duplicates: bool,
}

impl Default for RawProvider {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            log_level: default_log_level(),
            cache: true,
            strict_duplicates: false,
        }
    }
}

fn default_home_dir() -> String {
    DEFAULT_HOME_DIR.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Load config from the given path, or `config/default.toml`, then apply env-var overrides.
pub fn load(config_path: Option<&str>) -> Result<ProviderConfig, AuthError> {
    let home_override = env::var("GUACAMOLE_HOME").ok();
    let log_level_override = env::var("USERFILES_LOG_LEVEL").ok();

    if let Some(path) = config_path {
        return load_from(Path::new(path), home_override.as_deref(), log_level_override.as_deref());
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        load_from(default_path, home_override.as_deref(), log_level_override.as_deref())
    } else {
        let mut config = ProviderConfig::default();
        if let Some(home) = home_override {
            config.home_dir = expand_home(&home);
        }
        if let Some(level) = log_level_override {
            config.log_level = level;
        }
        Ok(config)
    }
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    home_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<ProviderConfig, AuthError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AuthError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AuthError::Config(format!("parse error in {}: {e}", path.display())))?;

    let p = parsed.provider;
    let home_dir = expand_home(home_override.unwrap_or(&p.home_dir));
    let log_level = log_level_override.unwrap_or(&p.log_level).to_string();

    Ok(ProviderConfig {
        home_dir,
        log_level,
        cache_enabled: p.cache,
        strict_duplicates: p.strict_duplicates,
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
impl ProviderConfig {
    pub fn test_default(home_dir: &Path) -> Self {
        Self {
            home_dir: home_dir.to_path_buf(),
            ..Self::default()
        }
    }
}
