//! Config file resolution under the gateway home directory.
//!
//! The prefix comes from request parameters, so it is checked against a
//! whitelist before it is joined onto the home directory. This is the only
//! guard against path traversal.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::AuthError;

/// Default file name; per-identity files prepend a prefix to it.
pub const DEFAULT_CONFIG_FILE: &str = "noauth-config.xml";

// ASCII word characters, space, hyphen, dot, and a fixed accented set.
static PREFIX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_ \-.öÖäÄüÜßèéêù]+$").expect("prefix pattern is valid")
});

/// Computes config file paths under a fixed home directory. Performs no I/O.
#[derive(Debug, Clone)]
pub struct ConfigFileResolver {
    home_dir: PathBuf,
}

impl ConfigFileResolver {
    pub fn new(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
        }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// Path of the config file for `prefix`.
    ///
    /// An empty or absent prefix selects `noauth-config.xml`. Anything else
    /// must match the whitelist in full, otherwise
    /// [`AuthError::InvalidIdentifier`] is returned.
    pub fn resolve(&self, prefix: Option<&str>) -> Result<PathBuf, AuthError> {
        match prefix {
            None | Some("") => Ok(self.home_dir.join(DEFAULT_CONFIG_FILE)),
            Some(prefix) => {
                validate_prefix(prefix)?;
                Ok(self.home_dir.join(format!("{prefix}{DEFAULT_CONFIG_FILE}")))
            }
        }
    }
}

pub fn validate_prefix(prefix: &str) -> Result<(), AuthError> {
    if PREFIX_PATTERN.is_match(prefix) {
        Ok(())
    } else {
        Err(AuthError::InvalidIdentifier(prefix.to_string()))
    }
}
