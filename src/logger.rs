//! Logging setup.
//!
//! `RUST_LOG`, when set and valid, wins. Otherwise the provider's configured
//! `log_level` applies to every target. A bad configured level is an error
//! so a typo in `config/default.toml` does not silently log at the default.

use std::env;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AuthError;

/// Install the global subscriber, writing to stderr so stdout stays free for
/// command output.
pub fn init(level: &str) -> Result<(), AuthError> {
    let filter = filter_for(level, env::var("RUST_LOG").ok().as_deref())?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AuthError::Logger(format!("failed to set subscriber: {e}")))
}

/// Build the filter from the configured level and an optional `RUST_LOG` value.
fn filter_for(level: &str, rust_log: Option<&str>) -> Result<EnvFilter, AuthError> {
    let level = parse_level(level)?;
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return Ok(filter),
            Err(e) => eprintln!("ignoring invalid RUST_LOG '{directives}': {e}"),
        }
    }
    Ok(EnvFilter::default().add_directive(level.into()))
}

fn parse_level(level: &str) -> Result<LevelFilter, AuthError> {
    level
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| AuthError::Logger(format!("unrecognised log level: '{level}'")))
}
