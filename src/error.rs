//! Crate-wide error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("invalid username or ident: {0:?}")]
    InvalidIdentifier(String),

    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error parsing XML file: {0}")]
    XmlSyntax(String),

    #[error("configurations cannot be nested")]
    NestedConfig,

    #[error("parameter without corresponding configuration")]
    OrphanParameter,

    #[error("each configuration must have a {attribute}")]
    MissingAttribute { attribute: &'static str },

    #[error("duplicate configuration name: {0}")]
    DuplicateProfile(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AuthError::Config("missing field".into());
        assert!(e.to_string().contains("config error"));
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn invalid_identifier_display_quotes_input() {
        let e = AuthError::InvalidIdentifier("a/b_".into());
        assert!(e.to_string().contains("\"a/b_\""));
    }

    #[test]
    fn missing_attribute_names_attribute() {
        let e = AuthError::MissingAttribute { attribute: "protocol" };
        assert_eq!(e.to_string(), "each configuration must have a protocol");
    }

    #[test]
    fn not_found_shows_path() {
        let e = AuthError::NotFound(PathBuf::from("/etc/guacamole/noauth-config.xml"));
        assert!(e.to_string().contains("/etc/guacamole/noauth-config.xml"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AuthError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }
}
