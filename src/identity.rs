//! Request identity — the `username` / `ident` pair that selects a config file.
//!
//! File naming under the home directory:
//! ```text
//! /etc/guacamole/
//! ├── noauth-config.xml                    (no identity)
//! ├── anonymous_1337_noauth-config.xml     (ident only)
//! └── alice_1337_noauth-config.xml         (username + ident)
//! ```
//!
//! A username without an ident selects the default file.

use std::collections::HashMap;

/// Identity strings pulled from an inbound request. Either may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub ident: String,
}

impl Identity {
    pub fn new(username: impl Into<String>, ident: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ident: ident.into(),
        }
    }

    /// Read `username` and `ident` from request parameters; absent keys become empty.
    pub fn from_parameters(parameters: &HashMap<String, String>) -> Self {
        Self {
            username: parameters.get("username").cloned().unwrap_or_default(),
            ident: parameters.get("ident").cloned().unwrap_or_default(),
        }
    }

    /// Filename prefix for this identity, or `None` for the default file.
    pub fn prefix(&self) -> Option<String> {
        match (self.username.is_empty(), self.ident.is_empty()) {
            (false, false) => Some(format!("{}_{}_", self.username, self.ident)),
            (true, false) => Some(format!("anonymous_{}_", self.ident)),
            _ => None,
        }
    }
}
