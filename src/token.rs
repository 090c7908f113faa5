//! `${TOKEN}` substitution for profile parameter values.
//!
//! Unknown tokens are left as written. `$${TOKEN}` escapes to the literal
//! text `${TOKEN}`.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Local};
use regex::{Captures, Regex};

use crate::provider::Credentials;

pub const TOKEN_USERNAME: &str = "GUAC_USERNAME";
pub const TOKEN_PASSWORD: &str = "GUAC_PASSWORD";
pub const TOKEN_CLIENT_ADDRESS: &str = "GUAC_CLIENT_ADDRESS";
pub const TOKEN_CLIENT_HOSTNAME: &str = "GUAC_CLIENT_HOSTNAME";
pub const TOKEN_DATE: &str = "GUAC_DATE";
pub const TOKEN_TIME: &str = "GUAC_TIME";

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\$?)\$\{([A-Za-z0-9_]*)\}").expect("token pattern is valid"));

#[derive(Debug, Clone, Default)]
pub struct TokenFilter {
    tokens: HashMap<String, String>,
}

impl TokenFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter preloaded with the standard credential, date and time tokens.
    pub fn standard(credentials: &Credentials, now: DateTime<Local>) -> Self {
        let mut filter = Self::new();
        let optional = [
            (TOKEN_USERNAME, &credentials.username),
            (TOKEN_PASSWORD, &credentials.password),
            (TOKEN_CLIENT_ADDRESS, &credentials.remote_address),
            (TOKEN_CLIENT_HOSTNAME, &credentials.remote_hostname),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                filter.set(name, value.clone());
            }
        }
        filter.set(TOKEN_DATE, now.format("%Y%m%d").to_string());
        filter.set(TOKEN_TIME, now.format("%H%M%S").to_string());
        filter
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.tokens.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.tokens.get(name).map(String::as_str)
    }

    pub fn filter(&self, input: &str) -> String {
        TOKEN_PATTERN
            .replace_all(input, |caps: &Captures<'_>| {
                let whole = &caps[0];
                if !caps[1].is_empty() {
                    return whole[1..].to_string();
                }
                match self.tokens.get(&caps[2]) {
                    Some(value) => value.clone(),
                    None => whole.to_string(),
                }
            })
            .into_owned()
    }

    /// Filter every value in place.
    pub fn filter_values(&self, values: &mut HashMap<String, String>) {
        for value in values.values_mut() {
            *value = self.filter(value);
        }
    }
}
