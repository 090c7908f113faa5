//! Authentication-provider adapter.
//!
//! Every request is accepted; what a user may connect to is whatever the
//! identity's `noauth-config.xml` lists. A missing or expired file means the
//! user is not authorized (`Ok(None)`). Profiles are re-read on every
//! authenticate/update call and handed out with tokens substituted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info};
use url::form_urlencoded;
use uuid::Uuid;

use crate::config::ProviderConfig;
use crate::document::ProfileSet;
use crate::error::AuthError;
use crate::identity::Identity;
use crate::loader::{Availability, ProfileLoader};
use crate::token::TokenFilter;

pub const PROVIDER_IDENTIFIER: &str = "userfilesauth";

/// What the host framework knows about an inbound request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub remote_address: Option<String>,
    pub remote_hostname: Option<String>,
    /// Request parameters (query string).
    pub parameters: HashMap<String, String>,
}

impl Credentials {
    /// Credentials carrying only the parameters of an urlencoded query string.
    /// A leading `?` is ignored; for repeated keys the first value wins.
    pub fn from_query(query: &str) -> Self {
        let mut parameters = HashMap::new();
        for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            parameters.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }
        Self {
            parameters,
            ..Self::default()
        }
    }
}

/// A user admitted by [`UserFilesProvider`], with the profiles it may use.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub identifier: String,
    pub credentials: Credentials,
    profiles: Arc<ProfileSet>,
}

impl AuthenticatedUser {
    fn new(credentials: Credentials, profiles: Arc<ProfileSet>) -> Self {
        let identifier = credentials
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            identifier,
            credentials,
            profiles,
        }
    }

    pub fn profiles(&self) -> &Arc<ProfileSet> {
        &self.profiles
    }
}

pub struct UserFilesProvider {
    loader: ProfileLoader,
}

impl UserFilesProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            loader: ProfileLoader::new(config),
        }
    }

    pub fn identifier(&self) -> &'static str {
        PROVIDER_IDENTIFIER
    }

    pub fn loader(&self) -> &ProfileLoader {
        &self.loader
    }

    /// Admit the request if its identity's config file exists and is unexpired.
    pub fn authenticate_user(&self, credentials: &Credentials) -> Result<Option<AuthenticatedUser>, AuthError> {
        let mut credentials = credentials.clone();
        let Some(profiles) = self.filtered_profiles(&mut credentials)? else {
            return Ok(None);
        };
        let user = AuthenticatedUser::new(credentials, profiles);
        info!(user = %user.identifier, profiles = user.profiles.len(), "user authenticated");
        Ok(Some(user))
    }

    /// Re-read the profiles for an existing session.
    pub fn update_authenticated_user(
        &self,
        _user: &AuthenticatedUser,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticatedUser>, AuthError> {
        self.authenticate_user(credentials)
    }

    /// Profiles already resolved for `user`.
    pub fn authorized_profiles(&self, user: &AuthenticatedUser) -> Arc<ProfileSet> {
        Arc::clone(&user.profiles)
    }

    fn filtered_profiles(&self, credentials: &mut Credentials) -> Result<Option<Arc<ProfileSet>>, AuthError> {
        let identity = Identity::from_parameters(&credentials.parameters);
        let profiles = match self.loader.load(&identity)? {
            Availability::Available(profiles) => profiles,
            Availability::Expired { .. } | Availability::Missing(_) => return Ok(None),
        };

        if !identity.username.is_empty() {
            debug!(username = %identity.username, "set username from request");
            credentials.username = Some(identity.username.clone());
        }

        let filter = TokenFilter::standard(credentials, Local::now());
        let mut filtered = (*profiles).clone();
        for profile in filtered.values_mut() {
            filter.filter_values(&mut profile.parameters);
        }
        Ok(Some(Arc::new(filtered)))
    }
}
