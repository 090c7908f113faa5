//! Profile loading policy: resolve → exists → parse → expiry → self-delete.
//!
//! Every step for one resolved path runs under that path's lock, so a
//! self-deleting document cannot vanish between another caller's existence
//! check and its read. Parsed documents are cached per path and reused while
//! the file's modification time is unchanged. Documents that delete
//! themselves are never cached.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::document::{self, ConfigDocument, ParseOptions, ProfileSet};
use crate::error::AuthError;
use crate::identity::Identity;
use crate::resolver::ConfigFileResolver;

/// Outcome of a lookup that did not fail.
#[derive(Debug, Clone)]
pub enum Availability {
    /// The document exists and has not expired.
    Available(Arc<ProfileSet>),
    /// The document parsed, but its `valid_to` lies in the past.
    Expired { path: PathBuf, valid_to: DateTime<Utc> },
    /// No document at the resolved path.
    Missing(PathBuf),
}

impl Availability {
    /// Profiles the caller may use; empty unless [`Availability::Available`].
    pub fn profiles(&self) -> Arc<ProfileSet> {
        match self {
            Availability::Available(profiles) => Arc::clone(profiles),
            _ => Arc::new(ProfileSet::new()),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available(_))
    }
}

struct CacheEntry {
    modified: SystemTime,
    document: ConfigDocument,
}

/// Loads per-identity profile documents from the home directory.
///
/// `Send + Sync`; share one instance behind an `Arc`.
pub struct ProfileLoader {
    resolver: ConfigFileResolver,
    options: ParseOptions,
    cache_enabled: bool,
    /// resolved path -> lock serialising check/parse/delete for that path
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
    remove_file: fn(&Path) -> io::Result<()>,
}

impl ProfileLoader {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            resolver: ConfigFileResolver::new(&config.home_dir),
            options: ParseOptions {
                strict_duplicates: config.strict_duplicates,
            },
            cache_enabled: config.cache_enabled,
            locks: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            remove_file: remove_config_file,
        }
    }

    pub fn resolver(&self) -> &ConfigFileResolver {
        &self.resolver
    }

    /// Look up the profiles for `identity` as of now.
    pub fn load(&self, identity: &Identity) -> Result<Availability, AuthError> {
        self.load_at(identity, Utc::now())
    }

    /// Same as [`load`](Self::load) with an explicit clock. Tests pass `now`
    /// directly instead of waiting for documents to expire.
    pub fn load_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<Availability, AuthError> {
        let prefix = identity.prefix();
        let path = self.resolver.resolve(prefix.as_deref())?;

        let path_lock = self.path_lock(&path)?;
        let result = match path_lock.lock() {
            Ok(_guard) => self.load_locked(path.clone(), now),
            Err(_) => Err(AuthError::Lock(format!("config lock for {}", path.display()))),
        };
        self.release_path_lock(&path, path_lock)?;
        result
    }

    /// Runs with the path lock held.
    fn load_locked(&self, path: PathBuf, now: DateTime<Utc>) -> Result<Availability, AuthError> {
        let modified = match fs::metadata(&path) {
            Ok(meta) => meta.modified().ok(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no configuration file");
                self.invalidate(&path)?;
                return Ok(Availability::Missing(path));
            }
            Err(e) => return Err(e.into()),
        };

        let document = match self.cached(&path, modified)? {
            Some(document) => {
                debug!(path = %path.display(), "using cached configuration");
                document
            }
            None => {
                let document = self.read_document(&path)?;
                if document.delete_after_read {
                    self.delete_config_file(&path);
                    self.invalidate(&path)?;
                } else if let Some(modified) = modified {
                    self.store(&path, modified, &document)?;
                }
                document
            }
        };

        if let Some(valid_to) = document.valid_to.filter(|_| document.is_expired_at(now)) {
            warn!(
                path = %path.display(),
                valid_to = %valid_to.to_rfc3339(),
                "ignoring configuration because its valid_to is outdated"
            );
            return Ok(Availability::Expired { path, valid_to });
        }

        Ok(Availability::Available(document.profiles))
    }

    /// Drop any cached document for `path`.
    pub fn invalidate(&self, path: &Path) -> Result<(), AuthError> {
        self.cache
            .lock()
            .map_err(|_| AuthError::Lock("config cache".into()))?
            .remove(path);
        Ok(())
    }

    fn read_document(&self, path: &Path) -> Result<ConfigDocument, AuthError> {
        debug!(path = %path.display(), "reading configuration file");
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => AuthError::NotFound(path.to_path_buf()),
            _ => AuthError::Io(e),
        })?;
        let document = document::parse_with(BufReader::new(file), self.options)?;
        debug!(
            path = %path.display(),
            profiles = document.profiles.len(),
            delete = if document.delete_after_read { "yes" } else { "no" },
            "configuration parsed"
        );
        Ok(document)
    }

    fn path_lock(&self, path: &Path) -> Result<Arc<Mutex<()>>, AuthError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| AuthError::Lock("config lock table".into()))?;
        Ok(Arc::clone(locks.entry(path.to_path_buf()).or_default()))
    }

    /// Drop the table entry for `path` once no other caller holds or waits on it.
    ///
    /// Clones are only handed out under the table lock, so a count of two
    /// (table + `held`) cannot grow while we look at it.
    fn release_path_lock(&self, path: &Path, held: Arc<Mutex<()>>) -> Result<(), AuthError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| AuthError::Lock("config lock table".into()))?;
        if Arc::strong_count(&held) == 2 {
            locks.remove(path);
        }
        Ok(())
    }

    /// Best-effort removal; failures are logged and swallowed.
    fn delete_config_file(&self, path: &Path) {
        match (self.remove_file)(path) {
            Ok(()) => debug!(path = %path.display(), "deleted configuration file after read"),
            Err(e) => warn!(path = %path.display(), error = %e, "error deleting config file"),
        }
    }

    fn cached(&self, path: &Path, modified: Option<SystemTime>) -> Result<Option<ConfigDocument>, AuthError> {
        if !self.cache_enabled {
            return Ok(None);
        }
        let Some(modified) = modified else {
            return Ok(None);
        };
        let cache = self
            .cache
            .lock()
            .map_err(|_| AuthError::Lock("config cache".into()))?;
        Ok(cache
            .get(path)
            .filter(|entry| entry.modified == modified)
            .map(|entry| entry.document.clone()))
    }

    fn store(&self, path: &Path, modified: SystemTime, document: &ConfigDocument) -> Result<(), AuthError> {
        if !self.cache_enabled {
            return Ok(());
        }
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| AuthError::Lock("config cache".into()))?;
        cache.insert(
            path.to_path_buf(),
            CacheEntry {
                modified,
                document: document.clone(),
            },
        );
        Ok(())
    }
}

fn remove_config_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}
