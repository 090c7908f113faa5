// Library root — the binary entry point is src/main.rs.

pub mod config;
pub mod document;
pub mod error;
pub mod identity;
pub mod loader;
pub mod logger;
pub mod provider;
pub mod resolver;
pub mod token;
pub mod writer;

pub use document::{ConfigDocument, ConnectionProfile, ProfileSet};
pub use error::AuthError;
pub use identity::Identity;
pub use loader::{Availability, ProfileLoader};
pub use provider::{AuthenticatedUser, Credentials, UserFilesProvider};
