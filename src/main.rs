//! userfiles-auth — look up the connection profiles a request identity may use.
//!
//! Usage: `userfiles-auth [--config PATH] [USERNAME] [IDENT]`
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Init logger at default level
//!   3. Load provider config
//!   4. Resolve and load the identity's config file
//!   5. Print the profiles as JSON

use std::env;

use tracing::{info, warn};

use userfiles_auth::{Availability, AuthError, Identity, ProfileLoader, config, logger};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AuthError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let mut config_path = None;
    let mut positional = Vec::new();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = Some(
                args.next()
                    .ok_or_else(|| AuthError::Config("--config requires a path".into()))?,
            );
        } else {
            positional.push(arg);
        }
    }

    let config = config::load(config_path.as_deref())?;
    logger::init(&config.log_level)?;

    info!(
        home_dir = %config.home_dir.display(),
        cache = config.cache_enabled,
        "config loaded"
    );

    let mut positional = positional.into_iter();
    let identity = Identity::new(
        positional.next().unwrap_or_default(),
        positional.next().unwrap_or_default(),
    );

    let loader = ProfileLoader::new(&config);
    match loader.load(&identity)? {
        Availability::Available(profiles) => {
            let json = serde_json::to_string_pretty(&*profiles)
                .map_err(|e| AuthError::Config(format!("cannot render profiles: {e}")))?;
            println!("{json}");
        }
        Availability::Expired { path, valid_to } => {
            warn!(path = %path.display(), "configuration expired");
            eprintln!("✗ {} expired at {}", path.display(), valid_to.to_rfc3339());
        }
        Availability::Missing(path) => {
            eprintln!("✗ no configuration at {}", path.display());
        }
    }

    Ok(())
}
