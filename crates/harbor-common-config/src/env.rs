//! Environment variable handling.

use std::env;
use thiserror::Error;

/// Environment variable errors.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("failed to load {file}: {source}")]
    DotenvError {
        file: String,
        #[source]
        source: dotenvy::Error,
    },
}

/// Environment variable names.
pub mod vars {
    // Database
    pub const MONGODB_URI: &str = "MONGODB_URI";
    pub const ALLOW_IN_MEMORY_DB: &str = "ALLOW_IN_MEMORY_DB";
    pub const MONGOD_BINARY: &str = "MONGOD_BINARY";

    // Logging
    pub const HARBOR_LOG_LEVEL: &str = "HARBOR_LOG_LEVEL";
    pub const HARBOR_LOG_FORMAT: &str = "HARBOR_LOG_FORMAT";
    pub const HARBOR_LOG_FILE: &str = "HARBOR_LOG_FILE";
    pub const HARBOR_LOG_SOURCE: &str = "HARBOR_LOG_SOURCE";

    // Deployment
    pub const HARBOR_ENV: &str = "HARBOR_ENV";
    pub const RUST_LOG: &str = "RUST_LOG";
}

/// Environment configuration.
pub struct Environment {
    _guard: (), // Prevent construction outside module
}

impl Environment {
    /// Initialize environment from .env files.
    ///
    /// Missing files are skipped; a file that exists but cannot be parsed is
    /// an error.
    pub fn init() -> Result<Self, EnvError> {
        // Load .env files in order (later overrides earlier)
        load(".env")?;
        load(".env.local")?;

        if let Some(env) = Self::get(vars::HARBOR_ENV) {
            load(&format!(".env.{}", env))?;
        }

        Ok(Self { _guard: () })
    }

    /// Get an optional string variable.
    pub fn get(var: &str) -> Option<String> {
        env::var(var).ok()
    }
}

fn load(file: &str) -> Result<(), EnvError> {
    match dotenvy::from_filename(file) {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(source) => Err(EnvError::DotenvError {
            file: file.to_string(),
            source,
        }),
    }
}

/// Treat an empty or blank value as unset.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Any value other than the literal `"false"` (including unset) enables the flag.
pub fn flag_enabled(value: Option<&str>) -> bool {
    value != Some("false")
}

/// Opt-in flag: `true`, `1` or `yes`, case-insensitive.
pub fn truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}
