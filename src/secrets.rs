//! API key lookup
//!
//! The key is read once at startup from a TOML secrets file, falling back to
//! the process environment, and then handed to the gateway as an explicit
//! value.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fixed lookup key for the Gemini API key
pub const API_KEY_NAME: &str = "GEMINI_API_KEY";

/// Values that were copied from setup docs and never replaced
const PLACEHOLDER_KEYS: &[&str] = &["YOUR_ACTUAL_API_KEY", "YOUR_API_KEY"];

/// The API key. Read-only, never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw key, for the request header only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Missing or unusable configuration. Fatal for a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "{key} not found in {searched}. Create a secrets.toml file containing \
         {key} = \"<your key>\" or export {key}."
    )]
    Missing { key: String, searched: String },
    #[error("{key} is still set to a placeholder value. Replace it with your real API key.")]
    Placeholder { key: String },
    #[error("Cannot read secrets file {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
    #[error("Secrets file {path} is not valid TOML: {message}")]
    Malformed { path: PathBuf, message: String },
    #[error("Failed to initialize HTTP client: {0}")]
    Client(String),
}

/// A source of secret values
pub trait SecretStore: Send + Sync {
    /// Look up a value. `Ok(None)` means the store simply doesn't have it.
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError>;

    /// Human-readable location, used in error messages
    fn describe(&self) -> String;
}

/// `secrets.toml` style file with top-level string keys
pub struct FileSecrets {
    path: PathBuf,
}

impl FileSecrets {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Option<HashMap<String, toml::Value>>, ConfigError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::Unreadable {
                    path: self.path.clone(),
                    message: e.to_string(),
                })
            }
        };

        toml::from_str(&content)
            .map(Some)
            .map_err(|e| ConfigError::Malformed {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }
}

impl SecretStore for FileSecrets {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let Some(table) = self.load()? else {
            return Ok(None);
        };
        match table.get(key) {
            Some(toml::Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ConfigError::Malformed {
                path: self.path.clone(),
                message: format!("{key} must be a string"),
            }),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Process environment
pub struct EnvSecrets;

impl SecretStore for EnvSecrets {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        Ok(std::env::var(key).ok())
    }

    fn describe(&self) -> String {
        "the environment".to_string()
    }
}

/// Look up the API key in each store in order; the first hit wins.
pub fn load_credential(stores: &[&dyn SecretStore]) -> Result<Credential, ConfigError> {
    for store in stores {
        if let Some(value) = store.get(API_KEY_NAME)? {
            let trimmed = value.trim();
            if trimmed.is_empty() || PLACEHOLDER_KEYS.contains(&trimmed) {
                return Err(ConfigError::Placeholder {
                    key: API_KEY_NAME.to_string(),
                });
            }
            tracing::info!(source = %store.describe(), "Loaded API key");
            return Ok(Credential::new(trimmed));
        }
    }

    Err(ConfigError::Missing {
        key: API_KEY_NAME.to_string(),
        searched: stores
            .iter()
            .map(|s| s.describe())
            .collect::<Vec<_>>()
            .join(" or "),
    })
}

/// Default lookup order: the secrets file, then the environment
pub fn load_default_credential(secrets_path: &Path) -> Result<Credential, ConfigError> {
    let file = FileSecrets::new(secrets_path);
    load_credential(&[&file, &EnvSecrets])
}
