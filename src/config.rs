//! Process configuration from environment variables

use crate::llm::{GeminiConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_SECRETS_PATH: &str = "secrets.toml";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
const DEFAULT_MAX_UPLOAD_MB: usize = 20;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub secrets_path: PathBuf,
    pub model: String,
    pub gemini_base_url: String,
    pub request_timeout: Duration,
    pub session_ttl: Duration,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            port: parse_or(&lookup, "CHAT_PORT", DEFAULT_PORT),
            secrets_path: PathBuf::from(text("CHAT_SECRETS_PATH", DEFAULT_SECRETS_PATH)),
            model: text("CHAT_MODEL", DEFAULT_MODEL),
            gemini_base_url: text("GEMINI_BASE_URL", DEFAULT_BASE_URL),
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "CHAT_REQUEST_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )),
            session_ttl: Duration::from_secs(parse_or(
                &lookup,
                "CHAT_SESSION_TTL_SECS",
                DEFAULT_SESSION_TTL_SECS,
            )),
            max_upload_bytes: parse_or(&lookup, "CHAT_MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB)
                .saturating_mul(1024 * 1024),
        }
    }

    pub fn gemini(&self) -> GeminiConfig {
        GeminiConfig {
            model: self.model.clone(),
            base_url: self.gemini_base_url.clone(),
            timeout: self.request_timeout,
        }
    }
}

/// Parse a numeric setting. Zero and garbage fall back to the default.
fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + PartialEq + Default + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => value,
        _ => {
            tracing::warn!(key, value = %raw, default = %default, "Invalid setting, using default");
            default
        }
    }
}
