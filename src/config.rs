// Process configuration, read once at startup.

use std::env;
use std::time::Duration;

use crate::constants;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is not set; export it or add it to .env")]
    MissingApiKey,
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings for the completion service.
#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Number of previous turns sent along with each new message.
    pub history_window: usize,
    pub request_timeout: Duration,
    /// Upper bound on transcripts kept in memory; the least recently used one goes first.
    pub max_sessions: usize,
    /// Idle time after which a session's transcript is dropped.
    pub session_ttl: Duration,
}

// Keep the API key out of debug logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("history_window", &self.history_window)
            .field("request_timeout", &self.request_timeout)
            .field("max_sessions", &self.max_sessions)
            .field("session_ttl", &self.session_ttl)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let base_url = lookup("OPENAI_BASE_URL")
            .unwrap_or_else(|| constants::DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = lookup("TUNECHAT_MODEL").unwrap_or_else(|| constants::DEFAULT_MODEL.to_string());

        let history_window = parse_or(
            &lookup,
            "TUNECHAT_HISTORY_WINDOW",
            constants::DEFAULT_HISTORY_WINDOW,
        )?;
        let timeout_secs: u64 = parse_or(
            &lookup,
            "TUNECHAT_REQUEST_TIMEOUT_SECS",
            constants::DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let max_sessions: usize = parse_or(
            &lookup,
            "TUNECHAT_MAX_SESSIONS",
            constants::DEFAULT_MAX_SESSIONS,
        )?;
        let ttl_secs: u64 = parse_or(
            &lookup,
            "TUNECHAT_SESSION_TTL_SECS",
            constants::DEFAULT_SESSION_TTL_SECS,
        )?;
        at_least_one("TUNECHAT_REQUEST_TIMEOUT_SECS", timeout_secs)?;
        at_least_one("TUNECHAT_MAX_SESSIONS", max_sessions as u64)?;
        at_least_one("TUNECHAT_SESSION_TTL_SECS", ttl_secs)?;

        Ok(Self {
            api_key,
            base_url,
            model,
            history_window,
            request_timeout: Duration::from_secs(timeout_secs),
            max_sessions,
            session_ttl: Duration::from_secs(ttl_secs),
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn at_least_one(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}
