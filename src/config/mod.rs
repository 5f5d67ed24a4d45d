//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Sensitive values wrapped in secrecy::SecretString to prevent
//! log leaks.

pub mod secrets;

use std::time::Duration;

use crate::db::DEFAULT_CONFLICT_RETRIES;
use crate::engine::DEFAULT_RESET_INTERVAL;
use crate::error::{Error, Result};
use secrets::SecretString;

pub const DEFAULT_MATCHER_MODEL: &str = "claude-3-5-haiku-latest";

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Enables the LLM task matcher when set.
    pub anthropic_api_key: Option<SecretString>,
    pub matcher_model: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// How often the external trigger should run the daily reset.
    pub reset_interval: Duration,
    /// Default bound on each store call. None waits indefinitely.
    pub store_timeout: Option<Duration>,
    pub conflict_retries: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| {
                Error::Config(format!("required environment variable {name} is not set"))
            })
        };

        let reset_interval = match parse_var::<u64>(&lookup, "RESET_INTERVAL_SECS")? {
            Some(0) => {
                return Err(Error::Config(
                    "RESET_INTERVAL_SECS must be greater than zero".to_string(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_RESET_INTERVAL,
        };

        Ok(Self {
            database_url: SecretString::from(required("DATABASE_URL")?),
            anthropic_api_key: lookup("ANTHROPIC_API_KEY").map(SecretString::from),
            matcher_model: lookup("MATCHER_MODEL")
                .unwrap_or_else(|| DEFAULT_MATCHER_MODEL.to_string()),
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            reset_interval,
            store_timeout: parse_var::<u64>(&lookup, "STORE_TIMEOUT_MS")?
                .map(Duration::from_millis),
            conflict_retries: parse_var(&lookup, "LEDGER_CONFLICT_RETRIES")?
                .unwrap_or(DEFAULT_CONFLICT_RETRIES),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("invalid {name}={raw:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap();
        assert_eq!(config.database_url.expose_secret(), "postgres://x");
        assert_eq!(config.reset_interval, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.store_timeout, None);
        assert_eq!(config.conflict_retries, DEFAULT_CONFLICT_RETRIES);
        assert!(config.anthropic_api_key.is_none());
        assert_eq!(config.matcher_model, DEFAULT_MATCHER_MODEL);
    }

    #[test]
    fn numeric_overrides_parse() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("RESET_INTERVAL_SECS", "3600"),
            ("STORE_TIMEOUT_MS", "250"),
            ("LEDGER_CONFLICT_RETRIES", "2"),
        ]))
        .unwrap();
        assert_eq!(config.reset_interval, Duration::from_secs(3600));
        assert_eq!(config.store_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.conflict_retries, 2);
    }

    #[test]
    fn malformed_number_is_config_error() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("STORE_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_reset_interval_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("RESET_INTERVAL_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
