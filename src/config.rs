//! Environment-based configuration, loaded once at startup.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::completion;
use crate::image;
use crate::posting::{self, Credentials};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// A required environment variable is missing or empty.
    MissingVar(&'static str),
    /// A variable is set but does not parse or validate.
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVar(key) => {
                write!(f, "missing required environment variable {key}")
            }
            Self::InvalidValue { key, value, expected } => {
                write!(f, "invalid value '{value}' for {key}: expected {expected}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

pub struct Config {
    pub completion_api_key: String,
    pub completion_base_url: String,
    pub telegram_bot_token: String,
    pub posting: Credentials,
    /// Optional: absent key disables image generation only.
    pub image_api_key: Option<String>,
    pub image_base_url: String,
    pub daily_post_limit: u32,
    pub post_interval: Duration,
    pub listen_port: u16,
    pub history_capacity: usize,
    /// Jaccard rejection threshold for the uniqueness filter.
    pub similarity_threshold: f64,
    pub relay_context_depth: usize,
    /// Optional directory for the log file; stdout-only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Build from any key→value source. Tests pass a map; production passes
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let telegram_bot_token = require(&lookup, "TELEGRAM_BOT_TOKEN")?;
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2
            || token_parts[0].parse::<u64>().is_err()
            || token_parts[1].is_empty()
        {
            return Err(ConfigError::InvalidValue {
                key: "TELEGRAM_BOT_TOKEN",
                value: telegram_bot_token,
                expected: "format 123456789:ABCdefGHI...",
            });
        }

        let daily_post_limit: u32 = parse_or(&lookup, "DAILY_POST_LIMIT", 80)?;
        if daily_post_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DAILY_POST_LIMIT",
                value: "0".into(),
                expected: "a positive post count",
            });
        }

        let interval_secs: u64 = parse_or(&lookup, "POST_INTERVAL_SECS", 1080)?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "POST_INTERVAL_SECS",
                value: "0".into(),
                expected: "a positive interval in seconds",
            });
        }

        let similarity_threshold: f64 = parse_or(&lookup, "SIMILARITY_THRESHOLD", 0.3)?;
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "SIMILARITY_THRESHOLD",
                value: similarity_threshold.to_string(),
                expected: "a fraction in [0, 1]",
            });
        }

        Ok(Self {
            completion_api_key: require(&lookup, "DEEPSEEK_API_KEY")?,
            completion_base_url: lookup("DEEPSEEK_BASE_URL")
                .unwrap_or_else(|| completion::DEFAULT_BASE_URL.to_string()),
            telegram_bot_token,
            posting: posting_credentials_from_lookup(&lookup)?,
            image_api_key: lookup("IMAGE_API_KEY").filter(|v| !v.is_empty()),
            image_base_url: lookup("IMAGE_BASE_URL")
                .unwrap_or_else(|| image::DEFAULT_BASE_URL.to_string()),
            daily_post_limit,
            post_interval: Duration::from_secs(interval_secs),
            listen_port: parse_or(&lookup, "LISTEN_PORT", 5000)?,
            history_capacity: parse_or(&lookup, "POST_HISTORY_CAPACITY", 150)?,
            similarity_threshold,
            relay_context_depth: parse_or(&lookup, "RELAY_CONTEXT_DEPTH", 10)?,
            log_dir: lookup("LOG_DIR").filter(|v| !v.is_empty()).map(PathBuf::from),
        })
    }

    pub fn posting_base_url(&self) -> String {
        posting::DEFAULT_BASE_URL.to_string()
    }
}

/// Posting credentials alone, re-read when the scheduler hits an
/// authorization failure.
pub fn posting_credentials_from_env() -> Result<Credentials, ConfigError> {
    posting_credentials_from_lookup(&env_lookup)
}

fn posting_credentials_from_lookup<F>(lookup: &F) -> Result<Credentials, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(Credentials {
        api_key: require(lookup, "X_API_KEY")?,
        api_secret: require(lookup, "X_API_SECRET")?,
        access_token: require(lookup, "X_ACCESS_TOKEN")?,
        access_secret: require(lookup, "X_ACCESS_TOKEN_SECRET")?,
    })
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn require<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingVar(key))
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) if value.is_empty() => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value,
            expected: "a number",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DEEPSEEK_API_KEY", "sk-test"),
            ("TELEGRAM_BOT_TOKEN", "123456789:ABCdefGHIjklMNOpqrsTUVwxyz"),
            ("X_API_KEY", "xk"),
            ("X_API_SECRET", "xs"),
            ("X_ACCESS_TOKEN", "xt"),
            ("X_ACCESS_TOKEN_SECRET", "xts"),
        ])
    }

    fn load(vars: HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    fn assert_err(result: Result<Config, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load(base_vars()).expect("should load");
        assert_eq!(config.daily_post_limit, 80);
        assert_eq!(config.post_interval, Duration::from_secs(1080));
        assert_eq!(config.listen_port, 5000);
        assert_eq!(config.history_capacity, 150);
        assert_eq!(config.relay_context_depth, 10);
        assert!((config.similarity_threshold - 0.3).abs() < 1e-9);
        assert!(config.image_api_key.is_none());
        assert!(config.log_dir.is_none());
        assert_eq!(config.completion_base_url, completion::DEFAULT_BASE_URL);
    }

    #[test]
    fn test_missing_completion_key_fails_fast() {
        let mut vars = base_vars();
        vars.remove("DEEPSEEK_API_KEY");
        let err = assert_err(load(vars));
        assert!(matches!(err, ConfigError::MissingVar("DEEPSEEK_API_KEY")));
    }

    #[test]
    fn test_missing_posting_secret_fails_fast() {
        let mut vars = base_vars();
        vars.remove("X_ACCESS_TOKEN_SECRET");
        let err = assert_err(load(vars));
        assert!(err.to_string().contains("X_ACCESS_TOKEN_SECRET"));
    }

    #[test]
    fn test_empty_required_value_counts_as_missing() {
        let mut vars = base_vars();
        vars.insert("DEEPSEEK_API_KEY", "");
        let err = assert_err(load(vars));
        assert!(matches!(err, ConfigError::MissingVar(_)));
    }

    #[test]
    fn test_invalid_telegram_token_format() {
        let mut vars = base_vars();
        vars.insert("TELEGRAM_BOT_TOKEN", "not-a-token");
        let err = assert_err(load(vars));
        assert!(matches!(err, ConfigError::InvalidValue { key: "TELEGRAM_BOT_TOKEN", .. }));
    }

    #[test]
    fn test_overrides_are_applied() {
        let mut vars = base_vars();
        vars.insert("DAILY_POST_LIMIT", "40");
        vars.insert("POST_INTERVAL_SECS", "1800");
        vars.insert("SIMILARITY_THRESHOLD", "0.25");
        vars.insert("LISTEN_PORT", "8080");
        let config = load(vars).expect("should load");
        assert_eq!(config.daily_post_limit, 40);
        assert_eq!(config.post_interval, Duration::from_secs(1800));
        assert!((config.similarity_threshold - 0.25).abs() < 1e-9);
        assert_eq!(config.listen_port, 8080);
    }

    #[test]
    fn test_unparseable_number_is_rejected() {
        let mut vars = base_vars();
        vars.insert("DAILY_POST_LIMIT", "eighty");
        let err = assert_err(load(vars));
        assert!(matches!(err, ConfigError::InvalidValue { key: "DAILY_POST_LIMIT", .. }));
    }

    #[test]
    fn test_zero_limit_and_interval_are_rejected() {
        let mut vars = base_vars();
        vars.insert("DAILY_POST_LIMIT", "0");
        assert!(matches!(assert_err(load(vars)), ConfigError::InvalidValue { .. }));

        let mut vars = base_vars();
        vars.insert("POST_INTERVAL_SECS", "0");
        assert!(matches!(assert_err(load(vars)), ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_threshold_out_of_range_is_rejected() {
        let mut vars = base_vars();
        vars.insert("SIMILARITY_THRESHOLD", "1.5");
        let err = assert_err(load(vars));
        assert!(matches!(err, ConfigError::InvalidValue { key: "SIMILARITY_THRESHOLD", .. }));
    }

    #[test]
    fn test_image_key_is_optional_and_degrades_cleanly() {
        let mut vars = base_vars();
        vars.insert("IMAGE_API_KEY", "img-key");
        let config = load(vars).expect("should load");
        assert_eq!(config.image_api_key.as_deref(), Some("img-key"));
    }
}
