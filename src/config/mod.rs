//! Configuration management
//!
//! Values are resolved once at startup: environment (`SAVEBOT_*`) over the
//! TOML file over built-in defaults.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::connection::ConnectionConfig;
use crate::retry::{ChatLimitConfig, RetryPolicy};
use crate::{Error, Result};

pub use file::{SavebotConfigFile, config_file_path, load_config_file};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "SAVEBOT_CONFIG";

/// Limits taken from the bot's own client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotLimits {
    /// Longest flood wait the userbot sits out before surfacing the error
    pub flood_sleep_threshold: Duration,
}

impl Default for BotLimits {
    fn default() -> Self {
        Self {
            flood_sleep_threshold: Duration::from_secs(180),
        }
    }
}

/// Retry policy per call shape
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPresets {
    /// Used with `retry_with_backoff`
    pub throwing: RetryPolicy,
    /// Used with `safe_execute`
    pub safe: RetryPolicy,
    /// Used for long message transfers through the userbot
    pub transfer: RetryPolicy,
}

impl Default for RetryPresets {
    fn default() -> Self {
        Self {
            throwing: RetryPolicy::throwing(),
            safe: RetryPolicy::safe(),
            transfer: RetryPolicy::transfer(),
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Admission control for [`ConnectionManager`](crate::ConnectionManager)
    pub connection: ConnectionConfig,
    /// Retry policy for each call shape
    pub retry: RetryPresets,
    /// Per-chat soft limiter used by [`RetryExecutor`](crate::RetryExecutor)
    pub chat_limit: ChatLimitConfig,
    /// Client-side flood-sleep limits
    pub bot: BotLimits,
}

impl Config {
    /// Load configuration from the process environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if the config file is malformed or a value is invalid
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Load configuration using an explicit config file path
    ///
    /// `None` falls back to `~/.config/savebot/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns error if the config file is malformed or a value is invalid
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if an environment value does not parse or the merged
    /// configuration is invalid
    pub fn resolve<L>(fc: SavebotConfigFile, lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = ConnectionConfig::default();

        let connection = ConnectionConfig {
            cache_ttl: env
                .parse("SAVEBOT_CACHE_TTL_SECS")?
                .or(fc.connection.cache_ttl_secs)
                .map_or(defaults.cache_ttl, Duration::from_secs),
            max_concurrent_connections: env
                .parse("SAVEBOT_MAX_CONCURRENT_CONNECTIONS")?
                .or(fc.connection.max_concurrent_connections)
                .unwrap_or(defaults.max_concurrent_connections),
            max_requests_per_minute: env
                .parse("SAVEBOT_MAX_REQUESTS_PER_MINUTE")?
                .or(fc.connection.max_requests_per_minute)
                .unwrap_or(defaults.max_requests_per_minute),
            rate_jitter: fc.connection.rate_jitter.unwrap_or(defaults.rate_jitter),
            min_connection_interval: env
                .parse("SAVEBOT_MIN_CONNECTION_INTERVAL_MS")?
                .or(fc.connection.min_connection_interval_ms)
                .map_or(defaults.min_connection_interval, Duration::from_millis),
            lock_spacing: env
                .parse("SAVEBOT_LOCK_SPACING_MS")?
                .or(fc.connection.lock_spacing_ms)
                .map_or(defaults.lock_spacing, Duration::from_millis),
            edit_cache_capacity: fc
                .connection
                .edit_cache_capacity
                .unwrap_or(defaults.edit_cache_capacity),
            ..defaults
        };

        let bot = BotLimits {
            flood_sleep_threshold: env
                .parse("SAVEBOT_FLOOD_SLEEP_THRESHOLD_SECS")?
                .or(fc.bot.flood_sleep_threshold_secs)
                .map_or(BotLimits::default().flood_sleep_threshold, Duration::from_secs),
        };

        let retry = RetryPresets {
            throwing: overlay(
                RetryPolicy::throwing(),
                &fc.retry.throwing,
                env.parse("SAVEBOT_MAX_RETRIES")?,
            ),
            safe: overlay(
                RetryPolicy::safe(),
                &fc.retry.safe,
                env.parse("SAVEBOT_SAFE_MAX_RETRIES")?,
            ),
            transfer: overlay(
                RetryPolicy::transfer(),
                &fc.retry.transfer,
                env.parse("SAVEBOT_TRANSFER_MAX_RETRIES")?,
            )
            .max_throttle_wait(bot.flood_sleep_threshold),
        };

        let chat_defaults = ChatLimitConfig::default();
        let chat_limit = ChatLimitConfig {
            max_requests: env
                .parse("SAVEBOT_CHAT_MAX_REQUESTS")?
                .or(fc.chat_limit.max_requests)
                .unwrap_or(chat_defaults.max_requests),
            window: fc
                .chat_limit
                .window_secs
                .map_or(chat_defaults.window, Duration::from_secs),
            penalty: fc
                .chat_limit
                .penalty_ms
                .map_or(chat_defaults.penalty, Duration::from_millis),
        };

        let config = Self {
            connection,
            retry,
            chat_limit,
            bot,
        };
        config.validate()?;

        Ok(config)
    }

    /// Reject values the resilience core cannot work with
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first offending value
    pub fn validate(&self) -> Result<()> {
        if self.connection.max_requests_per_minute == 0 {
            return Err(Error::Config(
                "max_requests_per_minute must be at least 1".to_string(),
            ));
        }
        if self.connection.edit_cache_capacity == 0 {
            return Err(Error::Config(
                "edit_cache_capacity must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.connection.rate_jitter) {
            return Err(Error::Config(format!(
                "rate_jitter must be in [0, 1), got {}",
                self.connection.rate_jitter
            )));
        }
        if self.chat_limit.max_requests == 0 {
            return Err(Error::Config(
                "chat_limit.max_requests must be at least 1".to_string(),
            ));
        }

        for (shape, policy) in [
            ("throwing", &self.retry.throwing),
            ("safe", &self.retry.safe),
            ("transfer", &self.retry.transfer),
        ] {
            if !(0.0..1.0).contains(&policy.jitter) {
                return Err(Error::Config(format!(
                    "retry.{shape}.jitter must be in [0, 1), got {}",
                    policy.jitter
                )));
            }
            if policy.base_delay > policy.max_delay {
                return Err(Error::Config(format!(
                    "retry.{shape}: base delay exceeds max delay"
                )));
            }
        }

        Ok(())
    }
}

/// Environment lookup with typed parsing
struct Env<L>(L);

impl<L: Fn(&str) -> Option<String>> Env<L> {
    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = (self.0)(key) else {
            return Ok(None);
        };

        raw.trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key}: cannot parse {raw:?}")))
    }
}

fn overlay(
    base: RetryPolicy,
    fc: &file::PolicyFileConfig,
    env_max_retries: Option<u32>,
) -> RetryPolicy {
    let mut policy = base;
    if let Some(n) = env_max_retries.or(fc.max_retries) {
        policy = policy.max_retries(n);
    }
    if let Some(ms) = fc.base_delay_ms {
        policy = policy.base_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = fc.max_delay_ms {
        policy = policy.max_delay(Duration::from_millis(ms));
    }
    if let Some(ratio) = fc.jitter {
        policy = policy.jitter(ratio);
    }
    policy
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn parse_file(toml: &str) -> SavebotConfigFile {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::resolve(SavebotConfigFile::default(), env(&[])).unwrap();

        assert_eq!(config.connection.max_requests_per_minute, 15);
        assert_eq!(config.connection.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.retry.throwing.max_retries, 5);
        assert_eq!(config.retry.safe.max_delay, Duration::from_secs(30));
        assert_eq!(config.chat_limit.max_requests, 20);
        assert_eq!(
            config.retry.transfer.max_throttle_wait,
            Some(Duration::from_secs(180))
        );
        assert_eq!(config.retry.throwing.max_throttle_wait, None);
    }

    #[test]
    fn file_overrides_defaults() {
        let fc = parse_file(
            r"
[connection]
cache_ttl_secs = 60
lock_spacing_ms = 0

[retry.throwing]
max_retries = 2
base_delay_ms = 250
",
        );
        let config = Config::resolve(fc, env(&[])).unwrap();

        assert_eq!(config.connection.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.connection.lock_spacing, Duration::ZERO);
        assert_eq!(config.retry.throwing.max_retries, 2);
        assert_eq!(config.retry.throwing.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.safe.max_retries, 3);
    }

    #[test]
    fn env_overrides_file() {
        let fc = parse_file("[connection]\nmax_requests_per_minute = 10\n[bot]\nflood_sleep_threshold_secs = 30");
        let config = Config::resolve(
            fc,
            env(&[
                ("SAVEBOT_MAX_REQUESTS_PER_MINUTE", "5"),
                ("SAVEBOT_FLOOD_SLEEP_THRESHOLD_SECS", "90"),
            ]),
        )
        .unwrap();

        assert_eq!(config.connection.max_requests_per_minute, 5);
        assert_eq!(config.bot.flood_sleep_threshold, Duration::from_secs(90));
        assert_eq!(
            config.retry.transfer.max_throttle_wait,
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn unparsable_env_is_an_error() {
        let err = Config::resolve(
            SavebotConfigFile::default(),
            env(&[("SAVEBOT_MAX_RETRIES", "many")]),
        )
        .unwrap_err();

        assert!(err.to_string().contains("SAVEBOT_MAX_RETRIES"));
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        let err = Config::resolve(
            SavebotConfigFile::default(),
            env(&[("SAVEBOT_MAX_REQUESTS_PER_MINUTE", "0")]),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn inverted_delays_are_rejected() {
        let fc = parse_file("[retry.safe]\nbase_delay_ms = 60000\nmax_delay_ms = 1000");
        assert!(Config::resolve(fc, env(&[])).is_err());
    }
}
