//! TOML configuration file loading
//!
//! Supports `~/.config/savebot/config.toml` (or `$SAVEBOT_CONFIG`) as a
//! persistent config source. All fields are optional: the file is a partial
//! overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SavebotConfigFile {
    /// Per-resource admission control
    #[serde(default)]
    pub connection: ConnectionFileConfig,

    /// Retry policies by call shape
    #[serde(default)]
    pub retry: RetryFileConfig,

    /// Per-chat soft limiter
    #[serde(default)]
    pub chat_limit: ChatLimitFileConfig,

    /// Limits inherited from the bot's own client settings
    #[serde(default)]
    pub bot: BotFileConfig,
}

/// `[connection]` section
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionFileConfig {
    /// Cached message lifetime in seconds
    pub cache_ttl_secs: Option<u64>,
    /// Active holders per key before a warning is logged
    pub max_concurrent_connections: Option<usize>,
    /// Admissions per key per minute
    pub max_requests_per_minute: Option<usize>,
    /// Jitter ratio on rate-limit waits
    pub rate_jitter: Option<f64>,
    /// Minimum spacing between accesses to one key, in milliseconds
    pub min_connection_interval_ms: Option<u64>,
    /// Pause after taking a key's lock, in milliseconds
    pub lock_spacing_ms: Option<u64>,
    /// Messages remembered for edit suppression
    pub edit_cache_capacity: Option<usize>,
}

/// `[retry]` section, one table per call shape
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryFileConfig {
    #[serde(default)]
    pub throwing: PolicyFileConfig,
    #[serde(default)]
    pub safe: PolicyFileConfig,
    #[serde(default)]
    pub transfer: PolicyFileConfig,
}

/// `[retry.<shape>]` table
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyFileConfig {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<f64>,
}

/// `[chat_limit]` section
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatLimitFileConfig {
    pub max_requests: Option<u32>,
    pub window_secs: Option<u64>,
    pub penalty_ms: Option<u64>,
}

/// `[bot]` section
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotFileConfig {
    /// Longest flood wait the userbot sits out, in seconds
    pub flood_sleep_threshold_secs: Option<u64>,
}

/// Load the TOML config file from `path`, if given, or the standard path
///
/// A missing file yields `SavebotConfigFile::default()`.
///
/// # Errors
///
/// Returns error if the file exists but cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<SavebotConfigFile> {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return Ok(SavebotConfigFile::default());
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(SavebotConfigFile::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");

    Ok(config)
}

/// Return the config file path: `~/.config/savebot/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("savebot").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_config_file(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(fc.connection.cache_ttl_secs.is_none());
        assert!(fc.retry.safe.max_retries.is_none());
    }

    #[test]
    fn partial_file_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r"
[connection]
max_requests_per_minute = 10

[retry.safe]
max_retries = 1

[bot]
flood_sleep_threshold_secs = 60
"
        )
        .unwrap();

        let fc = load_config_file(Some(file.path())).unwrap();
        assert_eq!(fc.connection.max_requests_per_minute, Some(10));
        assert_eq!(fc.connection.cache_ttl_secs, None);
        assert_eq!(fc.retry.safe.max_retries, Some(1));
        assert_eq!(fc.retry.throwing.max_retries, None);
        assert_eq!(fc.bot.flood_sleep_threshold_secs, Some(60));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nmax_requests_per_minute = \"lots\"").unwrap();

        let err = load_config_file(Some(file.path())).unwrap_err();
        assert!(matches!(err, crate::Error::Toml(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\ncache_ttl = 5").unwrap();

        assert!(load_config_file(Some(file.path())).is_err());
    }
}
