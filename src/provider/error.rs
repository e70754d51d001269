//! Provider error taxonomy
//!
//! Every error coming back from the messaging client is reduced to an
//! [`ErrorKind`] before the retry executor decides what to do with it.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// How a provider failure must be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Provider told us to stay quiet for this long (Telegram `FLOOD_WAIT_X`)
    ServerThrottle(Duration),
    /// Connectivity failure
    TransientNetwork,
    /// RPC-level failure not covered by any other kind
    TransientProtocol,
    /// Mutation rejected because nothing changed
    NoOp,
    /// Permission, authorization or malformed request
    ClientFatal,
    /// Anything else
    Unclassified,
    /// A local deadline expired
    Timeout,
}

impl ErrorKind {
    /// Whether this kind consumes the bounded retry budget
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::TransientNetwork | Self::TransientProtocol | Self::Timeout
        )
    }

    /// Short label used in log fields
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ServerThrottle(_) => "server_throttle",
            Self::TransientNetwork => "network",
            Self::TransientProtocol => "rpc",
            Self::NoOp => "not_modified",
            Self::ClientFatal => "client",
            Self::Unclassified => "unexpected",
            Self::Timeout => "timeout",
        }
    }
}

/// Map an error onto the provider taxonomy
pub trait Classify {
    /// Classification of this error
    fn kind(&self) -> ErrorKind;
}

/// A local deadline set by [`run_with_timeout`](crate::retry::run_with_timeout) expired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation timed out after {after:?}")]
pub struct TimedOut {
    /// The deadline that was exceeded
    pub after: Duration,
}

impl Classify for TimedOut {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Timeout
    }
}

/// Errors raised by the messaging client collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Flood control: wait `seconds` before the next call
    #[error("flood wait of {seconds}s requested")]
    FloodWait {
        /// Server-mandated wait in seconds
        seconds: u64,
    },

    /// Connection reset, DNS failure, socket timeout
    #[error("network error: {0}")]
    Network(String),

    /// Unclassified RPC error
    #[error("rpc error {code}: {name}")]
    Rpc {
        /// Numeric RPC/HTTP code
        code: i32,
        /// Error name or description
        name: String,
    },

    /// Edit rejected because the content is unchanged
    #[error("message is not modified")]
    NotModified,

    /// Malformed request
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Session is not authorized
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks permission in the target chat
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Local deadline expired
    #[error(transparent)]
    TimedOut(#[from] TimedOut),

    /// Anything else
    #[error("unexpected provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Build from an MTProto RPC error (`code`, upper-case `name`)
    ///
    /// Recognises the `*_WAIT_<seconds>` family as flood control and
    /// `MESSAGE_NOT_MODIFIED` as a no-op before falling back on the code.
    #[must_use]
    pub fn from_rpc(code: i32, name: &str) -> Self {
        if let Some(seconds) = parse_wait_seconds(name) {
            return Self::FloodWait { seconds };
        }

        if name == "MESSAGE_NOT_MODIFIED" {
            return Self::NotModified;
        }

        match code {
            400 => Self::BadRequest(name.to_string()),
            401 => Self::Unauthorized(name.to_string()),
            403 => Self::Forbidden(name.to_string()),
            _ => Self::Rpc {
                code,
                name: name.to_string(),
            },
        }
    }

    /// Build from a Bot API HTTP response
    ///
    /// The body is the raw JSON Telegram returns on failure
    /// (`{"ok":false,"description":...,"parameters":{"retry_after":N}}`).
    #[must_use]
    pub fn from_bot_api(status: u16, body: &str) -> Self {
        let description = parse_description(body).unwrap_or_else(|| body.to_string());
        let lower = description.to_lowercase();

        if lower.contains("message is not modified") {
            return Self::NotModified;
        }

        if status == 429
            && let Some(retry_after) = parse_retry_after(body)
        {
            return Self::FloodWait {
                seconds: retry_after.as_secs(),
            };
        }

        match status {
            400 => Self::BadRequest(description),
            401 => Self::Unauthorized(description),
            403 => Self::Forbidden(description),
            429 | 500..=599 => Self::Rpc {
                code: i32::from(status),
                name: description,
            },
            _ if lower.contains("connection reset")
                || lower.contains("timed out")
                || lower.contains("dns error") =>
            {
                Self::Network(description)
            }
            _ => Self::Other(description),
        }
    }
}

impl Classify for ProviderError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::FloodWait { seconds } => ErrorKind::ServerThrottle(Duration::from_secs(*seconds)),
            Self::Network(_) => ErrorKind::TransientNetwork,
            Self::Rpc { .. } => ErrorKind::TransientProtocol,
            Self::NotModified => ErrorKind::NoOp,
            Self::BadRequest(_) | Self::Unauthorized(_) | Self::Forbidden(_) => {
                ErrorKind::ClientFatal
            }
            Self::TimedOut(_) => ErrorKind::Timeout,
            Self::Other(_) => ErrorKind::Unclassified,
        }
    }
}

impl Classify for io::Error {
    fn kind(&self) -> ErrorKind {
        match io::Error::kind(self) {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ErrorKind::TransientNetwork,
            io::ErrorKind::PermissionDenied => ErrorKind::ClientFatal,
            _ => ErrorKind::Unclassified,
        }
    }
}

/// Parse `FLOOD_WAIT_30`, `SLOWMODE_WAIT_10`, `FLOOD_PREMIUM_WAIT_5`
fn parse_wait_seconds(name: &str) -> Option<u64> {
    let (prefix, seconds) = name.rsplit_once('_')?;
    let known = prefix.contains("FLOOD") || prefix.starts_with("SLOWMODE");
    if !known || !prefix.ends_with("WAIT") {
        return None;
    }
    seconds.parse().ok()
}

/// Extract `parameters.retry_after` from a Bot API error body
fn parse_retry_after(body: &str) -> Option<Duration> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let secs = v.get("parameters")?.get("retry_after")?.as_u64()?;

    Some(Duration::from_secs(secs))
}

/// Extract the human-readable `description` from a Bot API error body
fn parse_description(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v.get("description")?.as_str().map(ToString::to_string)
}
