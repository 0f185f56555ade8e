use std::fmt;

/// Category of a pipeline error. Lets the caller decide what to do with it:
/// refuse to start, let the channel redeliver, or pick an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Required configuration value absent. Permanent, fail at startup.
    ConfigMissing,
    /// Publish/subscribe transport failure.
    ChannelUnavailable,
    /// Message payload cannot be decoded to text.
    InvalidPayload,
    /// External scorer failed, timed out or answered garbage.
    ScoringUnavailable,
    /// Store transaction could not be opened or committed.
    StoreWriteFailed,
    /// Store could not be read (inspection endpoints only).
    StoreReadFailed,
    /// Invocation cancelled or timed out by its trigger.
    Cancelled,
}

impl ErrorKind {
    /// Pipeline stage name used as a structured log field.
    pub fn stage(&self) -> &'static str {
        match self {
            ErrorKind::ConfigMissing => "config",
            ErrorKind::ChannelUnavailable => "publish",
            ErrorKind::InvalidPayload => "decode",
            ErrorKind::ScoringUnavailable => "score",
            ErrorKind::StoreWriteFailed => "persist",
            ErrorKind::StoreReadFailed => "read",
            ErrorKind::Cancelled => "cancel",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ConfigMissing => f.write_str("config missing"),
            ErrorKind::ChannelUnavailable => f.write_str("channel unavailable"),
            ErrorKind::InvalidPayload => f.write_str("invalid payload"),
            ErrorKind::ScoringUnavailable => f.write_str("scoring unavailable"),
            ErrorKind::StoreWriteFailed => f.write_str("store write failed"),
            ErrorKind::StoreReadFailed => f.write_str("store read failed"),
            ErrorKind::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Unified error type for every capability trait and service call.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// Backends pick the kind at the point of failure; `with_context` keeps it.
#[derive(Clone)]
pub struct PipelineError {
    kind: ErrorKind,
    message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn config_missing(key: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigMissing, key)
    }

    pub fn channel_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChannelUnavailable, msg)
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPayload, msg)
    }

    pub fn scoring_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ScoringUnavailable, msg)
    }

    pub fn store_write_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreWriteFailed, msg)
    }

    pub fn store_read_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreReadFailed, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stage(&self) -> &'static str {
        self.kind.stage()
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Debug for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for PipelineError {}

// ---------------------------------------------------------------------------
// From impls: decode failures → InvalidPayload
// ---------------------------------------------------------------------------

impl From<std::str::Utf8Error> for PipelineError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::invalid_payload(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for PipelineError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::invalid_payload(e.to_string())
    }
}

impl From<base64::DecodeError> for PipelineError {
    fn from(e: base64::DecodeError) -> Self {
        Self::invalid_payload(e.to_string())
    }
}
