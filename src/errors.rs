//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Transport noise (malformed lines, stale response ids, over-long lines) is
/// absorbed inside the protocol read loop and never surfaces here; the
/// variants below are the failures a caller can actually observe.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// `start()` was called while the agent process is already attached.
    AlreadyRunning,
    /// A protocol call was attempted with no live agent process.
    NotRunning,
    /// A protocol call was attempted while `stop()` is in progress.
    ShuttingDown,
    /// Transport or framing failure on the agent's stdio streams.
    Acp(String),
    /// The agent answered a request with a JSON-RPC `error` object.
    Protocol(String),
    /// The agent reported a session id as missing or expired.
    SessionNotFound(String),
    /// Operation the upstream protocol deliberately does not provide.
    Unsupported(String),
    /// Session-mapping store read or write failure.
    Persist(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::AlreadyRunning => write!(f, "agent process already running"),
            Self::NotRunning => write!(f, "agent process not running"),
            Self::ShuttingDown => write!(f, "agent connection is shutting down"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::SessionNotFound(msg) => write!(f, "session not found: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Self::Persist(msg) => write!(f, "persist: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
