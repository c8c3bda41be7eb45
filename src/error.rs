//! # Shared Error Types
//!
//! Library-internal error enums, following the teacher's convention of using
//! `thiserror` for typed errors at module boundaries and reserving `anyhow`
//! for the binary's top-level `main`.

use thiserror::Error;

/// Returned when looking up a severity or facility by name that doesn't exist.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("not a designated priority: {0}")]
pub struct PriorityError(pub String);

/// Returned by the test-only packet parser when a rendered line cannot be
/// parsed back into a [`crate::packet::Packet`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketParseError {
    #[error("missing header/message separator \" - - - \"")]
    MissingSeparator,
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("malformed priority: {0}")]
    MalformedPriority(String),
    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),
}

/// Errors raised by the [`crate::transport::Transport`] while dialing,
/// writing, or watching the connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to dial {protocol} destination {addr}: {source}")]
    Dial {
        protocol: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("write to {protocol} connection failed: {source}")]
    Write {
        protocol: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("write to {protocol} connection timed out after {0:?}", .timeout)]
    WriteTimeout {
        protocol: &'static str,
        timeout: std::time::Duration,
    },
    #[error("connection watcher observed a broken {protocol} connection: {source}")]
    Watcher {
        protocol: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Errors surfaced while resolving a fully-merged [`crate::config::Config`]
/// from CLI flags, an optional YAML file, and the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid destination protocol {0:?}, expected one of udp, tcp, tls")]
    InvalidProtocol(String),
    #[error(transparent)]
    Priority(#[from] PriorityError),
    #[error("invalid new_file_check_interval {given:?}: {reason}")]
    InvalidRefreshInterval { given: String, reason: String },
    #[error("invalid exclude regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to load CA bundle from {path}: {source}")]
    CertBundle {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
