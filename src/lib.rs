//! # remote-syslog-tail
//!
//! Tails local log files matching glob patterns and forwards each new line
//! to a remote syslog collector as an RFC 5424 message over UDP, TCP, or
//! TLS. See `config` for how a resolved [`config::Config`] is produced from
//! CLI flags, an optional YAML file, and the environment; `scheduler`,
//! `follower`, `registry`, and `transport` are the core tailing pipeline.

pub mod cli;
pub mod config;
pub mod error;
pub mod follower;
pub mod logging;
pub mod packet;
pub mod registry;
pub mod scheduler;
pub mod transport;

#[cfg(unix)]
pub mod daemon;

pub use config::Config;
pub use error::{ConfigError, PacketParseError, PriorityError, TransportError};
pub use packet::Packet;
pub use registry::WorkerRegistry;
pub use scheduler::GlobScheduler;
pub use transport::Transport;

/// The current version of remote-syslog-tail.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
