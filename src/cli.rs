//! # Command-Line Interface Module
//!
//! Flags are deliberately thin: almost everything here exists to be merged
//! into a [`crate::config::Config`] by [`crate::config::Config::resolve`].
//! Precedence is CLI flag > YAML file value > built-in default, matching the
//! teacher's `BenchmarkConfiguration::from(&Args)` conversion.

use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Styles};
use clap::Parser;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Tail local log files matching glob patterns and forward each new line to
/// a remote syslog collector as an RFC 5424 message over UDP, TCP, or TLS.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct CliArgs {
    /// YAML configuration file
    ///
    /// Supplies `files`, `destination`, `hostname`, `exclude_files`,
    /// `exclude_patterns`, and `new_file_check_interval`. Any flag given on
    /// the command line overrides the corresponding value from this file.
    #[arg(short = 'c', long = "config", default_value = "/etc/log_files.yml")]
    pub config: Option<PathBuf>,

    /// Destination collector hostname or IP address
    #[arg(short = 'd', long = "dest-host", help_heading = "Destination")]
    pub dest_host: Option<String>,

    /// Destination collector port
    #[arg(short = 'p', long = "dest-port", help_heading = "Destination")]
    pub dest_port: Option<u16>,

    /// Use plain TCP instead of UDP. Overridden by `--tls`.
    #[arg(long, help_heading = "Destination")]
    pub tcp: bool,

    /// Use TLS over TCP. Takes precedence over `--tcp` and the YAML file.
    #[arg(long, help_heading = "Destination")]
    pub tls: bool,

    /// PEM bundle of CA certificates used to verify the TLS connection.
    /// When omitted, the system's native trust store is used.
    #[arg(long = "ca-bundle", help_heading = "Destination")]
    pub ca_bundle: Option<PathBuf>,

    /// Default severity for every forwarded packet
    #[arg(short = 's', long, help_heading = "Packet")]
    pub severity: Option<String>,

    /// Default facility for every forwarded packet
    #[arg(short = 'f', long, help_heading = "Packet")]
    pub facility: Option<String>,

    /// Hostname reported in every forwarded packet. Defaults to the local
    /// machine's hostname.
    #[arg(long, help_heading = "Packet")]
    pub hostname: Option<String>,

    /// Force the polling follower instead of filesystem notifications
    /// (useful on network filesystems that don't deliver them).
    #[arg(long, help_heading = "Tailing")]
    pub poll: bool,

    /// How often to re-scan glob patterns for new files. Accepts a bare
    /// integer (seconds) or a duration string like "30s". Floor 1s.
    #[arg(long = "new-file-check-interval", help_heading = "Tailing")]
    pub new_file_check_interval: Option<String>,

    /// Per-attempt dial timeout in seconds
    #[arg(long = "connect-timeout", help_heading = "Transport")]
    pub connect_timeout: Option<u64>,

    /// Per-write deadline in seconds
    #[arg(long = "write-timeout", help_heading = "Transport")]
    pub write_timeout: Option<u64>,

    /// Maximum rendered bytes per TCP/TLS message
    #[arg(long = "tcp-max-line-length", help_heading = "Transport")]
    pub tcp_max_line_length: Option<usize>,

    /// Do not daemonize; run in the foreground (Unix only)
    #[arg(short = 'D', long = "no-detach", help_heading = "Process")]
    pub no_detach: bool,

    /// Pid-file path. Defaults to the first writable directory in the
    /// standard search chain.
    #[arg(long = "pid-file", help_heading = "Process")]
    pub pid_file: Option<PathBuf>,

    /// Write diagnostic logs to this file instead of stderr. Pass "stderr"
    /// explicitly to force stderr even when a default log file would apply.
    #[arg(long = "log-file", help_heading = "Output and Logging")]
    pub log_file: Option<String>,

    /// Increase diagnostic log verbosity.
    ///  -v: debug
    ///  -vv and above: trace
    /// By default, only INFO and above is shown.
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,

    /// Log files to tail, each optionally of the form TAG=PATTERN. Merged
    /// with any `files` entries from the YAML config file.
    #[arg(help_heading = "Tailing")]
    pub files: Vec<String>,
}
