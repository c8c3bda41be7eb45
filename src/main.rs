//! # remote-syslog-tail - Main Entry Point
//!
//! This is the main entry point for the agent. It performs the startup
//! sequence that wraps the core tailing pipeline into a runnable daemon:
//!
//! 1. **Parse arguments**: CLI flags that control config resolution and
//!    logging before anything else starts.
//! 2. **Daemonize** (optional, Unix only): double-fork and detach *before*
//!    the Tokio runtime exists, since `fork()` in a multi-threaded process
//!    only duplicates the calling thread.
//! 3. **Initialize logging**: wire the agent's diagnostic sink to `tracing`,
//!    so that even a config-resolution failure gets a proper diagnostic.
//! 4. **Resolve configuration**: merge CLI flags, an optional YAML file, and
//!    built-in defaults into a single [`remote_syslog_tail::Config`].
//! 5. **Acquire the pid file** (Unix only): an exclusive lock held for the
//!    process lifetime.
//! 6. **Wire the core**: build the [`WorkerRegistry`], start the
//!    [`Transport`], and hand both to the [`GlobScheduler`].
//! 7. **Run until shutdown**: wait for `SIGTERM`/`SIGINT`, then signal every
//!    task to stop and give them a grace period to wind down.
//!
//! ## Error Handling
//!
//! Startup failures (bad config, a pid file already locked) are fatal,
//! logged at the `critical!` level before the process exits via
//! `anyhow::Result`. Once the agent is running, no internal error
//! terminates the process: transport and follower failures are logged and
//! retried, per the core's error handling design.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use remote_syslog_tail::cli::CliArgs;
use remote_syslog_tail::config::{self, Config};
use remote_syslog_tail::critical;
use remote_syslog_tail::error::TransportError;
use remote_syslog_tail::logging;
use remote_syslog_tail::registry::WorkerRegistry;
use remote_syslog_tail::scheduler::GlobScheduler;
use remote_syslog_tail::transport::Transport;

/// Grace period given to the scheduler, follower workers, and the transport
/// to observe the stop signal and wind down before the process exits.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    // Parse command-line arguments first: they control both logging and
    // whether we daemonize, and `fork()` must happen before the Tokio
    // runtime (and its worker threads) exist.
    let args = CliArgs::parse();

    #[cfg(unix)]
    if !args.no_detach {
        remote_syslog_tail::daemon::daemonize().context("failed to daemonize")?;
    }

    let _log_guard = logging::init(args.verbose, args.log_file.as_deref());

    let config = match Config::resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            critical!(error = %e, "cannot resolve configuration, exiting");
            return Err(e).context("failed to resolve configuration");
        }
    };

    #[cfg(unix)]
    let _pid_lock = {
        let pid_file = args.pid_file.clone().unwrap_or_else(config::default_pid_file);
        match remote_syslog_tail::daemon::acquire_pid_file(&pid_file) {
            Ok(lock) => lock,
            Err(e) => {
                critical!(pid_file = %pid_file.display(), error = %e, "cannot acquire pid file, exiting");
                return Err(e).with_context(|| format!("failed to acquire pid file {}", pid_file.display()));
            }
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the Tokio runtime")?
        .block_on(run(config))
}

/// Wire the core together and run until a shutdown signal arrives.
async fn run(config: Config) -> Result<()> {
    info!(
        destination = %format!("{}:{}", config.destination.host, config.destination.port),
        files = config.files.len(),
        "starting remote-syslog-tail"
    );

    let config = Arc::new(config);
    let registry = Arc::new(WorkerRegistry::new());
    let (transport, mut errors) = Transport::start(Arc::clone(&config));
    let scheduler = GlobScheduler::new(Arc::clone(&config), Arc::clone(&registry), transport.handle());

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let error_log_task = tokio::spawn(async move {
        while let Some(err) = errors.recv().await {
            log_transport_error(&err);
        }
    });

    let scheduler_task = tokio::spawn({
        let stop_rx = stop_rx.clone();
        async move { scheduler.run(stop_rx).await }
    });

    shutdown_signal().await;
    info!("shutdown signal received, stopping");

    let _ = stop_tx.send(true);
    transport.close();

    let _ = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, scheduler_task).await;
    // Follower workers are spawned independently of the scheduler and are
    // not individually joined; they each observe `stop_rx` and remove
    // themselves from the registry on exit. Give them the same grace
    // period before falling through to process exit.
    tokio::time::sleep(Duration::from_millis(100).min(SHUTDOWN_GRACE_PERIOD)).await;
    error_log_task.abort();

    info!(remaining_workers = registry.len(), "shutdown complete");
    Ok(())
}

/// Waits for `SIGTERM`/`SIGINT` on Unix, or Ctrl+C on any platform.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        remote_syslog_tail::daemon::wait_for_shutdown_signal().await;
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Diagnostic errors from the Transport are advisory (§7 of the design):
/// they are logged but never cause the agent to exit.
fn log_transport_error(err: &TransportError) {
    match err {
        TransportError::Dial { .. } => {
            error!(error = %err, "transport dial failed, will retry");
        }
        TransportError::Write { .. } | TransportError::WriteTimeout { .. } => {
            error!(error = %err, "transport write failed, reconnecting");
        }
        TransportError::Watcher { .. } => {
            error!(error = %err, "transport connection watcher observed a broken connection");
        }
        TransportError::Tls(_) => {
            error!(error = %err, "TLS configuration error");
        }
    }
}
