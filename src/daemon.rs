//! # Daemonization, Pid-File Locking, and Signals
//!
//! Outside the core's testable surface: a thin Unix-only collaborator
//! invoked once from `main`, grounded on the Go source's
//! `utils/daemonize.go` and `utils/signals.go`, expressed with the
//! teacher's process-management idiom (`nix`, already a teacher dependency
//! used for `signal`/`process`/`fs` features).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::fcntl::{Flock, FlockArg};
use nix::unistd::{fork, setsid, ForkResult};
use tracing::info;

/// An exclusive advisory lock on the pid-file, held for the process
/// lifetime. Dropping it releases the lock (and, on most platforms,
/// leaves the file in place for the next operator to inspect).
pub struct PidFileLock {
    _file: Flock<std::fs::File>,
    path: PathBuf,
}

/// Take an exclusive, non-blocking lock on `path`, writing the current pid
/// into it. Returns an error if another instance already holds the lock.
pub fn acquire_pid_file(path: &Path) -> Result<PidFileLock> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("failed to open pid file {}", path.display()))?;

    let locked = Flock::lock(file.try_clone()?, FlockArg::LockExclusiveNonblock)
        .map_err(|(_, e)| e)
        .with_context(|| format!("pid file {} is already locked by another instance", path.display()))?;

    file.set_len(0)?;
    write!(file, "{}", std::process::id())?;
    file.flush()?;

    Ok(PidFileLock {
        _file: locked,
        path: path.to_path_buf(),
    })
}

impl Drop for PidFileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Double-fork daemonization: fork, let the parent exit, start a new
/// session in the child, fork again so the daemon can never reacquire a
/// controlling terminal. Skipped by the caller when `-D/--no-detach` is
/// passed.
///
/// # Safety
/// Must be called before any additional threads (including the Tokio
/// runtime) are started: `fork()` in a multi-threaded process only
/// duplicates the calling thread, which can deadlock other runtime
/// internals. Callers invoke this prior to `#[tokio::main]` initialization.
pub fn daemonize() -> Result<()> {
    // SAFETY: called from `main` before the Tokio runtime starts, per the
    // contract above.
    match unsafe { fork() }.context("first fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().context("setsid failed")?;

    // SAFETY: same contract as the first fork; no runtime has started yet.
    match unsafe { fork() }.context("second fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    Ok(())
}

/// Install `SIGTERM`/`SIGINT` handlers that flip the cooperative shutdown
/// signal once. Must be called from within a Tokio runtime.
pub async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }
}
