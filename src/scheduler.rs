//! # Glob Scheduler
//!
//! Keeps the set of Follower Workers synchronized with the set of
//! filesystem paths matching the configured glob patterns. See §4.4.
//!
//! Grounded on the teacher's single-logical-loop-per-concern shape (compare
//! `benchmark.rs`'s `BenchmarkRunner::run` driving one coordinating loop
//! while delegating to per-resource tasks).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::config::{Config, LogFile};
use crate::follower::{FollowerWorker, Whence};
use crate::registry::WorkerRegistry;
use crate::transport::TransportHandle;

pub struct GlobScheduler {
    config: Arc<Config>,
    registry: Arc<WorkerRegistry>,
    transport: TransportHandle,
    /// Working directory recorded before daemonization; relative glob
    /// patterns are resolved against this rather than the daemon's (likely
    /// `/`) cwd. See §4.4 step 1.
    base_dir: PathBuf,
}

impl GlobScheduler {
    pub fn new(config: Arc<Config>, registry: Arc<WorkerRegistry>, transport: TransportHandle) -> Self {
        Self::with_base_dir(
            config,
            registry,
            transport,
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        )
    }

    pub fn with_base_dir(
        config: Arc<Config>,
        registry: Arc<WorkerRegistry>,
        transport: TransportHandle,
        base_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            registry,
            transport,
            base_dir,
        }
    }

    fn resolved_pattern(&self, pattern: &str) -> String {
        let path = Path::new(pattern);
        if path.is_absolute() {
            pattern.to_string()
        } else {
            self.base_dir.join(path).to_string_lossy().into_owned()
        }
    }

    /// Run scheduler passes on `new_file_check_interval` cadence until
    /// `stop` fires.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        // Patterns that resolved to zero paths are logged at error level
        // only on the very first pass.
        let mut warned_empty: HashSet<String> = HashSet::new();
        let mut first_pass = true;

        loop {
            if *stop.borrow() {
                return;
            }
            self.pass(first_pass, &mut warned_empty, &stop);
            first_pass = false;

            tokio::select! {
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(self.config.new_file_check_interval) => {}
            }
        }
    }

    fn pass(&self, first_pass: bool, warned_empty: &mut HashSet<String>, stop: &watch::Receiver<bool>) {
        for log_file in &self.config.files {
            self.expand_pattern(log_file, first_pass, warned_empty, stop);
        }
    }

    fn expand_pattern(
        &self,
        log_file: &LogFile,
        first_pass: bool,
        warned_empty: &mut HashSet<String>,
        stop: &watch::Receiver<bool>,
    ) {
        let resolved_pattern = self.resolved_pattern(&log_file.pattern);
        let paths = match glob::glob(&resolved_pattern) {
            Ok(paths) => paths,
            Err(e) => {
                error!(pattern = %log_file.pattern, error = %e, "invalid glob pattern, skipping this tick");
                return;
            }
        };

        let mut matched_any = false;
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "glob entry error, skipping");
                    continue;
                }
            };
            matched_any = true;
            self.consider_path(log_file, path, first_pass, stop);
        }

        if first_pass && !matched_any && warned_empty.insert(log_file.pattern.clone()) {
            error!(pattern = %log_file.pattern, "pattern may not exist");
        }
    }

    fn consider_path(&self, log_file: &LogFile, path: PathBuf, first_pass: bool, stop: &watch::Receiver<bool>) {
        if self.registry.exists(&path) {
            return;
        }
        if self.is_excluded(&path) {
            return;
        }
        if path.is_dir() {
            debug!(path = %path.display(), "skipping directory matched by glob pattern");
            return;
        }

        let tag = log_file.tag.resolve(&path);
        // §4.4 step 3 / §8: pre-existing content on the scheduler's first
        // pass is not replayed (seek to END); anything discovered on a
        // later pass is a new or rotated-in file, read from START.
        let whence = if first_pass { Whence::End } else { Whence::Start };

        debug!(path = %path.display(), tag, "starting follower");
        self.registry.add(path.clone());

        let worker = FollowerWorker::new(
            path,
            tag,
            Arc::clone(&self.config),
            self.transport.clone(),
            Arc::clone(&self.registry),
        );
        let stop_rx = stop.clone();
        tokio::spawn(worker.run(whence, stop_rx));
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.config
            .exclude_files
            .iter()
            .any(|re| re.is_match(&text))
    }
}
