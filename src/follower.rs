//! # Follower Worker
//!
//! One task per tailed file: reads new lines, applies the configured
//! exclusion regexes, builds [`Packet`]s, and hands them to the
//! [`TransportHandle`]. See §4.3.
//!
//! Grounded on the teacher's task-per-resource style (one `tokio::spawn` per
//! unit of work, e.g. `handle_connection` in `ipc/tcp_socket.rs`) combined
//! with the `notify` crate's recommended watcher for filesystem events,
//! bridged into the async world the way `linemux`-style tailers do: the
//! watcher callback runs on its own thread and forwards events over a
//! bounded `tokio::sync::mpsc` channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::packet::Packet;
use crate::registry::WorkerRegistry;
use crate::transport::TransportHandle;

/// Initial seek anchor: END for files discovered on the scheduler's first
/// pass (so pre-existing content isn't replayed), START for every file
/// discovered afterward (so a newly rotated-in file is read from scratch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    End,
}

/// How long to wait for a filesystem event before falling back to a stat,
/// to detect silent deletions on filesystems that don't deliver remove
/// events reliably.
const QUIET_STAT_INTERVAL: Duration = Duration::from_secs(10);

/// Cadence of the pure-polling follower, used when the config requests
/// polling instead of filesystem notifications.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Read chunk size for both the notify-driven and polling followers.
const READ_CHUNK: usize = 8192;

/// How long to sleep after a rotation is observed before reopening, giving
/// the rotating tool time to re-create the file at the same path.
const REOPEN_DELAY: Duration = Duration::from_secs(1);

pub struct FollowerWorker {
    path: PathBuf,
    tag: String,
    config: Arc<Config>,
    transport: TransportHandle,
    registry: Arc<WorkerRegistry>,
}

impl FollowerWorker {
    pub fn new(
        path: PathBuf,
        tag: String,
        config: Arc<Config>,
        transport: TransportHandle,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        Self {
            path,
            tag,
            config,
            transport,
            registry,
        }
    }

    /// Run until the file is unreadable, an unrecoverable I/O error occurs,
    /// or `stop` fires. Always removes its own path from the registry on
    /// exit, including panics unwound through `tokio::spawn`'s catch
    /// boundary (the scheduler checks worker liveness only through the
    /// registry, never through the `JoinHandle`).
    pub async fn run(self, whence: Whence, mut stop: watch::Receiver<bool>) {
        let result = if self.config.poll {
            self.run_polling(whence, &mut stop).await
        } else {
            self.run_notified(whence, &mut stop).await
        };
        if let Err(e) = result {
            debug!(path = %self.path.display(), error = %e, "follower exiting after an I/O error");
        }
        self.registry.remove(&self.path);
    }

    async fn open_at(&self, whence: Whence) -> std::io::Result<(File, LineBuffer)> {
        let mut file = File::open(&self.path).await?;
        if whence == Whence::End {
            let len = file.metadata().await?.len();
            file.seek(std::io::SeekFrom::Start(len)).await?;
        }
        Ok((file, LineBuffer::default()))
    }

    /// Sanitizes, filters, and enqueues one line. Awaits the Transport's
    /// bounded queue directly rather than spawning a task per line, so that
    /// lines from the same file enter the queue in file order and queue
    /// back-pressure is felt by this worker's own read loop, per §4.3/§5.
    async fn forward_line(&self, raw: &[u8]) {
        let mut nul_count = 0usize;
        let cleaned: Vec<u8> = raw
            .iter()
            .copied()
            .filter(|&b| {
                if b == 0 {
                    nul_count += 1;
                    false
                } else {
                    true
                }
            })
            .collect();
        if nul_count > 0 {
            trace!(path = %self.path.display(), nul_count, "discarded NUL bytes from line");
        }

        let text = String::from_utf8_lossy(&cleaned).into_owned();
        let text = text.strip_suffix('\r').map(str::to_string).unwrap_or(text);

        if self
            .config
            .exclude_patterns
            .iter()
            .any(|re| re.is_match(&text))
        {
            trace!(path = %self.path.display(), "line dropped by exclude_patterns");
            return;
        }

        let packet = Packet::new(
            self.config.severity,
            self.config.facility,
            chrono::Local::now().fixed_offset(),
            self.config.hostname.clone(),
            self.tag.clone(),
            text,
        );
        self.transport.write(packet).await;
    }

    /// Event-driven follower: native filesystem notifications plus a
    /// stat-based safety net every [`QUIET_STAT_INTERVAL`].
    async fn run_notified(
        &self,
        whence: Whence,
        stop: &mut watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let (events_tx, mut events_rx) = mpsc::channel::<notify::Result<Event>>(64);
        let mut watcher = match make_watcher(events_tx) {
            Ok(w) => w,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to create filesystem watcher, exiting");
                return Ok(());
            }
        };
        if let Err(e) = watcher.watch(&self.path, RecursiveMode::NonRecursive) {
            warn!(path = %self.path.display(), error = %e, "failed to watch file, exiting");
            return Ok(());
        }

        let (mut file, mut buffer) = match self.open_at(whence).await {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to open file, exiting");
                return Ok(());
            }
        };

        loop {
            if *stop.borrow() {
                return Ok(());
            }

            match self.read_available(&mut file, &mut buffer).await {
                Ok(true) => continue, // produced at least one line, keep draining
                Ok(false) => {}       // hit EOF, fall through to waiting for events
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = stop.changed() => {
                    return Ok(());
                }
                event = events_rx.recv() => {
                    match event {
                        Some(Ok(event)) => {
                            match classify(&event) {
                                FsAction::Resume => {}
                                FsAction::Truncated => {
                                    buffer.clear();
                                    file.seek(std::io::SeekFrom::Start(0)).await?;
                                }
                                FsAction::Removed => {
                                    let _ = watcher.unwatch(&self.path);
                                    tokio::time::sleep(REOPEN_DELAY).await;
                                    match self.open_at(Whence::Start).await {
                                        Ok((new_file, new_buffer)) => {
                                            file = new_file;
                                            buffer = new_buffer;
                                            if let Err(e) = watcher.watch(&self.path, RecursiveMode::NonRecursive) {
                                                warn!(path = %self.path.display(), error = %e, "failed to re-watch reopened file, exiting");
                                                return Ok(());
                                            }
                                        }
                                        Err(_) => return Ok(()),
                                    }
                                }
                                FsAction::Ignore => {}
                            }
                        }
                        Some(Err(e)) => {
                            debug!(path = %self.path.display(), error = %e, "watcher error, continuing");
                        }
                        None => {
                            // Watcher task ended; fall back to the quiet-poll safety net below.
                            tokio::time::sleep(QUIET_STAT_INTERVAL).await;
                        }
                    }
                }
                _ = tokio::time::sleep(QUIET_STAT_INTERVAL) => {
                    if !path_exists(&self.path).await {
                        let _ = watcher.unwatch(&self.path);
                        tokio::time::sleep(REOPEN_DELAY).await;
                        match self.open_at(Whence::Start).await {
                            Ok((new_file, new_buffer)) => {
                                file = new_file;
                                buffer = new_buffer;
                                if let Err(e) = watcher.watch(&self.path, RecursiveMode::NonRecursive) {
                                    warn!(path = %self.path.display(), error = %e, "failed to re-watch reopened file, exiting");
                                    return Ok(());
                                }
                            }
                            Err(_) => return Ok(()),
                        }
                    }
                }
            }
        }
    }

    /// Pure-polling follower, driven by a timer instead of filesystem
    /// notifications, with the same external behavior (used on network
    /// filesystems that don't deliver events reliably).
    async fn run_polling(
        &self,
        whence: Whence,
        stop: &mut watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let (mut file, mut buffer) = match self.open_at(whence).await {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to open file, exiting");
                return Ok(());
            }
        };

        loop {
            if *stop.borrow() {
                return Ok(());
            }

            match self.read_available(&mut file, &mut buffer).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = stop.changed() => return Ok(()),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            if !path_exists(&self.path).await {
                tokio::time::sleep(REOPEN_DELAY).await;
                match self.open_at(Whence::Start).await {
                    Ok((new_file, new_buffer)) => {
                        file = new_file;
                        buffer = new_buffer;
                    }
                    Err(_) => return Ok(()),
                }
                continue;
            }

            if let Ok(metadata) = file.metadata().await {
                let current_pos = file.stream_position().await.unwrap_or(0);
                if metadata.len() < current_pos {
                    buffer.clear();
                    file.seek(std::io::SeekFrom::Start(0)).await?;
                }
            }
        }
    }

    /// Read and forward every complete line currently available. Returns
    /// `Ok(true)` if at least one line was forwarded (caller should keep
    /// draining before waiting), `Ok(false)` on EOF with no complete line
    /// pending.
    async fn read_available(&self, file: &mut File, buffer: &mut LineBuffer) -> std::io::Result<bool> {
        let mut produced = false;
        loop {
            while let Some(line) = buffer.take_line() {
                self.forward_line(&line).await;
                produced = true;
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                return Ok(produced);
            }
            buffer.extend(&chunk[..n]);
        }
    }
}

/// Accumulates bytes read from the file until a full line (terminated by
/// `\n`) is available. The unterminated tail at EOF stays here rather than
/// being emitted or seeked back over explicitly — functionally identical to
/// the source's "rewind by the unterminated length" behavior, since those
/// bytes are simply re-read (from further along the same growing buffer)
/// once more data arrives.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let newline_pos = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=newline_pos).collect();
        line.pop(); // drop the trailing '\n'
        Some(line)
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

enum FsAction {
    Resume,
    Truncated,
    Removed,
    Ignore,
}

fn classify(event: &Event) -> FsAction {
    match &event.kind {
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => FsAction::Resume,
        // A metadata-only modify is used as the truncation signal on POSIX,
        // matching the chmod-event convention of the source.
        EventKind::Modify(ModifyKind::Metadata(_)) => FsAction::Truncated,
        EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => FsAction::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FsAction::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => FsAction::Removed,
        _ => FsAction::Ignore,
    }
}

fn make_watcher(tx: mpsc::Sender<notify::Result<Event>>) -> notify::Result<RecommendedWatcher> {
    notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.blocking_send(res);
    })
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_splits_on_newline_and_keeps_remainder() {
        let mut buf = LineBuffer::default();
        buf.extend(b"hello\nworld");
        assert_eq!(buf.take_line(), Some(b"hello".to_vec()));
        assert_eq!(buf.take_line(), None);
        buf.extend(b"!\n");
        assert_eq!(buf.take_line(), Some(b"world!".to_vec()));
    }

    #[test]
    fn line_buffer_clear_drops_partial_line() {
        let mut buf = LineBuffer::default();
        buf.extend(b"partial line no newline");
        buf.clear();
        assert_eq!(buf.take_line(), None);
    }
}
