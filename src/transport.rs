//! # Syslog Transport
//!
//! The single resilient egress point: one connection to the collector at a
//! time, reconnected on any observable failure, fed by a bounded queue that
//! applies back-pressure to Follower Workers. See §4.5 and §9 ("Transport
//! connection as exclusive resource") for the design this follows.
//!
//! Grounded on the teacher's `ipc/tcp_socket.rs` (tokio `TcpStream`,
//! `write_timeout`-bounded writes) generalized to three protocols, plus
//! `tokio-rustls` for the TLS leg (the teacher has no TLS transport of its
//! own).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::{Config, Protocol};
use crate::error::TransportError;
use crate::packet::Packet;

/// Capacity of the producer-to-writer packet queue. Kept at 100 and
/// blocking, per §9: do not convert to a drop-oldest policy, do not
/// enlarge it without bounding memory in the presence of many files.
const QUEUE_CAPACITY: usize = 100;

/// UDP datagrams are capped at 1024 bytes and carry no trailing newline.
const UDP_MAX_SIZE: usize = 1024;

/// A single producer handle into the Transport's bounded queue. Cheap to
/// clone; every Follower Worker holds one.
#[derive(Clone)]
pub struct TransportHandle {
    packets: mpsc::Sender<Packet>,
    stopped: Arc<AtomicBool>,
}

impl TransportHandle {
    /// Enqueue a packet for delivery. Blocks (applying back-pressure to the
    /// caller) while the queue is full. Returns immediately without
    /// blocking, and without enqueueing, once the Transport has been
    /// stopped.
    pub async fn write(&self, packet: Packet) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        // The receiver is only dropped once the writer task has exited,
        // which only happens after `stop` flips; a send error here means a
        // stop raced us, which is not an error condition for the caller.
        let _ = self.packets.send(packet).await;
    }
}

/// Owns the connection, the bounded packet queue, and the writer/watcher
/// tasks. Created once via [`Transport::start`] and shared as a
/// [`TransportHandle`] by producers.
pub struct Transport {
    handle: TransportHandle,
    stop_tx: watch::Sender<bool>,
}

impl Transport {
    /// Start the Transport: dial once (non-fatally — failure just enters
    /// the reconnect loop), spawn the writer task, and return a handle for
    /// producers plus a receiver for diagnostic transport errors.
    ///
    /// The error channel has capacity 1 and uses `try_send`, modeling the
    /// "single-slot mailbox, drop if full" semantics of §9: diagnostic
    /// errors are advisory and must never stall the writer.
    pub fn start(config: Arc<Config>) -> (Self, mpsc::Receiver<TransportError>) {
        let (packets_tx, packets_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let stopped = Arc::new(AtomicBool::new(false));

        tokio::spawn(writer_loop(
            config,
            packets_rx,
            errors_tx,
            stop_rx,
            Arc::clone(&stopped),
        ));

        (
            Transport {
                handle: TransportHandle {
                    packets: packets_tx,
                    stopped,
                },
                stop_tx,
            },
            errors_rx,
        )
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Transition to *Stopped*. Non-blocking; any Packet left in the queue
    /// is not guaranteed to be delivered.
    pub fn close(&self) {
        self.handle.stopped.store(true, Ordering::Release);
        let _ = self.stop_tx.send(true);
    }
}

/// The signal the watcher flips when it observes the connection is broken.
/// `broken` lets the writer do a cheap synchronous check (at the top of the
/// loop and again right after dequeuing a packet); `notify` lets the writer
/// wake up immediately while it is parked waiting on the packet queue,
/// instead of only noticing on the next dequeue.
struct WatcherState {
    broken: AtomicBool,
    notify: Notify,
}

type WatcherSignal = Arc<WatcherState>;

fn is_broken(signal: &Option<WatcherSignal>) -> bool {
    signal.as_ref().is_some_and(|s| s.broken.load(Ordering::Acquire))
}

/// Resolves once the watcher reports a broken connection. Never resolves
/// (instead of erroring) when there is no watcher, e.g. over UDP, so it is
/// safe to select on unconditionally.
async fn watch_broken(signal: &Option<WatcherSignal>) {
    match signal {
        Some(s) => s.notify.notified().await,
        None => std::future::pending().await,
    }
}

enum Connection {
    Udp(UdpSocket),
    Tcp {
        write_half: tokio::net::tcp::OwnedWriteHalf,
    },
    Tls {
        write_half: tokio::io::WriteHalf<TlsStream<TcpStream>>,
    },
}

impl Connection {
    fn framing(&self, config: &Config) -> (usize, bool) {
        match self {
            Connection::Udp(_) => (UDP_MAX_SIZE, false),
            Connection::Tcp { .. } | Connection::Tls { .. } => {
                (config.tcp_max_line_length, true)
            }
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Connection::Udp(socket) => {
                socket.send(bytes).await?;
                Ok(())
            }
            Connection::Tcp { write_half } => {
                write_half.write_all(bytes).await?;
                write_half.flush().await
            }
            Connection::Tls { write_half } => {
                write_half.write_all(bytes).await?;
                write_half.flush().await
            }
        }
    }

    fn protocol_name(&self) -> &'static str {
        match self {
            Connection::Udp(_) => "udp",
            Connection::Tcp { .. } => "tcp",
            Connection::Tls { .. } => "tls",
        }
    }
}

async fn dial(
    config: &Config,
    errors: mpsc::Sender<TransportError>,
) -> Result<(Connection, Option<WatcherSignal>), TransportError> {
    let addr = config.destination.resolve().map_err(|source| TransportError::Dial {
        protocol: protocol_name(config.destination.protocol),
        addr: format!("{}:{}", config.destination.host, config.destination.port),
        source,
    })?;

    match config.destination.protocol {
        Protocol::Udp => {
            let bind_addr = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
            let socket = UdpSocket::bind(bind_addr).await.map_err(|source| TransportError::Dial {
                protocol: "udp",
                addr: addr.to_string(),
                source,
            })?;
            socket.connect(addr).await.map_err(|source| TransportError::Dial {
                protocol: "udp",
                addr: addr.to_string(),
                source,
            })?;
            Ok((Connection::Udp(socket), None))
        }
        Protocol::Tcp => {
            let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| TransportError::Dial {
                    protocol: "tcp",
                    addr: addr.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                })?
                .map_err(|source| TransportError::Dial {
                    protocol: "tcp",
                    addr: addr.to_string(),
                    source,
                })?;
            let _ = stream.set_nodelay(true);
            let (read_half, write_half) = stream.into_split();
            let signal = spawn_watcher(ReadSide::Tcp(read_half), "tcp", errors);
            Ok((Connection::Tcp { write_half }, Some(signal)))
        }
        Protocol::Tls => {
            let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| TransportError::Dial {
                    protocol: "tls",
                    addr: addr.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                })?
                .map_err(|source| TransportError::Dial {
                    protocol: "tls",
                    addr: addr.to_string(),
                    source,
                })?;
            let _ = stream.set_nodelay(true);

            let client_config = tls_client_config(config)?;
            let connector = TlsConnector::from(Arc::new(client_config));
            let server_name = ServerName::try_from(config.destination.host.clone())
                .map_err(|e| TransportError::Tls(format!("invalid server name: {e}")))?;
            let tls_stream = timeout(config.connect_timeout, connector.connect(server_name, stream))
                .await
                .map_err(|_| TransportError::Dial {
                    protocol: "tls",
                    addr: addr.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "TLS handshake timed out"),
                })?
                .map_err(|source| TransportError::Dial {
                    protocol: "tls",
                    addr: addr.to_string(),
                    source,
                })?;
            let (read_half, write_half) = tokio::io::split(tls_stream);
            let signal = spawn_watcher(ReadSide::Tls(read_half), "tls", errors);
            Ok((Connection::Tls { write_half }, Some(signal)))
        }
    }
}

fn tls_client_config(config: &Config) -> Result<ClientConfig, TransportError> {
    let root_store = match &config.root_cas {
        Some(store) => (**store).clone(),
        None => {
            let mut store = RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            for err in &native.errors {
                warn!(error = %err, "failed to load a native root certificate");
            }
            let (added, _) = store.add_parsable_certificates(native.certs);
            if added == 0 {
                return Err(TransportError::Tls(
                    "no usable root certificates (native store empty and no --ca-bundle given)"
                        .to_string(),
                ));
            }
            store
        }
    };
    Ok(ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

enum ReadSide {
    Tcp(tokio::net::tcp::OwnedReadHalf),
    Tls(tokio::io::ReadHalf<TlsStream<TcpStream>>),
}

/// Spawn the watcher task: a blocking 1-byte read that, on any result
/// (error or unexpected data), flips the signal the writer checks before
/// every send and reports a [`TransportError::Watcher`] on the error
/// channel (best-effort, per §4.5/§7). This detects half-open sockets that
/// pure writes can't see.
fn spawn_watcher(
    mut read_side: ReadSide,
    protocol: &'static str,
    errors: mpsc::Sender<TransportError>,
) -> WatcherSignal {
    let signal = Arc::new(WatcherState { broken: AtomicBool::new(false), notify: Notify::new() });
    let task_signal = Arc::clone(&signal);
    tokio::spawn(async move {
        let mut probe = [0u8; 1];
        let result = match &mut read_side {
            ReadSide::Tcp(r) => r.read(&mut probe).await,
            ReadSide::Tls(r) => r.read(&mut probe).await,
        };
        let source = match result {
            Ok(0) => {
                debug!(protocol, "watcher observed peer closed connection");
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer closed connection")
            }
            Ok(_) => {
                warn!(protocol, "watcher observed unexpected inbound data");
                std::io::Error::new(std::io::ErrorKind::InvalidData, "unexpected inbound data")
            }
            Err(e) => {
                debug!(protocol, error = %e, "watcher observed a read error");
                e
            }
        };
        let _ = errors.try_send(TransportError::Watcher { protocol, source });
        task_signal.broken.store(true, Ordering::Release);
        task_signal.notify.notify_one();
    });
    signal
}

fn protocol_name(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Udp => "udp",
        Protocol::Tcp => "tcp",
        Protocol::Tls => "tls",
    }
}

/// Dial, retrying on [`config.reconnect_delay`] after every failed attempt,
/// until a connection is established or `stop` fires. Returns `None` only
/// in the latter case.
async fn connect_with_retry(
    config: &Config,
    errors: &mpsc::Sender<TransportError>,
    stop: &mut watch::Receiver<bool>,
) -> Option<(Connection, Option<WatcherSignal>)> {
    loop {
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    return None;
                }
            }
            dialed = dial(config, errors.clone()) => {
                match dialed {
                    Ok(conn) => return Some(conn),
                    Err(e) => {
                        let _ = errors.try_send(e);
                        tokio::select! {
                            _ = tokio::time::sleep(config.reconnect_delay) => {}
                            _ = stop.changed() => {
                                if *stop.borrow() {
                                    return None;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn writer_loop(
    config: Arc<Config>,
    mut packets: mpsc::Receiver<Packet>,
    errors: mpsc::Sender<TransportError>,
    mut stop: watch::Receiver<bool>,
    stopped: Arc<AtomicBool>,
) {
    let mut connection: Option<Connection> = None;
    let mut watcher_signal: Option<WatcherSignal> = None;

    loop {
        if *stop.borrow() {
            break;
        }

        if connection.is_none() || is_broken(&watcher_signal) {
            if connection.is_some() {
                debug!("reconnecting after watcher observed a broken connection");
            }
            connection = None;
            watcher_signal = None;
            match connect_with_retry(&config, &errors, &mut stop).await {
                Some((conn, signal)) => {
                    connection = Some(conn);
                    watcher_signal = signal;
                }
                None => break,
            }
            continue;
        }

        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
            _ = watch_broken(&watcher_signal) => {
                // Loop back around; the top-of-loop check reconnects.
            }
            maybe_packet = packets.recv() => {
                let Some(packet) = maybe_packet else {
                    break;
                };

                // The watcher may have fired between the select arms being
                // polled and this arm winning; re-check so the packet we
                // just dequeued is written on a live connection rather than
                // lost on one already known to be broken.
                if is_broken(&watcher_signal) {
                    debug!("reconnecting before writing a dequeued packet");
                    connection = None;
                    watcher_signal = None;
                    match connect_with_retry(&config, &errors, &mut stop).await {
                        Some((conn, signal)) => {
                            connection = Some(conn);
                            watcher_signal = signal;
                        }
                        None => break,
                    }
                }

                let conn = connection.as_mut().expect("reconnected above if needed");
                let (max_size, append_newline) = conn.framing(&config);
                let mut rendered = packet.render(max_size).into_bytes();
                if append_newline {
                    rendered.push(b'\n');
                }
                let protocol = conn.protocol_name();
                let write = conn.write_all(&rendered);
                match timeout(config.write_timeout, write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(source)) => {
                        let _ = errors.try_send(TransportError::Write { protocol, source });
                        connection = None;
                        watcher_signal = None;
                    }
                    Err(_) => {
                        let _ = errors.try_send(TransportError::WriteTimeout {
                            protocol,
                            timeout: config.write_timeout,
                        });
                        connection = None;
                        watcher_signal = None;
                    }
                }
            }
        }
    }
    stopped.store(true, Ordering::Release);
}
