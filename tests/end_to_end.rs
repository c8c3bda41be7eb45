//! End-to-end tail-to-transport scenarios, matching the spec's "Testable
//! properties" end-to-end scenarios: a scheduler and followers driving a
//! real UDP "collector" socket through the full pipeline (no mocks).

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use remote_syslog_tail::config::{Config, Destination, LogFile, Protocol, TagRule};
use remote_syslog_tail::{GlobScheduler, Packet, Transport, WorkerRegistry};
use tempfile::tempdir;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::timeout;

fn config_for(dir: &std::path::Path, collector_port: u16, exclude_patterns: Vec<regex::Regex>) -> Config {
    Config {
        destination: Destination {
            host: "127.0.0.1".to_string(),
            port: collector_port,
            protocol: Protocol::Udp,
        },
        hostname: "test-host".to_string(),
        severity: 6,
        facility: 1,
        files: vec![LogFile {
            pattern: dir.join("*.log").to_string_lossy().into_owned(),
            tag: TagRule::Basename,
        }],
        exclude_files: vec![],
        exclude_patterns,
        new_file_check_interval: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(1),
        write_timeout: Duration::from_secs(1),
        tcp_max_line_length: 2048,
        root_cas: None,
        poll: false,
        reconnect_delay: Duration::from_millis(100),
    }
}

/// Waits briefly for the next datagram and returns its parsed `message`
/// field, or `None` if nothing arrives within the deadline.
async fn recv_message(collector: &UdpSocket) -> Option<String> {
    let mut buf = [0u8; 2048];
    match timeout(Duration::from_millis(500), collector.recv_from(&mut buf)).await {
        Ok(Ok((n, _))) => {
            let text = String::from_utf8_lossy(&buf[..n]).into_owned();
            Some(Packet::parse(&text).map(|p| p.message).unwrap_or(text))
        }
        _ => None,
    }
}

#[tokio::test]
async fn first_pass_skips_preexisting_content_then_forwards_new_lines() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("a.log");
    std::fs::write(&file_path, "hello\n").unwrap();

    let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let collector_port = collector.local_addr().unwrap().port();

    let config = Arc::new(config_for(dir.path(), collector_port, vec![]));
    let registry = Arc::new(WorkerRegistry::new());
    let (transport, _errors) = Transport::start(Arc::clone(&config));
    let scheduler = GlobScheduler::new(Arc::clone(&config), Arc::clone(&registry), transport.handle());

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move { scheduler.run(stop_rx).await });

    // Give the first pass (whence = End) time to attach to the file; the
    // pre-existing "hello" line must not be replayed.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(
        recv_message(&collector).await.is_none(),
        "pre-existing content must not be replayed on the first pass"
    );

    let mut file = std::fs::OpenOptions::new().append(true).open(&file_path).unwrap();
    writeln!(file, "world").unwrap();

    let message = recv_message(&collector).await.expect("the appended line is forwarded");
    assert_eq!(message, "world");

    let _ = stop_tx.send(true);
    transport.close();
    let _ = timeout(Duration::from_secs(1), scheduler_task).await;
}

#[tokio::test]
async fn file_created_after_first_pass_is_read_from_start() {
    let dir = tempdir().unwrap();
    let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let collector_port = collector.local_addr().unwrap().port();

    let config = Arc::new(config_for(dir.path(), collector_port, vec![]));
    let registry = Arc::new(WorkerRegistry::new());
    let (transport, _errors) = Transport::start(Arc::clone(&config));
    let scheduler = GlobScheduler::new(Arc::clone(&config), Arc::clone(&registry), transport.handle());

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move { scheduler.run(stop_rx).await });

    // Let the first (empty-directory) pass complete before the file shows up,
    // so it is discovered on a later pass and read from offset 0.
    tokio::time::sleep(Duration::from_millis(80)).await;
    std::fs::write(dir.path().join("b.log"), "line1\nline2\n").unwrap();

    let first = recv_message(&collector).await.expect("line1 is forwarded");
    let second = recv_message(&collector).await.expect("line2 is forwarded");
    assert_eq!(first, "line1");
    assert_eq!(second, "line2");

    let _ = stop_tx.send(true);
    transport.close();
    let _ = timeout(Duration::from_secs(1), scheduler_task).await;
}

#[tokio::test]
async fn exclude_patterns_drop_matching_lines() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("c.log");
    std::fs::write(&file_path, "").unwrap();

    let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let collector_port = collector.local_addr().unwrap().port();

    let exclude_patterns = vec![regex::Regex::new(r"^\d+$").unwrap()];
    let config = Arc::new(config_for(dir.path(), collector_port, exclude_patterns));
    let registry = Arc::new(WorkerRegistry::new());
    let (transport, _errors) = Transport::start(Arc::clone(&config));
    let scheduler = GlobScheduler::new(Arc::clone(&config), Arc::clone(&registry), transport.handle());

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move { scheduler.run(stop_rx).await });

    tokio::time::sleep(Duration::from_millis(80)).await;
    let mut file = std::fs::OpenOptions::new().append(true).open(&file_path).unwrap();
    writeln!(file, "0000").unwrap();
    writeln!(file, "hello").unwrap();

    let message = recv_message(&collector).await.expect("the non-matching line is forwarded");
    assert_eq!(message, "hello");
    assert!(
        recv_message(&collector).await.is_none(),
        "no further packets should arrive; \"0000\" matched exclude_patterns"
    );

    let _ = stop_tx.send(true);
    transport.close();
    let _ = timeout(Duration::from_secs(1), scheduler_task).await;
}
