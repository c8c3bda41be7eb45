//! Scenario 6 from the spec: a TCP collector accepts, receives one packet,
//! then drops the connection; a second enqueued packet must arrive on a
//! fresh connection within `reconnect_delay + connect_timeout`, with no
//! duplicate of the first.

use std::sync::Arc;
use std::time::Duration;

use remote_syslog_tail::config::{Config, Destination, Protocol};
use remote_syslog_tail::{Packet, Transport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::timeout;

fn tcp_config(host: String, port: u16) -> Config {
    Config {
        destination: Destination { host, port, protocol: Protocol::Tcp },
        hostname: "host".to_string(),
        severity: 6,
        facility: 1,
        files: vec![],
        exclude_files: vec![],
        exclude_patterns: vec![],
        new_file_check_interval: Duration::from_secs(1),
        connect_timeout: Duration::from_millis(500),
        write_timeout: Duration::from_millis(500),
        tcp_max_line_length: 2048,
        root_cas: None,
        poll: false,
        reconnect_delay: Duration::from_millis(150),
    }
}

#[tokio::test]
async fn reconnects_on_a_fresh_connection_after_the_collector_drops_it() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = Arc::new(tcp_config("127.0.0.1".to_string(), addr.port()));
    let (transport, _errors) = Transport::start(Arc::clone(&config));
    let handle = transport.handle();

    // The writer dials immediately on start; accept that first connection.
    let (stream, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("first connection accepted")
        .unwrap();

    handle
        .write(Packet::new(6, 1, chrono::Utc::now(), "h", "t", "first"))
        .await;

    let mut reader = BufReader::new(stream);
    let mut first_line = String::new();
    timeout(Duration::from_secs(2), reader.read_line(&mut first_line))
        .await
        .expect("first line received")
        .unwrap();
    assert!(first_line.contains("first"));

    // Drop the connection from the collector's side. The watcher task
    // observes the resulting read-zero and wakes the writer, which
    // reconnects before writing the next enqueued packet.
    drop(reader);

    handle
        .write(Packet::new(6, 1, chrono::Utc::now(), "h", "t", "second"))
        .await;

    let within = config.reconnect_delay + config.connect_timeout + Duration::from_secs(1);
    let (stream2, _) = timeout(within, listener.accept())
        .await
        .expect("a fresh connection is dialed after the drop")
        .unwrap();

    let mut reader2 = BufReader::new(stream2);
    let mut second_line = String::new();
    timeout(Duration::from_secs(2), reader2.read_line(&mut second_line))
        .await
        .expect("second line received on the fresh connection")
        .unwrap();
    assert!(second_line.contains("second"));
    assert!(
        !second_line.contains("first"),
        "the first packet must not be duplicated on the new connection"
    );

    transport.close();
}
