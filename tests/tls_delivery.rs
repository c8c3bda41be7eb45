//! TLS transport delivery against an in-process self-signed collector.
//! `rcgen` mints the certificate/key pair in-process so this test has no
//! external fixture dependency; grounded on `rustls::ServerConfig` usage
//! elsewhere in the retrieval pack (see DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use rcgen::generate_simple_self_signed;
use remote_syslog_tail::config::{Config, Destination, Protocol};
use remote_syslog_tail::{Packet, Transport};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

fn tls_config(host: String, port: u16, root_cas: RootCertStore) -> Config {
    Config {
        destination: Destination { host, port, protocol: Protocol::Tls },
        hostname: "host".to_string(),
        severity: 6,
        facility: 1,
        files: vec![],
        exclude_files: vec![],
        exclude_patterns: vec![],
        new_file_check_interval: Duration::from_secs(1),
        connect_timeout: Duration::from_secs(2),
        write_timeout: Duration::from_secs(2),
        tcp_max_line_length: 2048,
        root_cas: Some(Arc::new(root_cas)),
        poll: false,
        reconnect_delay: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn delivers_a_packet_over_a_self_signed_tls_connection() {
    let certified = generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der: CertificateDer<'static> = certified.cert.der().clone();
    let key_der: PrivateKeyDer<'static> =
        PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()).into();

    let mut root_store = RootCertStore::empty();
    root_store.add(cert_der.clone()).unwrap();

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .expect("valid self-signed cert/key pair");
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let tls_stream = acceptor.accept(stream).await.unwrap();
        let mut reader = BufReader::new(tls_stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    });

    let config = Arc::new(tls_config("localhost".to_string(), addr.port(), root_store));
    let (transport, _errors) = Transport::start(config);
    let handle = transport.handle();
    handle
        .write(Packet::new(6, 1, chrono::Utc::now(), "h", "t", "over tls"))
        .await;

    let received = timeout(Duration::from_secs(3), server)
        .await
        .expect("server task completes")
        .unwrap();
    assert!(received.contains("over tls"));

    transport.close();
}
