use std::sync::Arc;
use std::time::Duration;

use proxygate::{Config, Connector, EchoConnectionFactory, ProxyConnectionFactory, run_listener};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[tokio::test]
async fn test_full_stack_listener_round_trip() {
    // Probe for a free port, then hand it to the listener.
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let config = Arc::new(Config {
        listen_addr: format!("127.0.0.1:{port}").parse().unwrap(),
        next_protocol: None,
        max_proxy_header: 1024,
        idle_timeout_secs: 5,
        concurrency_limit: 16,
        log_format: "pretty".to_string(),
    });

    let connector = Connector::new(vec![
        Arc::new(ProxyConnectionFactory::new(
            config.next_protocol.clone(),
            config.max_proxy_header,
        )),
        Arc::new(EchoConnectionFactory),
    ]);

    tokio::spawn(run_listener(config, connector));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap();
    stream
        .write_all(b"PROXY TCP4 192.0.2.1 203.0.113.2 12345 80\r\nhello listener")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let mut echoed = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => echoed.extend_from_slice(&buf[..n]),
        }
    }
    assert_eq!(echoed, b"hello listener");
}

#[tokio::test]
async fn test_proxy_without_following_protocol_closes() {
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let config = Arc::new(Config {
        listen_addr: format!("127.0.0.1:{port}").parse().unwrap(),
        next_protocol: None,
        max_proxy_header: 1024,
        idle_timeout_secs: 5,
        concurrency_limit: 16,
        log_format: "pretty".to_string(),
    });

    // "proxy" is the last (and only) protocol: a decoded preface has
    // nowhere to upgrade to, which is a configuration error.
    let connector = Connector::new(vec![Arc::new(ProxyConnectionFactory::new(
        None,
        config.max_proxy_header,
    ))]);

    tokio::spawn(run_listener(config, connector));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap();
    stream
        .write_all(b"PROXY TCP4 192.0.2.1 203.0.113.2 12345 80\r\nhello")
        .await
        .unwrap();

    let mut buf = [0u8; 256];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
}
