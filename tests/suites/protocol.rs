use crate::common::{inet_payload, spawn_server, v2_frame};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn read_until_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
        }
    }
    collected
}

#[tokio::test]
async fn test_v1_preface_is_consumed_before_echo() {
    let addr = spawn_server(1024, None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"PROXY TCP4 192.0.2.1 203.0.113.2 12345 80\r\nGET / HTTP/1.1\r\n")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let echoed = read_until_close(&mut stream).await;
    assert_eq!(echoed, b"GET / HTTP/1.1\r\n");
}

#[tokio::test]
async fn test_v1_preface_split_across_writes() {
    let addr = spawn_server(1024, None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    for chunk in [
        &b"PROXY TCP6 2001:db8::1 "[..],
        &b"2001:db8::2 52953 443"[..],
        &b"\r\nping"[..],
    ] {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    stream.shutdown().await.unwrap();

    let echoed = read_until_close(&mut stream).await;
    assert_eq!(echoed, b"ping");
}

#[tokio::test]
async fn test_v1_unknown_family_still_upgrades() {
    let addr = spawn_server(1024, None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"PROXY UNKNOWN 0.0.0.0 0.0.0.0 0 0\r\nHELLO")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let echoed = read_until_close(&mut stream).await;
    assert_eq!(echoed, b"HELLO");
}

#[tokio::test]
async fn test_v1_line_too_long_closes_without_echo() {
    let addr = spawn_server(1024, None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let line = [b'P', b'R', b'O', b'X', b'Y', b' ']
        .iter()
        .copied()
        .chain(std::iter::repeat_n(b'x', 120))
        .collect::<Vec<_>>();
    stream.write_all(&line).await.unwrap();

    let echoed = read_until_close(&mut stream).await;
    assert!(echoed.is_empty());
}

#[tokio::test]
async fn test_non_proxy_bytes_close_the_connection() {
    let addr = spawn_server(1024, None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    let echoed = read_until_close(&mut stream).await;
    assert!(echoed.is_empty());
}

#[tokio::test]
async fn test_v2_inet_preface_is_consumed_before_echo() {
    let addr = spawn_server(1024, None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut bytes = v2_frame(0x21, 0x11, &inet_payload());
    bytes.extend_from_slice(b"PING");
    stream.write_all(&bytes).await.unwrap();
    stream.shutdown().await.unwrap();

    let echoed = read_until_close(&mut stream).await;
    assert_eq!(echoed, b"PING");
}

#[tokio::test]
async fn test_v2_local_health_check_round_trip() {
    let addr = spawn_server(1024, None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut bytes = v2_frame(0x20, 0x00, &[]);
    bytes.extend_from_slice(b"healthcheck");
    stream.write_all(&bytes).await.unwrap();
    stream.shutdown().await.unwrap();

    let echoed = read_until_close(&mut stream).await;
    assert_eq!(echoed, b"healthcheck");
}

#[tokio::test]
async fn test_v2_ssl_tlv_preface_round_trip() {
    let addr = spawn_server(1024, None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut payload = inet_payload();
    payload.extend_from_slice(&[
        0x20, 0x00, 0x0B, 0x01, 0x00, 0x00, 0x00, 0x00, 0x21, 0x00, 0x03, b'1', b'.', b'3',
    ]);
    let mut bytes = v2_frame(0x21, 0x11, &payload);
    bytes.extend_from_slice(b"secure");
    stream.write_all(&bytes).await.unwrap();
    stream.shutdown().await.unwrap();

    let echoed = read_until_close(&mut stream).await;
    assert_eq!(echoed, b"secure");
}

#[tokio::test]
async fn test_v2_payload_over_cap_closes() {
    let addr = spawn_server(16, None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut payload = inet_payload();
    payload.extend_from_slice(&[0u8; 32]);
    stream
        .write_all(&v2_frame(0x21, 0x11, &payload))
        .await
        .unwrap();

    let echoed = read_until_close(&mut stream).await;
    assert!(echoed.is_empty());
}

#[tokio::test]
async fn test_v2_bad_signature_closes() {
    let addr = spawn_server(1024, None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut bytes = v2_frame(0x21, 0x11, &inet_payload());
    bytes[0] = 0x0D;
    bytes[1] = 0x0B; // breaks the magic, keeps the v2 first byte
    stream.write_all(&bytes).await.unwrap();

    let echoed = read_until_close(&mut stream).await;
    assert!(echoed.is_empty());
}

#[tokio::test]
async fn test_stalled_preface_hits_idle_timeout() {
    let addr = spawn_server(1024, Some(Duration::from_millis(200))).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"PROXY TCP4 192.0").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let _ = stream.write_all(b".2.1 203.0.113.2 1 2\r\n").await;

    let echoed = read_until_close(&mut stream).await;
    assert!(echoed.is_empty());
}
