use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use proxygate::{
    Connector, EchoConnectionFactory, ProxyConnectionFactory, TcpEndpoint, serve,
};
use tokio::net::TcpListener;

pub const V2_MAGIC: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

/// Builds a complete v2 frame from header fields and payload.
pub fn v2_frame(ver_cmd: u8, fam_trans: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = V2_MAGIC.to_vec();
    frame.push(ver_cmd);
    frame.push(fam_trans);
    let len = u16::try_from(payload.len()).unwrap();
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// INET address block for 192.0.2.1:12345 -> 203.0.113.2:80.
pub fn inet_payload() -> Vec<u8> {
    vec![
        0xC0, 0x00, 0x02, 0x01, 0xCB, 0x00, 0x71, 0x02, 0x30, 0x39, 0x00, 0x50,
    ]
}

/// Spawns a PROXY-fronted echo server on an ephemeral port.
pub async fn spawn_server(max_proxy_header: u16, idle_timeout: Option<Duration>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let connector = Connector::new(vec![
        Arc::new(ProxyConnectionFactory::new(None, max_proxy_header)),
        Arc::new(EchoConnectionFactory),
    ]);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let connector = connector.clone();
            tokio::spawn(async move {
                let endpoint = TcpEndpoint::new(stream, idle_timeout).unwrap();
                serve(connector, Box::new(endpoint)).await;
            });
        }
    });

    addr
}
