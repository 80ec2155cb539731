//! proxygate - PROXY protocol front decoder for TCP services.
//!
//! Initializes the runtime, loads configuration, sets up logging, and runs
//! the front listener with the PROXY decoder ahead of the echo protocol.

use std::sync::Arc;

use proxygate::{
    Config, Connector, EchoConnectionFactory, ProxyConnectionFactory, run_listener,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(non_blocking);

    if config.log_format.eq_ignore_ascii_case("pretty") {
        subscriber.init();
    } else {
        subscriber.json().init();
    }

    info!(
        listen_addr = %config.listen_addr,
        next_protocol = ?config.next_protocol,
        max_proxy_header = config.max_proxy_header,
        idle_timeout_secs = config.idle_timeout_secs,
        log_format = %config.log_format,
        "Server initialized"
    );

    let connector = Connector::new(vec![
        Arc::new(ProxyConnectionFactory::new(
            config.next_protocol.clone(),
            config.max_proxy_header,
        )),
        Arc::new(EchoConnectionFactory),
    ]);

    run_listener(config, connector).await;
}
