//! SOCKS5 server that forwards every CONNECT through an upstream
//! SOCKS5 proxy instead of dialing the destination directly

use minisocks::{ChainConnector, Socks5Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let upstream = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "socks5://127.0.0.1:9050".to_string());
    let chain = ChainConnector::from_url(&upstream)?;

    let mut server = Socks5Server::new().with_connector(chain);
    let addr = server.listen("127.0.0.1:1080").await?;
    println!("Starting chained SOCKS5 server on {addr} -> {upstream}");

    tokio::signal::ctrl_c().await?;
    server.close().await?;
    Ok(())
}
