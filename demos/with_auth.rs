//! SOCKS5 server with username/password authentication example

use minisocks::{Socks5Server, UserPass};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let auth = UserPass {
        username: "<user>".to_string(),
        password: "<pass>".to_string(),
    };

    let mut server = Socks5Server::new().with_auth(auth);
    let addr = server.listen("127.0.0.1:1080").await?;
    println!("Starting SOCKS5 server on {addr}");

    tokio::signal::ctrl_c().await?;
    server.close().await?;
    Ok(())
}
