use anyhow::{Result, bail};
use clap::Parser;
use minisocks::{ChainConnector, Socks5Server, TraceSink, UserPass};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 proxy", long_about = None)]
struct Args {
    /// Listener address
    #[arg(short, long, default_value = "127.0.0.1:1080")]
    listen: String,

    /// Username for SOCKS5 proxy
    #[arg(short, long)]
    username: Option<String>,

    /// Password for SOCKS5 proxy
    #[arg(short, long)]
    password: Option<String>,

    /// Chain through an upstream proxy: socks5://[user:pass@]host:port
    #[arg(short, long)]
    chain: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    // Check for auth and grab it if present
    let auth = match (args.username, args.password) {
        (Some(u), Some(p)) => {
            info!("Authentication enabled");
            Some(UserPass {
                username: u,
                password: p,
            })
        }
        (None, None) => None,
        _ => bail!("must provide both username and password (or neither)"),
    };

    // Instantiate server
    let mut server = Socks5Server::new().with_events(TraceSink);
    if let Some(auth) = auth {
        server = server.with_auth(auth);
    }
    if let Some(url) = args.chain {
        let chain = ChainConnector::from_url(&url)?;
        info!("Chaining through {}", chain.upstream);
        server = server.with_connector(chain);
    }

    // Run it
    server.listen(args.listen.as_str()).await?;
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    server.close().await
}
