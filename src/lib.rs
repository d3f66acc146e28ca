//! A lightweight SOCKS5 proxy server library (RFC 1928 / RFC 1929)
//!
//! Sessions negotiate an authentication method, optionally check
//! username/password credentials, resolve a CONNECT request through a
//! pluggable outbound connector, and then relay bytes transparently
//! in both directions. BIND and UDP ASSOCIATE are answered with
//! COMMAND_NOT_SUPPORTED.
//!
//! # Example
//! ```no_run
//! use minisocks::Socks5Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Socks5Server::new();
//!     server.listen("127.0.0.1:1080").await?;
//!     // ... serve until shutdown ...
//!     server.close().await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod auth;
pub mod codec;
pub mod connector;
pub mod events;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;

// Re-export main types at crate root for convenience
pub use address::{Address, Destination};
pub use auth::{Authenticator, UserPass};
pub use connector::{BoxedDuplex, ChainConnector, Connector, DirectConnector, Duplex};
pub use events::{Event, EventSink, NullSink, TraceSink};
pub use protocol::{AddressType, AuthMethod, Command, ReplyCode, Version};
pub use server::{ConnectionFilter, ServerOptions, Socks5Server};
pub use session::{Phase, Session};
