use crate::address::Destination;
use crate::auth::Authenticator;
use crate::connector::{Connector, DirectConnector};
use crate::events::{EventSink, NullSink};
use crate::session::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

/// ConnectionFilter vets a parsed CONNECT destination before the
/// outbound factory runs. Returning an error answers the client with
/// CONNECTION_NOT_ALLOWED.
#[async_trait]
pub trait ConnectionFilter: Send + Sync {
    async fn allow(&self, destination: &Destination, origin: SocketAddr) -> Result<()>;
}

/// ServerOptions is the configuration bundle shared by every session
#[derive(Clone)]
pub struct ServerOptions {
    pub(crate) authenticator: Option<Arc<dyn Authenticator>>,
    pub(crate) filter: Option<Arc<dyn ConnectionFilter>>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) events: Arc<dyn EventSink>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            authenticator: None,
            filter: None,
            connector: Arc::new(DirectConnector),
            events: Arc::new(NullSink),
        }
    }
}

impl ServerOptions {
    /// new yields the default bundle: no authentication, no filter,
    /// direct TCP outbound, discarded events
    pub fn new() -> Self {
        Self::default()
    }

    /// with_auth requires RFC 1929 username/password authentication
    pub fn with_auth(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// with_filter vets every CONNECT destination before dialing out
    pub fn with_filter(mut self, filter: impl ConnectionFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// with_connector overrides the default direct TCP outbound
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// with_events subscribes a sink to session lifecycle events
    pub fn with_events(mut self, events: impl EventSink + 'static) -> Self {
        self.events = Arc::new(events);
        self
    }
}

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    options: ServerOptions,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Default for Socks5Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type; the default
    /// configuration accepts unauthenticated clients and connects
    /// directly over TCP
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            options: ServerOptions::default(),
            shutdown,
            accept_task: None,
            local_addr: None,
        }
    }

    /// with_options swaps in a pre-built configuration bundle
    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// with_auth requires RFC 1929 username/password authentication
    pub fn with_auth(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.options = self.options.with_auth(authenticator);
        self
    }

    /// with_filter vets every CONNECT destination before dialing out
    pub fn with_filter(mut self, filter: impl ConnectionFilter + 'static) -> Self {
        self.options = self.options.with_filter(filter);
        self
    }

    /// with_connector overrides the default direct TCP outbound
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.options = self.options.with_connector(connector);
        self
    }

    /// with_events subscribes a sink to session lifecycle events
    pub fn with_events(mut self, events: impl EventSink + 'static) -> Self {
        self.options = self.options.with_events(events);
        self
    }

    /// listen binds to the address (port 0 = OS-assigned), spawns the
    /// accept loop, and returns the bound address; panics when called
    /// twice
    pub async fn listen<A: ToSocketAddrs>(&mut self, addr: A) -> Result<SocketAddr> {
        if self.accept_task.is_some() {
            panic!("listen can only be called once");
        }

        // Instantiate tokio listener
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {:?}", local_addr);

        let options = Arc::new(self.options.clone());
        let shutdown_rx = self.shutdown.subscribe();
        self.accept_task = Some(tokio::spawn(accept_loop(listener, options, shutdown_rx)));
        self.local_addr = Some(local_addr);

        Ok(local_addr)
    }

    /// local_addr returns the bound address while listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// close refuses new connections, ends every active session, and
    /// waits until all of them have released their sockets
    pub async fn close(&mut self) -> Result<()> {
        let _ = self.shutdown.send(true);

        if let Some(task) = self.accept_task.take() {
            task.await.context("accept loop panicked")?;
        }
        self.local_addr = None;

        Ok(())
    }
}

/// accept_loop owns the listener and the registry of running session
/// tasks; membership changes only here, on accept and on reap
async fn accept_loop(
    listener: TcpListener,
    options: Arc<ServerOptions>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((inbound, peer_addr)) => {
                    info!("new client: {}", peer_addr);

                    let options = options.clone();
                    let mut shutdown = shutdown_rx.clone();
                    sessions.spawn(async move {
                        let session = Session::new(inbound, peer_addr, options);
                        tokio::select! {
                            result = session.run() => {
                                if let Err(e) = result {
                                    error!("connection error: {e:#}");
                                }
                            }
                            _ = shutdown.changed() => {
                                debug!("session for {peer_addr} ended by close");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {e}");
                }
            },
            _ = shutdown_rx.changed() => break,
            // Reap finished sessions so the registry does not grow
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    // Stop accepting before waiting out the sessions
    drop(listener);
    while sessions.join_next().await.is_some() {}
    debug!("accept loop drained");
}
