//! Lifecycle events published by the server.
//!
//! Events are a tagged union delivered synchronously to a caller
//! supplied sink; emission is fire-and-forget and the default sink
//! discards everything.

use crate::address::Destination;
use crate::protocol::ReplyCode;
use std::net::SocketAddr;

/// Event represents one observable moment in a session's lifecycle.
/// Payloads borrow from the session so that high-volume variants
/// (ProxyData) cost nothing when the sink discards them.
#[derive(Debug)]
pub enum Event<'a> {
    /// A client connection was accepted and entered method negotiation
    Handshake { peer: SocketAddr },

    /// Credentials were accepted for this session
    Authenticate { username: &'a str },

    /// Credentials were rejected or the authenticator errored
    AuthenticateError {
        username: &'a str,
        error: &'a anyhow::Error,
    },

    /// The connection filter rejected a destination
    ConnectionFilter {
        destination: &'a Destination,
        origin: SocketAddr,
        error: &'a anyhow::Error,
    },

    /// The outbound connection was established; emitted exactly once
    /// per successful CONNECT
    ProxyConnect { destination: &'a Destination },

    /// A chunk of relayed bytes; may be high-volume
    ProxyData { from_client: bool, data: &'a [u8] },

    /// Relay finished and both streams were released
    ProxyDisconnect {
        origin: SocketAddr,
        destination: &'a Destination,
        had_error: bool,
    },

    /// An internal error was caught inside the session
    ProxyError { error: &'a anyhow::Error },

    /// A ConnectReply was written for this request
    ProxyEnd {
        reply_code: ReplyCode,
        destination: &'a Destination,
    },
}

/// EventSink receives session events. Implementations must not block;
/// the session does not wait on the sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event<'_>);
}

/// NullSink discards every event; the default when no sink is set
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event<'_>) {}
}

/// TraceSink forwards events to the `tracing` subscriber. Used by the
/// CLI so that every lifecycle step shows up in the log output.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceSink;

impl EventSink for TraceSink {
    fn emit(&self, event: Event<'_>) {
        match event {
            Event::Handshake { peer } => tracing::debug!("handshake from {peer}"),
            Event::Authenticate { username } => {
                tracing::info!("authenticated user {username:?}")
            }
            Event::AuthenticateError { username, error } => {
                tracing::warn!("authentication failed for {username:?}: {error}")
            }
            Event::ConnectionFilter {
                destination,
                origin,
                error,
            } => tracing::warn!("filter rejected {origin} -> {destination}: {error}"),
            Event::ProxyConnect { destination } => {
                tracing::info!("connected to {destination}")
            }
            Event::ProxyData { from_client, data } => {
                tracing::trace!(
                    "{} {} bytes",
                    if from_client { "c->s" } else { "s->c" },
                    data.len()
                )
            }
            Event::ProxyDisconnect {
                origin,
                destination,
                had_error,
            } => tracing::info!(
                "relay done {origin} -> {destination} (error: {had_error})"
            ),
            Event::ProxyError { error } => tracing::error!("session error: {error}"),
            Event::ProxyEnd {
                reply_code,
                destination,
            } => tracing::debug!("replied {reply_code:?} for {destination}"),
        }
    }
}
