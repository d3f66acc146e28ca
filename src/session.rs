//! Per-connection SOCKS5 protocol driver.
//!
//! A session consumes exactly one framed message at a time, writes
//! the reply for it, and only then arms the read for the next frame.
//! Every failure branch produces at most one reply and closes; once
//! the relay starts the inbound bytes are opaque.

use crate::address::{Address, Destination};
use crate::auth::Authenticator;
use crate::codec::{self, DecodeError};
use crate::connector::{BoxedDuplex, Connector, reply_for_connect_error};
use crate::events::{Event, EventSink};
use crate::protocol::{
    AUTH_VERSION, AddressType, AuthMethod, AuthStatus, Command, ReplyCode, Version,
};
use crate::relay;
use crate::server::{ConnectionFilter, ServerOptions};
use anyhow::{Result, anyhow, bail};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Phase tracks where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Greeting,
    AwaitingAuth,
    AwaitingRequest,
    Connecting,
    Relaying,
    Closed,
}

/// Method selection outcome; carries the authenticator so the auth
/// phase never has to re-check the option
enum MethodChoice {
    NoAuth,
    UserPass(Arc<dyn Authenticator>),
    NoneAcceptable,
}

/// Session owns one accepted client connection from greeting to close
pub struct Session<S> {
    stream: S,
    peer: SocketAddr,
    options: Arc<ServerOptions>,
    phase: Phase,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S, peer: SocketAddr, options: Arc<ServerOptions>) -> Self {
        Self {
            stream,
            peer,
            options,
            phase: Phase::Greeting,
        }
    }

    /// run drives the session to completion. Protocol rejections
    /// (bad credentials, filtered or unsupported requests) resolve to
    /// Ok after their reply; only I/O and malformed-frame failures
    /// surface as errors.
    pub async fn run(mut self) -> Result<()> {
        match self.drive().await {
            Ok(Some((outbound, destination))) => self.relay(outbound, destination).await,
            Ok(None) => Ok(()),
            Err(error) => {
                self.options.events.emit(Event::ProxyError { error: &error });
                Err(error)
            }
        }
    }

    /// drive walks the pre-relay phases; resolves to the outbound
    /// stream once a CONNECT succeeds, or None when the session was
    /// answered and closed without one
    async fn drive(&mut self) -> Result<Option<(BoxedDuplex, Destination)>> {
        self.options.events.emit(Event::Handshake { peer: self.peer });

        // Greeting
        let frame = self.read_greeting_frame().await?;
        let greeting = match codec::decode_greeting(&frame) {
            Ok((greeting, _)) => greeting,
            Err(error) => {
                self.stream.write_all(&codec::encode_short_failure()).await?;
                self.phase = Phase::Closed;
                return Err(anyhow!(error).context("malformed greeting"));
            }
        };

        let choice = self.select_method(&greeting.methods);
        let method_byte = match &choice {
            MethodChoice::NoAuth => AuthMethod::NoAuth as u8,
            MethodChoice::UserPass(_) => AuthMethod::UserPass as u8,
            MethodChoice::NoneAcceptable => AuthMethod::NoAcceptable as u8,
        };
        self.stream
            .write_all(&codec::encode_method_reply(method_byte))
            .await?;

        match choice {
            MethodChoice::NoAuth => {
                self.phase = Phase::AwaitingRequest;
            }
            MethodChoice::UserPass(authenticator) => {
                self.phase = Phase::AwaitingAuth;
                if !self.authenticate(authenticator).await? {
                    self.phase = Phase::Closed;
                    return Ok(None);
                }
                self.phase = Phase::AwaitingRequest;
            }
            MethodChoice::NoneAcceptable => {
                debug!("no acceptable auth method from {}", self.peer);
                self.phase = Phase::Closed;
                return Ok(None);
            }
        }
        trace!("{} negotiated method {method_byte:#04x}", self.peer);

        // Request
        let frame = self.read_request_frame().await?;
        let request = match codec::decode_connect_request(&frame) {
            Ok((request, _)) => request,
            Err(DecodeError::BadAtyp(atyp)) => {
                self.send_reply(ReplyCode::AddrTypeNotSupported, &zero_destination())
                    .await?;
                self.phase = Phase::Closed;
                return Err(anyhow!("unsupported address type {atyp:#04x}"));
            }
            Err(error) => {
                self.stream.write_all(&codec::encode_short_failure()).await?;
                self.phase = Phase::Closed;
                return Err(anyhow!(error).context("malformed request"));
            }
        };
        let destination = request.destination;

        if request.command != Command::Connect as u8 {
            debug!(
                "{} sent unsupported command {:#04x}",
                self.peer, request.command
            );
            self.send_reply(ReplyCode::CommandNotSupported, &destination)
                .await?;
            self.phase = Phase::Closed;
            return Ok(None);
        }

        // Connection filter
        if let Some(filter) = self.options.filter.clone() {
            if let Err(error) = filter.allow(&destination, self.peer).await {
                self.options.events.emit(Event::ConnectionFilter {
                    destination: &destination,
                    origin: self.peer,
                    error: &error,
                });
                self.send_reply(ReplyCode::ConnectionNotAllowed, &destination)
                    .await?;
                self.phase = Phase::Closed;
                return Ok(None);
            }
        }

        // Connecting
        self.phase = Phase::Connecting;
        let host = destination.address.host();
        match self
            .options
            .connector
            .connect(&host, destination.port)
            .await
        {
            Ok(outbound) => {
                self.options.events.emit(Event::ProxyConnect {
                    destination: &destination,
                });
                self.send_reply(ReplyCode::Succeeded, &destination).await?;
                Ok(Some((outbound, destination)))
            }
            Err(error) => {
                let code = reply_for_connect_error(&error);
                debug!("connect to {destination} failed: {error} -> {code:?}");
                self.send_reply(code, &destination).await?;
                self.phase = Phase::Closed;
                Ok(None)
            }
        }
    }

    /// relay hands both streams to the splice loop and reports the
    /// disconnect once it returns
    async fn relay(mut self, outbound: BoxedDuplex, destination: Destination) -> Result<()> {
        self.phase = Phase::Relaying;
        let events = self.options.events.clone();
        let peer = self.peer;

        let outcome = relay::splice(self.stream, outbound, events.clone()).await;

        debug!(
            "relay for {peer} -> {destination} done: {} bytes up, {} bytes down",
            outcome.client_to_remote, outcome.remote_to_client
        );
        events.emit(Event::ProxyDisconnect {
            origin: peer,
            destination: &destination,
            had_error: outcome.had_error,
        });
        Ok(())
    }

    /// RFC 1929 sub-negotiation; true means the session may proceed
    async fn authenticate(&mut self, authenticator: Arc<dyn Authenticator>) -> Result<bool> {
        let frame = self.read_auth_frame().await?;
        let request = match codec::decode_auth_request(&frame) {
            Ok((request, _)) => request,
            Err(error) => {
                // Still inside the RFC 1929 exchange, so the failure
                // reply keeps the sub-negotiation framing
                self.stream
                    .write_all(&codec::encode_auth_reply(AuthStatus::Failure))
                    .await?;
                return Err(anyhow!(error).context("malformed auth request"));
            }
        };

        let parsed = match (
            std::str::from_utf8(&request.username),
            std::str::from_utf8(&request.password),
        ) {
            (Ok(username), Ok(password)) => Some((username, password)),
            _ => None,
        };

        let Some((username, password)) = parsed else {
            self.stream
                .write_all(&codec::encode_auth_reply(AuthStatus::Failure))
                .await?;
            bail!("credentials are not valid UTF-8");
        };

        match authenticator.authenticate(username, password, self.peer).await {
            Ok(()) => {
                self.options.events.emit(Event::Authenticate { username });
                self.stream
                    .write_all(&codec::encode_auth_reply(AuthStatus::Success))
                    .await?;
                Ok(true)
            }
            Err(error) => {
                self.options.events.emit(Event::AuthenticateError {
                    username,
                    error: &error,
                });
                self.stream
                    .write_all(&codec::encode_auth_reply(AuthStatus::Failure))
                    .await?;
                debug!("rejected credentials for {username:?} from {}", self.peer);
                Ok(false)
            }
        }
    }

    /// select_method applies the RFC 1928 negotiation rule: the
    /// configured authenticator demands USER_PASS, its absence
    /// demands NO_AUTH, anything else is unacceptable
    fn select_method(&self, methods: &[u8]) -> MethodChoice {
        match &self.options.authenticator {
            Some(authenticator) => {
                if methods.contains(&(AuthMethod::UserPass as u8)) {
                    MethodChoice::UserPass(authenticator.clone())
                } else {
                    MethodChoice::NoneAcceptable
                }
            }
            None => {
                if methods.contains(&(AuthMethod::NoAuth as u8)) {
                    MethodChoice::NoAuth
                } else {
                    MethodChoice::NoneAcceptable
                }
            }
        }
    }

    /// send_reply writes one ConnectReply echoing the request's atyp
    /// shape and records it as the request's outcome
    async fn send_reply(&mut self, code: ReplyCode, destination: &Destination) -> Result<()> {
        let frame = codec::encode_connect_reply(code, destination);
        self.stream.write_all(&frame).await?;
        self.options.events.emit(Event::ProxyEnd {
            reply_code: code,
            destination,
        });
        Ok(())
    }

    // Frame readers: each pulls exactly one frame off the socket and
    // leaves validation to the codec. When a leading byte already
    // rules the frame out they stop early so a garbage length byte
    // cannot make the session wait for data that never comes.

    async fn read_greeting_frame(&mut self) -> Result<Vec<u8>> {
        let mut head = [0u8; 2];
        self.stream.read_exact(&mut head).await?;
        if head[0] != Version::SOCKS5 as u8 {
            return Ok(head.to_vec());
        }

        let mut frame = vec![0u8; 2 + head[1] as usize];
        frame[..2].copy_from_slice(&head);
        self.stream.read_exact(&mut frame[2..]).await?;
        Ok(frame)
    }

    async fn read_auth_frame(&mut self) -> Result<Vec<u8>> {
        let mut head = [0u8; 2];
        self.stream.read_exact(&mut head).await?;
        if head[0] != AUTH_VERSION {
            return Ok(head.to_vec());
        }

        let ulen = head[1] as usize;
        let mut frame = vec![0u8; 2 + ulen + 1];
        frame[..2].copy_from_slice(&head);
        self.stream.read_exact(&mut frame[2..]).await?;

        let plen = frame[2 + ulen] as usize;
        let start = frame.len();
        frame.resize(start + plen, 0);
        self.stream.read_exact(&mut frame[start..]).await?;
        Ok(frame)
    }

    async fn read_request_frame(&mut self) -> Result<Vec<u8>> {
        let mut head = [0u8; 4];
        self.stream.read_exact(&mut head).await?;
        if head[0] != Version::SOCKS5 as u8 || head[2] != crate::protocol::RSV {
            return Ok(head.to_vec());
        }

        let body_len = match AddressType::from_byte(head[3]) {
            Some(AddressType::IPv4) => 4 + 2,
            Some(AddressType::IPv6) => 16 + 2,
            Some(AddressType::DomainName) => {
                let mut len = [0u8; 1];
                self.stream.read_exact(&mut len).await?;
                let mut frame = head.to_vec();
                frame.push(len[0]);
                if len[0] == 0 {
                    return Ok(frame);
                }
                let start = frame.len();
                frame.resize(start + len[0] as usize + 2, 0);
                self.stream.read_exact(&mut frame[start..]).await?;
                return Ok(frame);
            }
            None => return Ok(head.to_vec()),
        };

        let mut frame = vec![0u8; 4 + body_len];
        frame[..4].copy_from_slice(&head);
        self.stream.read_exact(&mut frame[4..]).await?;
        Ok(frame)
    }

    /// phase exposes the lifecycle position, mainly for diagnostics
    pub fn phase(&self) -> Phase {
        self.phase
    }
}

/// Zero-valued IPv4 destination used when a reply must be sent before
/// any address was parsed
fn zero_destination() -> Destination {
    Destination {
        address: Address::IPv4([0, 0, 0, 0]),
        port: 0,
    }
}
