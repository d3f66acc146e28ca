//! Pure decode/encode for the framed SOCKS5 messages (RFC 1928) and
//! the username/password sub-negotiation (RFC 1929).
//!
//! Nothing here performs I/O. Decoders take a byte buffer holding at
//! least one full frame and return the parsed message plus the number
//! of bytes consumed; the session layer is responsible for reading
//! exactly one frame off the socket before calling in.

use crate::address::{Address, Destination};
use crate::protocol::{AUTH_VERSION, AddressType, AuthStatus, RSV, ReplyCode, Version};
use thiserror::Error;

/// DecodeError enumerates the ways a frame can fail to parse
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too short for frame")]
    ShortBuffer,

    #[error("bad protocol version: {0:#04x}")]
    BadVersion(u8),

    #[error("unsupported address type: {0:#04x}")]
    BadAtyp(u8),

    #[error("bad length field")]
    BadLength,

    #[error("reserved byte must be zero, got {0:#04x}")]
    BadReserved(u8),
}

/// Greeting is the client's opening method-negotiation frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

/// AuthRequest is the RFC 1929 credential frame. Credentials are kept
/// as raw bytes; the authenticator decides how to interpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

/// ConnectRequest is the client's command frame. The command byte is
/// kept raw so the session can answer unknown values with
/// COMMAND_NOT_SUPPORTED rather than a parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub command: u8,
    pub destination: Destination,
}

/// ConnectReply mirrors the server's answer to a ConnectRequest;
/// decoded by the chaining client side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReply {
    pub reply_code: u8,
    pub bound: Destination,
}

// =========
// DECODERS
// =========

/// decode_greeting parses VER NMETHODS METHODS[..]
pub fn decode_greeting(buf: &[u8]) -> Result<(Greeting, usize), DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::ShortBuffer);
    }
    if buf[0] != Version::SOCKS5 as u8 {
        return Err(DecodeError::BadVersion(buf[0]));
    }

    let nmethods = buf[1] as usize;
    if buf.len() < 2 + nmethods {
        return Err(DecodeError::ShortBuffer);
    }

    let greeting = Greeting {
        methods: buf[2..2 + nmethods].to_vec(),
    };
    Ok((greeting, 2 + nmethods))
}

/// decode_auth_request parses VER ULEN UNAME PLEN PASSWD
pub fn decode_auth_request(buf: &[u8]) -> Result<(AuthRequest, usize), DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::ShortBuffer);
    }
    if buf[0] != AUTH_VERSION {
        return Err(DecodeError::BadVersion(buf[0]));
    }

    let ulen = buf[1] as usize;
    if buf.len() < 2 + ulen + 1 {
        return Err(DecodeError::ShortBuffer);
    }

    let plen = buf[2 + ulen] as usize;
    let total = 2 + ulen + 1 + plen;
    if buf.len() < total {
        return Err(DecodeError::ShortBuffer);
    }

    let request = AuthRequest {
        username: buf[2..2 + ulen].to_vec(),
        password: buf[3 + ulen..total].to_vec(),
    };
    Ok((request, total))
}

/// decode_connect_request parses VER CMD RSV ATYP DST.ADDR DST.PORT
pub fn decode_connect_request(buf: &[u8]) -> Result<(ConnectRequest, usize), DecodeError> {
    if buf.len() < 4 {
        return Err(DecodeError::ShortBuffer);
    }
    if buf[0] != Version::SOCKS5 as u8 {
        return Err(DecodeError::BadVersion(buf[0]));
    }
    if buf[2] != RSV {
        return Err(DecodeError::BadReserved(buf[2]));
    }

    let command = buf[1];
    let (destination, addr_len) = decode_address(&buf[3..])?;

    Ok((ConnectRequest { command, destination }, 3 + addr_len))
}

/// decode_connect_reply parses VER REP RSV ATYP BND.ADDR BND.PORT
pub fn decode_connect_reply(buf: &[u8]) -> Result<(ConnectReply, usize), DecodeError> {
    if buf.len() < 4 {
        return Err(DecodeError::ShortBuffer);
    }
    if buf[0] != Version::SOCKS5 as u8 {
        return Err(DecodeError::BadVersion(buf[0]));
    }

    let reply_code = buf[1];
    let (bound, addr_len) = decode_address(&buf[3..])?;

    Ok((ConnectReply { reply_code, bound }, 3 + addr_len))
}

/// decode_method_reply parses the 2-byte VER METHOD selection frame
pub fn decode_method_reply(buf: &[u8]) -> Result<(u8, usize), DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::ShortBuffer);
    }
    if buf[0] != Version::SOCKS5 as u8 {
        return Err(DecodeError::BadVersion(buf[0]));
    }
    Ok((buf[1], 2))
}

/// decode_auth_reply parses the 2-byte VER STATUS sub-negotiation reply
pub fn decode_auth_reply(buf: &[u8]) -> Result<(u8, usize), DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::ShortBuffer);
    }
    if buf[0] != AUTH_VERSION {
        return Err(DecodeError::BadVersion(buf[0]));
    }
    Ok((buf[1], 2))
}

/// decode_address parses ATYP DST.ADDR DST.PORT from the tail of a
/// request or reply frame
fn decode_address(buf: &[u8]) -> Result<(Destination, usize), DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::ShortBuffer);
    }

    let atyp = AddressType::from_byte(buf[0]).ok_or(DecodeError::BadAtyp(buf[0]))?;

    let (body, addr_end) = match atyp {
        AddressType::IPv4 => {
            if buf.len() < 1 + 4 + 2 {
                return Err(DecodeError::ShortBuffer);
            }
            (&buf[1..5], 5)
        }
        AddressType::DomainName => {
            if buf.len() < 2 {
                return Err(DecodeError::ShortBuffer);
            }
            let len = buf[1] as usize;
            if len == 0 {
                return Err(DecodeError::BadLength);
            }
            if buf.len() < 2 + len + 2 {
                return Err(DecodeError::ShortBuffer);
            }
            (&buf[2..2 + len], 2 + len)
        }
        AddressType::IPv6 => {
            if buf.len() < 1 + 16 + 2 {
                return Err(DecodeError::ShortBuffer);
            }
            (&buf[1..17], 17)
        }
    };

    let address = Address::from_wire(atyp, body).map_err(|_| DecodeError::BadLength)?;
    let port = u16::from_be_bytes([buf[addr_end], buf[addr_end + 1]]);

    Ok((
        Destination { address, port },
        addr_end + 2,
    ))
}

// =========
// ENCODERS
// =========

/// encode_method_reply builds the 2-byte VER METHOD selection frame.
/// NO_ACCEPTABLE (0xFF) goes in the method byte, not a reply code.
pub fn encode_method_reply(method: u8) -> [u8; 2] {
    [Version::SOCKS5 as u8, method]
}

/// encode_auth_reply builds the 2-byte VER STATUS sub-negotiation reply
pub fn encode_auth_reply(status: AuthStatus) -> [u8; 2] {
    [AUTH_VERSION, status as u8]
}

/// encode_short_failure builds the bare VER REP failure reply used
/// when no request context exists yet
pub fn encode_short_failure() -> [u8; 2] {
    [Version::SOCKS5 as u8, ReplyCode::ServerFailure as u8]
}

/// encode_connect_reply builds VER REP RSV ATYP BND.ADDR BND.PORT,
/// echoing the atyp shape of the bound destination
pub fn encode_connect_reply(reply_code: ReplyCode, bound: &Destination) -> Vec<u8> {
    let mut reply = vec![Version::SOCKS5 as u8, reply_code as u8, RSV];
    reply.push(bound.address.atyp() as u8);
    reply.extend_from_slice(&bound.address.wire_bytes());
    reply.extend_from_slice(&bound.port.to_be_bytes());
    reply
}

/// encode_greeting builds the client-side method-negotiation frame;
/// used by the chaining connector and round-trip tests
pub fn encode_greeting(methods: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + methods.len());
    frame.push(Version::SOCKS5 as u8);
    frame.push(methods.len() as u8);
    frame.extend_from_slice(methods);
    frame
}

/// encode_auth_request builds the client-side RFC 1929 credential frame
pub fn encode_auth_request(username: &[u8], password: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(3 + username.len() + password.len());
    frame.push(AUTH_VERSION);
    frame.push(username.len() as u8);
    frame.extend_from_slice(username);
    frame.push(password.len() as u8);
    frame.extend_from_slice(password);
    frame
}

/// encode_connect_request builds the client-side command frame
pub fn encode_connect_request(command: u8, destination: &Destination) -> Vec<u8> {
    let mut frame = vec![Version::SOCKS5 as u8, command, RSV];
    frame.push(destination.address.atyp() as u8);
    frame.extend_from_slice(&destination.address.wire_bytes());
    frame.extend_from_slice(&destination.port.to_be_bytes());
    frame
}
