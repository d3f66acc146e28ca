use crate::protocol::AddressType;
use anyhow::{Result, anyhow};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Address represents a SOCKS5 destination address in one of the
/// three wire encodings: IPv4, domain name, or IPv6
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    IPv4([u8; 4]),
    DomainName(String),
    IPv6([u8; 16]),
}

impl Address {
    /// atyp returns the wire discriminator for this address
    pub fn atyp(&self) -> AddressType {
        match self {
            Address::IPv4(_) => AddressType::IPv4,
            Address::DomainName(_) => AddressType::DomainName,
            Address::IPv6(_) => AddressType::IPv6,
        }
    }

    /// from_wire parses the raw address bytes for the given atyp.
    /// For domains the length byte has already been consumed; `bytes`
    /// is the name itself.
    pub fn from_wire(atyp: AddressType, bytes: &[u8]) -> Result<Self> {
        match atyp {
            AddressType::IPv4 => {
                let octets: [u8; 4] = bytes
                    .try_into()
                    .map_err(|_| anyhow!("IPv4 address must be 4 bytes"))?;
                Ok(Address::IPv4(octets))
            }
            AddressType::DomainName => {
                if bytes.is_empty() || bytes.len() > 255 {
                    return Err(anyhow!("domain length out of range: {}", bytes.len()));
                }
                let name = String::from_utf8(bytes.to_vec())
                    .map_err(|e| anyhow!("invalid domain name: {e}"))?;
                Ok(Address::DomainName(name))
            }
            AddressType::IPv6 => {
                let octets: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| anyhow!("IPv6 address must be 16 bytes"))?;
                Ok(Address::IPv6(octets))
            }
        }
    }

    /// from_host parses a textual host back into the wire form for
    /// the given atyp; inverse of [`Address::host`]
    pub fn from_host(atyp: AddressType, host: &str) -> Result<Self> {
        match atyp {
            AddressType::IPv4 => {
                let ip: Ipv4Addr = host
                    .parse()
                    .map_err(|e| anyhow!("invalid IPv4 address {host:?}: {e}"))?;
                Ok(Address::IPv4(ip.octets()))
            }
            AddressType::DomainName => Address::from_wire(atyp, host.as_bytes()),
            AddressType::IPv6 => {
                let ip: Ipv6Addr = host
                    .parse()
                    .map_err(|e| anyhow!("invalid IPv6 address {host:?}: {e}"))?;
                Ok(Address::IPv6(ip.octets()))
            }
        }
    }

    /// from_text classifies a textual host the way a SOCKS5 client
    /// must: IP literals keep their native atyp, everything else is
    /// sent as a domain name.
    pub fn from_text(host: &str) -> Result<Self> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(Address::IPv4(ip.octets()));
        }
        if let Ok(ip) = host.parse::<Ipv6Addr>() {
            return Ok(Address::IPv6(ip.octets()));
        }
        Address::from_wire(AddressType::DomainName, host.as_bytes())
    }

    /// wire_bytes returns the address body as it appears on the wire.
    /// Domains are prefixed with their length byte.
    pub fn wire_bytes(&self) -> Vec<u8> {
        match self {
            Address::IPv4(octets) => octets.to_vec(),
            Address::DomainName(name) => {
                let mut bytes = Vec::with_capacity(1 + name.len());
                bytes.push(name.len() as u8);
                bytes.extend_from_slice(name.as_bytes());
                bytes
            }
            Address::IPv6(octets) => octets.to_vec(),
        }
    }

    /// host renders the textual form handed to the outbound connector.
    /// IPv6 is eight colon-separated hex groups with no `::`
    /// abbreviation; the connector re-parses it if needed.
    pub fn host(&self) -> String {
        match self {
            Address::IPv4(o) => format!("{}.{}.{}.{}", o[0], o[1], o[2], o[3]),
            Address::DomainName(name) => name.clone(),
            Address::IPv6(o) => {
                let groups: Vec<String> = o
                    .chunks_exact(2)
                    .map(|pair| format!("{:x}", u16::from_be_bytes([pair[0], pair[1]])))
                    .collect();
                groups.join(":")
            }
        }
    }
}

/// Destination pairs an address with the 16-bit port from the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address: Address,
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Address::IPv6(_) => write!(f, "[{}]:{}", self.address.host(), self.port),
            _ => write!(f, "{}:{}", self.address.host(), self.port),
        }
    }
}
