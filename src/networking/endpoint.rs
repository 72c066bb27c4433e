use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;

use crate::constants::STREAM_PORT_OFFSET;

///
/// Endpoint represents a "peer contact": the host and UDP port another peer
/// listens on for datagrams. The same value keys the location registry, so
/// re-advertisements from one peer collapse to a single entry.
///
/// Note: only the UDP endpoint travels on the wire. The TCP stream port is
/// always derived from it by a fixed offset.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error)]
#[error("malformed endpoint '{0}', expected <host>:<port>")]
pub struct EndpointParseError(String);

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// The TCP port this peer accepts chunk streams on.
    pub fn stream_port(&self) -> u16 {
        self.port + STREAM_PORT_OFFSET
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::new(addr.ip().to_string(), addr.port())
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError(s.to_string()))?;
        if host.is_empty() {
            return Err(EndpointParseError(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError(s.to_string()))?;
        Ok(Endpoint::new(host, port))
    }
}
