use std::{
    fmt::{Display, Formatter},
    net::SocketAddr,
    result,
    str::FromStr,
};

use anyhow::{anyhow, Error, Result};
use serde::{Deserialize, Serialize};

use crate::util::string_to_socket;

/// A peer is identified by its advertised host and QUIC port, nothing else.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Peer {
    pub host: String,
    pub port: u16,
}

impl Peer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        string_to_socket(&self.to_string())
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut Formatter) -> result::Result<(), std::fmt::Error> {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Peer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.rsplit_once(':').ok_or(anyhow!("invalid peer address {s}"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        if host.is_empty() {
            return Err(anyhow!("invalid peer address {s}"));
        }

        let port = port.parse::<u16>().map_err(|e| anyhow!("invalid port in {s}: {e}"))?;

        Ok(Self::new(host, port))
    }
}
