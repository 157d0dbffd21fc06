//! Server address parsing (`host:port`)

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let invalid = |reason| Error::InvalidEndpoint {
            input: input.to_string(),
            reason,
        };
        let s = input.trim();

        // [v6addr]:port
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (h, after) = rest.split_once(']').ok_or_else(|| invalid("unclosed '['"))?;
            let p = after.strip_prefix(':').ok_or_else(|| invalid("missing port"))?;
            (h, p)
        } else {
            let (h, p) = s.split_once(':').ok_or_else(|| invalid("missing port"))?;
            if p.contains(':') {
                return Err(invalid("too many ':' (bracket IPv6 hosts)"));
            }
            (h, p)
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("port is not a number in 1-65535"))?;
        if port == 0 {
            return Err(invalid("port is not a number in 1-65535"));
        }
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
