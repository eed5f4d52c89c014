//! Resolver configuration.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

pub const DEFAULT_DNS_PORT: u16 = 53;

/// At most this many external servers are tried per query.
pub const MAX_EXT_SERVERS: usize = 3;

/// Per-attempt timeout for external servers.
pub const DEFAULT_EXT_TIMEOUT: Duration = Duration::from_secs(4);

/// Queries handled concurrently before new ones are refused with SERVFAIL.
pub const DEFAULT_MAX_CONCURRENT: usize = 1024;

/// An external DNS server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtDnsEntry {
    pub addr: IpAddr,
    pub port: u16,
    /// Reachable only through the host's loopback interface.
    pub host_loopback: bool,
}

impl ExtDnsEntry {
    pub fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            port: DEFAULT_DNS_PORT,
            host_loopback: false,
        }
    }

    pub fn host_loopback(addr: IpAddr) -> Self {
        Self {
            host_loopback: true,
            ..Self::new(addr)
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

/// Parses `IP`, `IP:PORT` or `[IPv6]:PORT`, optionally prefixed with
/// `host:` to mark a host-loopback server.
impl FromStr for ExtDnsEntry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host_loopback, rest) = match s.strip_prefix("host:") {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (addr, port) = if let Ok(sa) = rest.parse::<SocketAddr>() {
            (sa.ip(), sa.port())
        } else if let Ok(ip) = rest.parse::<IpAddr>() {
            (ip, DEFAULT_DNS_PORT)
        } else {
            return Err(Error::InvalidParameter(format!("invalid DNS server address: {s}")));
        };

        Ok(Self {
            addr,
            port,
            host_loopback,
        })
    }
}

impl fmt::Display for ExtDnsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host_loopback {
            f.write_str("host:")?;
        }
        write!(f, "{}", self.socket_addr())
    }
}

/// Settings for one sandbox's resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Forward local misses to the external servers.
    pub proxy_dns: bool,
    /// Tried in order; only the first [`MAX_EXT_SERVERS`] are used.
    pub ext_servers: Vec<ExtDnsEntry>,
    pub timeout: Duration,
    pub max_concurrent: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            proxy_dns: true,
            ext_servers: Vec::new(),
            timeout: DEFAULT_EXT_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}
