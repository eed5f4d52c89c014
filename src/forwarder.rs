//! External forwarder.
//!
//! Relays queries the sandbox cannot answer to the configured external
//! servers, one at a time and in configured order. The first usable answer
//! wins; timeouts, transport errors and SERVFAIL/REFUSED answers move on to
//! the next server.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, warn};

use crate::config::{ExtDnsEntry, MAX_EXT_SERVERS};
use crate::dns::{Rcode, message_id, response_rcode};
use crate::error::{Error, Result};
use crate::transport::{Protocol, tcp, udp};

/// Opens outbound sockets in a particular network namespace.
///
/// The resolver normally runs inside the sandbox's namespace; host-loopback
/// servers must be reached from the host's namespace instead, so the
/// forwarder takes one dialer for each.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// A UDP socket connected to `server`.
    async fn udp(&self, server: SocketAddr) -> io::Result<UdpSocket>;

    async fn tcp(&self, server: SocketAddr) -> io::Result<TcpStream>;
}

/// Dials from whatever namespace the calling thread is in.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
    async fn udp(&self, server: SocketAddr) -> io::Result<UdpSocket> {
        let local: SocketAddr = match server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        Ok(socket)
    }

    async fn tcp(&self, server: SocketAddr) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(server).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Ordered list of external servers with their dialers.
pub struct Forwarder {
    servers: Vec<ExtDnsEntry>,
    timeout: Duration,
    sandbox_dialer: Arc<dyn Dialer>,
    host_dialer: Arc<dyn Dialer>,
}

impl Forwarder {
    /// Keeps the first [`MAX_EXT_SERVERS`] entries.
    pub fn new(mut servers: Vec<ExtDnsEntry>, timeout: Duration) -> Self {
        if servers.len() > MAX_EXT_SERVERS {
            warn!(
                configured = servers.len(),
                max = MAX_EXT_SERVERS,
                "ignoring extra external DNS servers"
            );
            servers.truncate(MAX_EXT_SERVERS);
        }

        Self {
            servers,
            timeout,
            sandbox_dialer: Arc::new(DirectDialer),
            host_dialer: Arc::new(DirectDialer),
        }
    }

    pub fn with_dialers(mut self, sandbox: Arc<dyn Dialer>, host: Arc<dyn Dialer>) -> Self {
        self.sandbox_dialer = sandbox;
        self.host_dialer = host;
        self
    }

    pub fn servers(&self) -> &[ExtDnsEntry] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Address to dial for `entry` and the namespace to dial it from.
    ///
    /// Host-loopback entries go through the host dialer and always target a
    /// loopback address of their family.
    fn target(&self, entry: &ExtDnsEntry) -> (SocketAddr, &dyn Dialer) {
        if !entry.host_loopback {
            return (entry.socket_addr(), self.sandbox_dialer.as_ref());
        }

        let addr = match entry.addr {
            ip if ip.is_loopback() => ip,
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        (SocketAddr::new(addr, entry.port), self.host_dialer.as_ref())
    }

    /// One attempt against one server, bounded by the per-attempt timeout.
    ///
    /// Upstream SERVFAIL and REFUSED are reported as errors so the caller
    /// can move on; every other answer is returned untouched.
    pub async fn send(&self, entry: &ExtDnsEntry, query: &[u8], protocol: Protocol) -> Result<Vec<u8>> {
        let (server, dialer) = self.target(entry);

        let response = tokio::time::timeout(self.timeout, exchange(dialer, server, query, protocol))
            .await
            .map_err(|_| Error::Timeout {
                server,
                timeout: self.timeout,
            })??;

        let Some(rcode) = response_rcode(&response) else {
            return Err(Error::Malformed("upstream response shorter than header"));
        };

        let expected = message_id(query).unwrap_or_default();
        let got = message_id(&response).unwrap_or_default();
        if expected != got {
            return Err(Error::IdMismatch { server, expected, got });
        }

        match rcode {
            Rcode::ServFail | Rcode::Refused => Err(Error::UpstreamRcode { server, rcode }),
            _ => Ok(response),
        }
    }

    /// Try each server once, in order, until one answers.
    pub async fn forward(&self, query: &[u8], protocol: Protocol) -> Result<Vec<u8>> {
        for entry in &self.servers {
            let start = Instant::now();
            match self.send(entry, query, protocol).await {
                Ok(response) => {
                    debug!(
                        server = %entry,
                        protocol = %protocol,
                        upstream_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "external server answered"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    debug!(server = %entry, protocol = %protocol, error = %e, "trying next external server");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Exhausted)
    }
}

async fn exchange(dialer: &dyn Dialer, server: SocketAddr, query: &[u8], protocol: Protocol) -> Result<Vec<u8>> {
    match protocol {
        Protocol::Udp => {
            let socket = dialer.udp(server).await?;
            udp::exchange(&socket, query).await
        }
        Protocol::Tcp => {
            let mut stream = dialer.tcp(server).await?;
            tcp::exchange(&mut stream, query).await
        }
    }
}
