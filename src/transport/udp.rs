//! UDP transport for DNS queries.
//!
//! Every datagram is handled in its own task, so a query waiting on an
//! external server never delays the next one.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dns::{HEADER_LEN, message_id};
use crate::error::Result;
use crate::resolver::Resolver;

use super::{MAX_DNS_PACKET_SIZE, Protocol};

/// UDP listener for one sandbox resolver.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive queries until `shutdown` is cancelled.
    pub async fn run(self, resolver: Arc<Resolver>, shutdown: CancellationToken) {
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

        loop {
            let (len, src) = tokio::select! {
                _ = shutdown.cancelled() => return,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "UDP recv error");
                        continue;
                    }
                },
            };

            // Nothing to reply to without a transaction id.
            if len < 2 {
                debug!(client = %src, len, "UDP datagram too short to answer");
                continue;
            }

            let query = buf[..len].to_vec();
            let socket = Arc::clone(&self.socket);
            let resolver = Arc::clone(&resolver);
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                let response = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    response = resolver.serve(&query, Protocol::Udp) => response,
                };
                if let Err(e) = socket.send_to(&response, src).await {
                    debug!(error = %e, client = %src, "UDP response error");
                }
            });
        }
    }
}

/// Send `query` on a connected socket and wait for the matching response.
///
/// Datagrams with a different transaction id are discarded. The caller
/// bounds the wait.
pub async fn exchange(socket: &UdpSocket, query: &[u8]) -> Result<Vec<u8>> {
    socket.send(query).await?;

    let expected = message_id(query);
    let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let len = socket.recv(&mut buf).await?;
        if len < HEADER_LEN {
            continue;
        }
        if message_id(&buf[..len]) != expected {
            debug!("discarding UDP response with stale id");
            continue;
        }
        buf.truncate(len);
        return Ok(buf);
    }
}
