//! Sandbox-local DNS server.
//!
//! Binds the UDP and TCP listeners for one resolver and runs them until
//! shut down.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::resolver::Resolver;
use crate::transport::{tcp::TcpTransport, udp::UdpTransport};

/// How often query statistics are logged.
pub const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Bound UDP and TCP listeners sharing one address.
pub struct DnsServer {
    udp: UdpTransport,
    tcp: TcpTransport,
}

impl DnsServer {
    /// Bind both listeners. With port 0 the TCP listener takes the port
    /// the UDP socket was given.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let udp = UdpTransport::bind(addr).await?;
        let tcp = TcpTransport::bind(udp.local_addr()?).await?;

        Ok(Self { udp, tcp })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// Serve queries with `resolver` until `shutdown` is cancelled.
    ///
    /// Cancellation also aborts queries still waiting on external servers.
    pub async fn run(self, resolver: Arc<Resolver>, shutdown: CancellationToken) {
        let addr = self.udp.local_addr().ok();
        info!(
            addr = ?addr,
            proxy = resolver.proxy_enabled(),
            servers = ?resolver.ext_servers().iter().map(ToString::to_string).collect::<Vec<_>>(),
            "sandbox DNS server listening"
        );

        futures::future::join3(
            self.udp.run(Arc::clone(&resolver), shutdown.clone()),
            self.tcp.run(Arc::clone(&resolver), shutdown.clone()),
            log_stats(Arc::clone(&resolver), shutdown),
        )
        .await;

        info!(addr = ?addr, "sandbox DNS server stopped");
    }
}

async fn log_stats(resolver: Arc<Resolver>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        let stats = resolver.stats_snapshot_and_reset();
        info!(
            requests = stats.requests,
            local = stats.local,
            forwarded = stats.forwarded,
            failed = stats.failed,
            malformed = stats.malformed,
            avg_response_ms = stats.avg_response_ms,
            "resolver stats"
        );
    }
}
