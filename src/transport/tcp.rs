//! TCP transport for DNS queries.
//!
//! TCP DNS messages are prefixed with a 2-byte length. A client may send
//! several queries on one connection; they are answered in order.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::resolver::Resolver;

use super::Protocol;

/// Connections idle longer than this are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP listener for one sandbox resolver.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled. Each connection is
    /// handled in a separate task.
    pub async fn run(self, resolver: Arc<Resolver>, shutdown: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => return,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((client, peer)) => {
                    let resolver = Arc::clone(&resolver);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            _ = handle_connection(client, resolver) => {}
                        }
                        debug!(client = %peer, "TCP connection closed");
                    });
                }
                Err(e) => {
                    warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
}

/// Answer queries on one connection until the client closes it or goes idle.
async fn handle_connection(mut client: TcpStream, resolver: Arc<Resolver>) {
    loop {
        let query = match tokio::time::timeout(IDLE_TIMEOUT, read_dns_message(&mut client)).await {
            Ok(Ok(Some(q))) => q,
            Ok(Ok(None)) | Err(_) => return,
            Ok(Err(e)) => {
                debug!(error = %e, "TCP read error");
                return;
            }
        };

        let response = resolver.serve(&query, Protocol::Tcp).await;
        if let Err(e) = write_dns_message(&mut client, &response).await {
            debug!(error = %e, "TCP write error");
            return;
        }
    }
}

/// Read one length-prefixed DNS message, without its prefix.
///
/// Returns `None` on a clean end of stream before the next message.
pub async fn read_dns_message<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 2];
    match stream.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let msg_len = u16::from_be_bytes(prefix) as usize;
    let mut buf = vec![0u8; msg_len];
    stream.read_exact(&mut buf).await?;

    Ok(Some(buf))
}

/// Write `message` with its 2-byte length prefix.
pub async fn write_dns_message<S: AsyncWrite + Unpin>(stream: &mut S, message: &[u8]) -> io::Result<()> {
    let len = u16::try_from(message.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "DNS message exceeds 65535 bytes"))?;

    let mut framed = Vec::with_capacity(message.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(message);
    stream.write_all(&framed).await?;
    stream.flush().await
}

/// Send `query` on an established connection and read one response.
///
/// The caller bounds the wait.
pub async fn exchange(stream: &mut TcpStream, query: &[u8]) -> Result<Vec<u8>> {
    write_dns_message(stream, query).await?;

    match read_dns_message(stream).await? {
        Some(response) => Ok(response),
        None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before response").into()),
    }
}
