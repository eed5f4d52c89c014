#![allow(dead_code)]
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sandbox_dns::dns::{DnsQuery, DnsResponse, Rcode};
use sandbox_dns::transport::tcp::{read_dns_message, write_dns_message};
use sandbox_dns::{ExtDnsEntry, Protocol};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::oneshot;

/// What a mock upstream does with each query.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Answer(Ipv4Addr),
    /// SERVFAIL on the first query, then answer.
    ServFailOnce(Ipv4Addr),
    Rcode(Rcode),
    /// Never reply.
    Silent,
}

pub struct MockUpstream {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockUpstream {
    pub async fn start(protocol: Protocol, behavior: Behavior) -> Self {
        match protocol {
            Protocol::Udp => Self::udp(behavior).await,
            Protocol::Tcp => Self::tcp(behavior).await,
        }
    }

    pub async fn udp(behavior: Behavior) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let counter = Arc::clone(&requests);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    result = socket.recv_from(&mut buf) => {
                        if let Ok((len, peer)) = result {
                            let n = counter.fetch_add(1, Ordering::SeqCst);
                            if let Some(response) = respond(&buf[..len], behavior, n) {
                                let _ = socket.send_to(&response, peer).await;
                            }
                        }
                    }
                }
            }
        });

        Self {
            addr,
            requests,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub async fn tcp(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let counter = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let Ok((mut stream, _)) = accepted else { continue };
                        let counter = Arc::clone(&counter);
                        tokio::spawn(async move {
                            while let Ok(Some(query)) = read_dns_message(&mut stream).await {
                                let n = counter.fetch_add(1, Ordering::SeqCst);
                                match respond(&query, behavior, n) {
                                    Some(response) => {
                                        if write_dns_message(&mut stream, &response).await.is_err() {
                                            return;
                                        }
                                    }
                                    None => {
                                        // Hold the connection open without replying.
                                        std::future::pending::<()>().await;
                                    }
                                }
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            requests,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn entry(&self) -> ExtDnsEntry {
        ExtDnsEntry::new(self.addr.ip()).with_port(self.addr.port())
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn respond(query: &[u8], behavior: Behavior, n: usize) -> Option<Vec<u8>> {
    let query = DnsQuery::parse(query).ok()?;

    let response = match behavior {
        Behavior::Silent => return None,
        Behavior::ServFailOnce(_) if n == 0 => DnsResponse::for_query(&query, Rcode::ServFail),
        Behavior::Answer(ip) | Behavior::ServFailOnce(ip) => {
            let mut response = DnsResponse::for_query(&query, Rcode::NoError);
            response.push_address(ip.into());
            response
        }
        Behavior::Rcode(rcode) => DnsResponse::for_query(&query, rcode),
    };

    response.to_bytes().ok()
}

/// An address nothing listens on.
pub async fn closed_tcp_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
