//! DNS query resolution logic.
//!
//! Handles the per-query pipeline for one sandbox:
//! 1. Parse the first question (FORMERR if that fails)
//! 2. Answer from the sandbox's service records when the name is known
//! 3. Otherwise forward to the external servers (SERVFAIL if none answer)
//!
//! Transports handle the actual I/O, the resolver handles decisions. No
//! state survives a query besides the counters in [`Stats`].

use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::{ExtDnsEntry, ResolverConfig};
use crate::dns::{DnsQuery, DnsResponse, MAX_UDP_RESPONSE, Rcode, RecordType, parse_reverse_name};
use crate::forwarder::{Dialer, DirectDialer, Forwarder};
use crate::records::IpFamily;
use crate::stats::{Stats, StatsSnapshot};
use crate::transport::Protocol;

/// Source of locally known names, usually a sandbox's joined networks.
pub trait DnsBackend: Send + Sync {
    /// `None` for unknown names; `Some(vec![])` for known names without an
    /// address of `family`.
    fn resolve_name(&self, name: &str, family: IpFamily) -> Option<Vec<IpAddr>>;

    fn resolve_ip(&self, ip: IpAddr) -> Option<String>;
}

/// Where a query's response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Local,
    Forwarded,
    Failed,
    Malformed,
}

/// Per-sandbox DNS resolver.
pub struct Resolver {
    backend: Arc<dyn DnsBackend>,
    proxy_dns: bool,
    forwarder: RwLock<Arc<Forwarder>>,
    config: ResolverConfig,
    sandbox_dialer: Arc<dyn Dialer>,
    host_dialer: Arc<dyn Dialer>,
    inflight: Semaphore,
    stats: Stats,
}

impl Resolver {
    pub fn new(backend: Arc<dyn DnsBackend>, config: ResolverConfig) -> Self {
        let sandbox_dialer: Arc<dyn Dialer> = Arc::new(DirectDialer);
        let host_dialer: Arc<dyn Dialer> = Arc::new(DirectDialer);
        let forwarder = Forwarder::new(config.ext_servers.clone(), config.timeout)
            .with_dialers(Arc::clone(&sandbox_dialer), Arc::clone(&host_dialer));

        Self {
            backend,
            proxy_dns: config.proxy_dns,
            forwarder: RwLock::new(Arc::new(forwarder)),
            inflight: Semaphore::new(config.max_concurrent),
            config,
            sandbox_dialer,
            host_dialer,
            stats: Stats::new(),
        }
    }

    /// Use `sandbox` for ordinary external servers and `host` for
    /// host-loopback ones.
    pub fn with_dialers(mut self, sandbox: Arc<dyn Dialer>, host: Arc<dyn Dialer>) -> Self {
        self.sandbox_dialer = sandbox;
        self.host_dialer = host;
        let servers = self.ext_servers();
        self.set_ext_servers(servers);
        self
    }

    /// Replace the external server list. Queries already forwarding keep
    /// the list they started with.
    pub fn set_ext_servers(&self, servers: Vec<ExtDnsEntry>) {
        let forwarder = Forwarder::new(servers, self.config.timeout)
            .with_dialers(Arc::clone(&self.sandbox_dialer), Arc::clone(&self.host_dialer));
        *self.forwarder.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(forwarder);
    }

    pub fn ext_servers(&self) -> Vec<ExtDnsEntry> {
        self.forwarder().servers().to_vec()
    }

    pub fn proxy_enabled(&self) -> bool {
        self.proxy_dns
    }

    pub fn stats_snapshot_and_reset(&self) -> StatsSnapshot {
        self.stats.snapshot_and_reset()
    }

    fn forwarder(&self) -> Arc<Forwarder> {
        Arc::clone(&self.forwarder.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Answer one raw DNS message received on `protocol`.
    ///
    /// Always produces a response: a local answer, the relayed upstream
    /// answer, SERVFAIL or FORMERR.
    pub async fn serve(&self, raw: &[u8], protocol: Protocol) -> Vec<u8> {
        let start = Instant::now();
        let (response, outcome, domain) = self.dispatch(raw, protocol).await;
        let elapsed = start.elapsed();

        match outcome {
            Outcome::Local => self.stats.record_local(elapsed),
            Outcome::Forwarded => self.stats.record_forwarded(elapsed),
            Outcome::Failed => self.stats.record_failed(elapsed),
            Outcome::Malformed => self.stats.record_malformed(elapsed),
        }
        debug!(
            protocol = %protocol,
            domain = %domain,
            outcome = ?outcome,
            total_ms = elapsed.as_secs_f64() * 1000.0,
            "query answered"
        );

        response
    }

    async fn dispatch(&self, raw: &[u8], protocol: Protocol) -> (Vec<u8>, Outcome, String) {
        let query = match DnsQuery::parse(raw) {
            Ok(query) => query,
            Err(e) => {
                debug!(protocol = %protocol, error = %e, "malformed query");
                return (
                    encode(&DnsResponse::format_error(raw)),
                    Outcome::Malformed,
                    String::from("<malformed>"),
                );
            }
        };

        if let Some(mut response) = self.answer_locally(&query) {
            if protocol == Protocol::Udp {
                response.truncate_to(MAX_UDP_RESPONSE);
            }
            return (encode(&response), Outcome::Local, query.domain);
        }

        let forwarder = self.forwarder();
        if !self.proxy_dns || forwarder.is_empty() {
            // Without an upstream, non-existence cannot be proven.
            return (servfail(&query), Outcome::Failed, query.domain);
        }

        // Only forwards hold a permit; local answers never wait on upstreams.
        let Ok(_permit) = self.inflight.try_acquire() else {
            warn!(
                limit = self.config.max_concurrent,
                domain = %query.domain,
                "too many concurrent forwarded queries"
            );
            return (servfail(&query), Outcome::Failed, query.domain);
        };

        match forwarder.forward(raw, protocol).await {
            Ok(response) => (response, Outcome::Forwarded, query.domain),
            Err(e) => {
                warn!(domain = %query.domain, protocol = %protocol, error = %e, "forwarding failed");
                (servfail(&query), Outcome::Failed, query.domain)
            }
        }
    }

    /// A response built from local records, or `None` when the name is not
    /// known locally and the query should be forwarded.
    fn answer_locally(&self, query: &DnsQuery) -> Option<DnsResponse> {
        let name = query.lookup_name();

        let mut response = match query.qtype {
            RecordType::A | RecordType::Aaaa => {
                let family = if query.qtype == RecordType::A {
                    IpFamily::V4
                } else {
                    IpFamily::V6
                };
                let addrs = self.backend.resolve_name(&name, family)?;
                let mut response = DnsResponse::for_query(query, Rcode::NoError);
                for ip in addrs {
                    response.push_address(ip);
                }
                response
            }
            RecordType::Ptr => {
                let ip = parse_reverse_name(&name)?;
                let target = self.backend.resolve_ip(ip)?;
                let mut response = DnsResponse::for_query(query, Rcode::NoError);
                if let Err(e) = response.push_ptr(&target) {
                    warn!(ip = %ip, target = %target, error = %e, "local PTR target is not a valid name");
                    return None;
                }
                response
            }
            _ => {
                // Known names have no records of other types.
                self.backend.resolve_name(&name, IpFamily::V4)?;
                DnsResponse::for_query(query, Rcode::NoError)
            }
        };

        response.set_authoritative();
        Some(response)
    }
}

fn servfail(query: &DnsQuery) -> Vec<u8> {
    encode(&DnsResponse::for_query(query, Rcode::ServFail))
}

/// Wire bytes of `response`, or a bare SERVFAIL header if a name in it
/// cannot be encoded.
fn encode(response: &DnsResponse) -> Vec<u8> {
    response.to_bytes().unwrap_or_else(|e| {
        warn!(id = response.id, error = %e, "response not encodable");
        response.header_bytes(Rcode::ServFail)
    })
}
