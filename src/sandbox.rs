//! Sandboxes and the record space their resolver sees.

use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::network::{Endpoint, NetworkRegistry, validate_ids};
use crate::records::IpFamily;
use crate::resolver::{DnsBackend, Resolver};

/// The networks a sandbox is attached to, in join order.
///
/// Holds `(network id, endpoint id)` pairs and resolves them through the
/// shared registry on every lookup, so a deleted network simply stops
/// contributing names.
pub struct JoinedNetworks {
    registry: Arc<NetworkRegistry>,
    endpoints: RwLock<Vec<(String, String)>>,
}

impl JoinedNetworks {
    fn new(registry: Arc<NetworkRegistry>) -> Self {
        Self {
            registry,
            endpoints: RwLock::new(Vec::new()),
        }
    }

    fn snapshot(&self) -> Vec<(String, String)> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, network_id: &str, endpoint_id: &str) {
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((network_id.to_string(), endpoint_id.to_string()));
    }

    fn remove(&self, network_id: &str, endpoint_id: &str) -> bool {
        let mut endpoints = self.endpoints.write().unwrap_or_else(PoisonError::into_inner);
        let before = endpoints.len();
        endpoints.retain(|(n, e)| !(n == network_id && e == endpoint_id));
        endpoints.len() != before
    }
}

impl DnsBackend for JoinedNetworks {
    /// First network with an address of `family` wins. A name known on some
    /// network without that family still counts as found.
    fn resolve_name(&self, name: &str, family: IpFamily) -> Option<Vec<IpAddr>> {
        let mut found_empty = false;

        for (network_id, _) in self.snapshot() {
            let network = match self.registry.get_network(&network_id) {
                Ok(network) => network,
                Err(e) => {
                    debug!(network = %network_id, error = %e, "skipping network during lookup");
                    continue;
                }
            };
            match network.resolve_name(name, family) {
                Some(addrs) if !addrs.is_empty() => return Some(addrs),
                Some(_) => found_empty = true,
                None => {}
            }
        }

        found_empty.then(Vec::new)
    }

    fn resolve_ip(&self, ip: IpAddr) -> Option<String> {
        self.snapshot().into_iter().find_map(|(network_id, _)| {
            self.registry.get_network(&network_id).ok()?.resolve_ip(ip)
        })
    }
}

/// A network namespace hosting one container's network stack.
pub struct Sandbox {
    id: String,
    networks: Arc<JoinedNetworks>,
    resolver: Arc<Resolver>,
}

impl Sandbox {
    pub fn new(id: impl Into<String>, registry: Arc<NetworkRegistry>, config: ResolverConfig) -> Self {
        let networks = Arc::new(JoinedNetworks::new(registry));
        let backend: Arc<dyn DnsBackend> = Arc::clone(&networks) as Arc<dyn DnsBackend>;
        let resolver = Arc::new(Resolver::new(backend, config));

        Self {
            id: id.into(),
            networks,
            resolver,
        }
    }

    /// Like [`Sandbox::new`] with a resolver built by the caller around
    /// this sandbox's backend, e.g. one with namespace-aware dialers.
    pub fn with_resolver(
        id: impl Into<String>,
        registry: Arc<NetworkRegistry>,
        build: impl FnOnce(Arc<dyn DnsBackend>) -> Resolver,
    ) -> Self {
        let networks = Arc::new(JoinedNetworks::new(registry));
        let resolver = Arc::new(build(Arc::clone(&networks) as Arc<dyn DnsBackend>));

        Self {
            id: id.into(),
            networks,
            resolver,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// `(network id, endpoint id)` pairs in join order.
    pub fn endpoints(&self) -> Vec<(String, String)> {
        self.networks.snapshot()
    }

    /// Attach `endpoint` to its network and make its names visible here.
    pub fn join(&self, endpoint: Endpoint) -> Result<Arc<Endpoint>> {
        validate_ids(&endpoint.network_id, &endpoint.id)?;
        let network = self.networks.registry.get_network(&endpoint.network_id)?;
        let endpoint = network.join(endpoint)?;
        self.networks.push(&endpoint.network_id, &endpoint.id);

        info!(sandbox = %self.id, network = %network.name(), endpoint = %endpoint.id, "sandbox joined network");
        Ok(endpoint)
    }

    /// Detach an endpoint from this sandbox and its network.
    pub fn leave(&self, network_id: &str, endpoint_id: &str) -> Result<()> {
        validate_ids(network_id, endpoint_id)?;
        if !self.networks.remove(network_id, endpoint_id) {
            return Err(Error::NotFound(format!(
                "endpoint {endpoint_id} on network {network_id} in sandbox {}",
                self.id
            )));
        }

        // The network may already be gone; its records went with it.
        if let Ok(network) = self.networks.registry.get_network(network_id) {
            network.leave(endpoint_id)?;
        }

        info!(sandbox = %self.id, network = %network_id, endpoint = %endpoint_id, "sandbox left network");
        Ok(())
    }
}
