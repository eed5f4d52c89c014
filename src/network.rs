//! Networks, endpoints and the network registry.
//!
//! A [`Network`] owns its endpoints and its service records. Endpoints refer
//! back to their network by id only; the [`NetworkRegistry`] is the one place
//! that id is resolved.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::records::{IpFamily, ServiceRecord, ServiceRecordStore};
use crate::registry::Registry;

/// A network attachment of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub aliases: Vec<String>,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, name: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            network_id: network_id.into(),
            ipv4: None,
            ipv6: None,
            aliases: Vec::new(),
        }
    }

    pub fn with_ipv4(mut self, ip: Ipv4Addr) -> Self {
        self.ipv4 = Some(ip);
        self
    }

    pub fn with_ipv6(mut self, ip: Ipv6Addr) -> Self {
        self.ipv6 = Some(ip);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Records published while this endpoint is joined: its name and
    /// every alias.
    fn service_records(&self) -> Vec<ServiceRecord> {
        std::iter::once(&self.name)
            .chain(&self.aliases)
            .filter(|name| !name.is_empty())
            .map(|name| ServiceRecord::container(&self.id, name.as_str(), self.ipv4, self.ipv6))
            .collect()
    }
}

pub struct Network {
    id: String,
    name: String,
    driver: String,
    endpoints: Registry<Endpoint>,
    records: ServiceRecordStore,
}

impl Network {
    pub fn new(id: impl Into<String>, name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            driver: driver.into(),
            endpoints: Registry::new(),
            records: ServiceRecordStore::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn records(&self) -> &ServiceRecordStore {
        &self.records
    }

    pub fn add_endpoint(&self, endpoint: Arc<Endpoint>) -> Result<()> {
        if endpoint.id.is_empty() {
            return Err(Error::InvalidParameter("empty endpoint id".into()));
        }
        self.endpoints.insert(endpoint.id.clone(), endpoint);
        Ok(())
    }

    pub fn delete_endpoint(&self, endpoint_id: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.remove(endpoint_id)
    }

    /// Look up an endpoint. An unknown id is `Ok(None)`, not an error.
    pub fn get_endpoint(&self, endpoint_id: &str) -> Result<Option<Arc<Endpoint>>> {
        if endpoint_id.is_empty() {
            return Err(Error::InvalidParameter("empty endpoint id".into()));
        }
        Ok(self.endpoints.get(endpoint_id))
    }

    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.snapshot()
    }

    pub fn has_endpoints(&self) -> bool {
        !self.endpoints.is_empty()
    }

    /// Attach an endpoint and publish its service records.
    pub fn join(&self, endpoint: Endpoint) -> Result<Arc<Endpoint>> {
        if endpoint.network_id != self.id {
            return Err(Error::InvalidParameter(format!(
                "endpoint {} belongs to network {}, not {}",
                endpoint.id, endpoint.network_id, self.id
            )));
        }

        let endpoint = Arc::new(endpoint);
        self.add_endpoint(Arc::clone(&endpoint))?;
        // A rejoin under the same id drops whatever the previous membership
        // published.
        let replaced = self
            .records
            .replace_endpoint_records(&endpoint.id, endpoint.service_records());

        debug!(
            network = %self.name,
            endpoint = %endpoint.id,
            name = %endpoint.name,
            replaced,
            "endpoint joined"
        );
        Ok(endpoint)
    }

    /// Withdraw an endpoint's records, then detach it.
    ///
    /// Records go first and in one store write, so a concurrent lookup sees
    /// either all of them or none, and never after the endpoint is gone.
    pub fn leave(&self, endpoint_id: &str) -> Result<Option<Arc<Endpoint>>> {
        if endpoint_id.is_empty() {
            return Err(Error::InvalidParameter("empty endpoint id".into()));
        }

        let removed = self.records.delete_endpoint_records(endpoint_id);
        let endpoint = self.endpoints.remove(endpoint_id);
        if endpoint.is_none() && removed > 0 {
            warn!(network = %self.name, endpoint = %endpoint_id, removed, "removed records of unknown endpoint");
        }

        debug!(network = %self.name, endpoint = %endpoint_id, removed, "endpoint left");
        Ok(endpoint)
    }

    pub fn resolve_name(&self, name: &str, family: IpFamily) -> Option<Vec<IpAddr>> {
        self.records.resolve(name, family)
    }

    /// Reverse lookup, qualified with the network name.
    pub fn resolve_ip(&self, ip: IpAddr) -> Option<String> {
        self.records
            .resolve_ip(ip)
            .map(|name| format!("{}.{}", name, self.name))
    }
}

/// Registry of every live network, shared by all sandboxes.
#[derive(Default)]
pub struct NetworkRegistry {
    networks: Registry<Network>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `network` under its id. A reused id replaces the old entry.
    pub fn add_network(&self, network: Arc<Network>) {
        let id = network.id().to_string();
        if self.networks.insert(id.clone(), network).is_some() {
            debug!(network = %id, "replaced existing network");
        }
    }

    pub fn get_network(&self, id: &str) -> Result<Arc<Network>> {
        if id.is_empty() {
            return Err(Error::InvalidParameter("empty network id".into()));
        }
        self.networks
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("network {id}")))
    }

    /// Remove a network. Unknown ids are a no-op.
    ///
    /// Fails with [`Error::ActiveEndpoints`] while endpoints remain.
    pub fn delete_network(&self, id: &str) -> Result<()> {
        let Some(network) = self.networks.get(id) else {
            return Ok(());
        };
        if network.has_endpoints() {
            return Err(Error::ActiveEndpoints(id.to_string()));
        }
        self.networks.remove(id);
        Ok(())
    }

    pub fn list_networks(&self) -> Vec<Arc<Network>> {
        self.networks.snapshot()
    }

    /// Resolve an endpoint through its network. Both ids must be non-empty.
    pub fn get_endpoint(&self, network_id: &str, endpoint_id: &str) -> Result<Option<Arc<Endpoint>>> {
        validate_ids(network_id, endpoint_id)?;
        self.get_network(network_id)?.get_endpoint(endpoint_id)
    }
}

pub fn validate_ids(network_id: &str, endpoint_id: &str) -> Result<()> {
    if network_id.is_empty() {
        return Err(Error::InvalidParameter("invalid network id".into()));
    }
    if endpoint_id.is_empty() {
        return Err(Error::InvalidParameter("invalid endpoint id".into()));
    }
    Ok(())
}
