//! Sandbox DNS - embedded per-sandbox DNS resolution for container networks.
//!
//! Each sandbox gets a [`Resolver`] that answers queries for container and
//! service names on the networks it has joined, and forwards everything else
//! to the configured external servers.

pub mod config;
pub mod dns;
pub mod error;
pub mod forwarder;
pub mod network;
pub mod records;
pub mod registry;
pub mod resolver;
pub mod sandbox;
pub mod server;
pub mod stats;
pub mod transport;

pub use config::{ExtDnsEntry, ResolverConfig};
pub use error::{Error, Result};
pub use forwarder::{Dialer, DirectDialer, Forwarder};
pub use network::{Endpoint, Network, NetworkRegistry};
pub use records::{IpFamily, ServiceRecord, ServiceRecordStore};
pub use resolver::{DnsBackend, Resolver};
pub use sandbox::Sandbox;
pub use server::DnsServer;
pub use transport::Protocol;
