//! Service record store.
//!
//! Per-network directory of container and service names. Names are stored
//! lower-cased without the trailing root dot, and several records may share
//! a name (anycast services, or one record per task).

use rustc_hash::FxHashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// Address family requested by a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

/// One name-to-address mapping owned by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub service_name: String,
    pub service_id: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub endpoint_id: String,
    pub is_anycast: bool,
    pub task_name: String,
}

impl ServiceRecord {
    /// A plain container record: no service, no task.
    pub fn container(
        endpoint_id: impl Into<String>,
        name: impl Into<String>,
        ipv4: Option<Ipv4Addr>,
        ipv6: Option<Ipv6Addr>,
    ) -> Self {
        Self {
            name: name.into(),
            service_name: String::new(),
            service_id: String::new(),
            ipv4,
            ipv6,
            endpoint_id: endpoint_id.into(),
            is_anycast: false,
            task_name: String::new(),
        }
    }

    fn address(&self, family: IpFamily) -> Option<IpAddr> {
        match family {
            IpFamily::V4 => self.ipv4.map(IpAddr::V4),
            IpFamily::V6 => self.ipv6.map(IpAddr::V6),
        }
    }

    fn addresses(&self) -> impl Iterator<Item = IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .into_iter()
            .chain(self.ipv6.map(IpAddr::V6))
    }
}

#[derive(Default)]
struct Records {
    by_name: FxHashMap<String, Vec<ServiceRecord>>,
    by_ip: FxHashMap<IpAddr, Vec<String>>,
}

impl Records {
    fn remove_endpoint(&mut self, endpoint_id: &str) -> usize {
        let mut removed = Vec::new();

        self.by_name.retain(|key, entries| {
            entries.retain(|r| {
                if r.endpoint_id == endpoint_id {
                    removed.push((key.clone(), r.clone()));
                    false
                } else {
                    true
                }
            });
            !entries.is_empty()
        });

        for (key, record) in &removed {
            self.unindex_ips(key, record);
        }
        removed.len()
    }

    fn index_ips(&mut self, key: &str, record: &ServiceRecord) {
        if record.is_anycast {
            return;
        }
        for ip in record.addresses() {
            self.by_ip.entry(ip).or_default().push(key.to_string());
        }
    }

    fn unindex_ips(&mut self, key: &str, record: &ServiceRecord) {
        if record.is_anycast {
            return;
        }
        for ip in record.addresses() {
            if let Some(names) = self.by_ip.get_mut(&ip) {
                if let Some(pos) = names.iter().position(|n| n == key) {
                    names.remove(pos);
                }
                if names.is_empty() {
                    self.by_ip.remove(&ip);
                }
            }
        }
    }
}

/// Name-to-address records for one network.
pub struct ServiceRecordStore {
    records: RwLock<Records>,
    rotation: AtomicUsize,
}

impl ServiceRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records::default()),
            rotation: AtomicUsize::new(0),
        }
    }

    /// Insert a record. Records are never deduplicated.
    pub fn add_record(&self, record: ServiceRecord) {
        let key = normalize(&record.name);
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.index_ips(&key, &record);
        records.by_name.entry(key).or_default().push(record);
    }

    /// Remove one record matching name and addresses. No-op if absent.
    pub fn delete_record(&self, name: &str, ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) {
        let key = normalize(name);
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);

        let Some(entries) = records.by_name.get_mut(&key) else {
            return;
        };
        let Some(pos) = entries.iter().position(|r| r.ipv4 == ipv4 && r.ipv6 == ipv6) else {
            return;
        };
        let removed = entries.remove(pos);
        if entries.is_empty() {
            records.by_name.remove(&key);
        }
        records.unindex_ips(&key, &removed);
    }

    /// Remove every record owned by `endpoint_id` under a single write lock.
    ///
    /// Returns the number of records removed.
    pub fn delete_endpoint_records(&self, endpoint_id: &str) -> usize {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.remove_endpoint(endpoint_id)
    }

    /// Swap an endpoint's records for `replacement` under a single write
    /// lock, so lookups see either the old set or the new one.
    ///
    /// Returns the number of records removed.
    pub fn replace_endpoint_records(
        &self,
        endpoint_id: &str,
        replacement: impl IntoIterator<Item = ServiceRecord>,
    ) -> usize {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let removed = records.remove_endpoint(endpoint_id);
        for record in replacement {
            let key = normalize(&record.name);
            records.index_ips(&key, &record);
            records.by_name.entry(key).or_default().push(record);
        }
        removed
    }

    /// Addresses of `family` registered under `name`.
    ///
    /// `None` means the name is unknown. `Some` with an empty list means the
    /// name exists but has no address of the requested family.
    pub fn resolve(&self, name: &str, family: IpFamily) -> Option<Vec<IpAddr>> {
        let key = normalize(name);
        let mut addrs: Vec<IpAddr> = {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            records
                .by_name
                .get(&key)?
                .iter()
                .filter_map(|r| r.address(family))
                .collect()
        };

        if addrs.len() > 1 {
            let shift = self.rotation.fetch_add(1, Ordering::Relaxed) % addrs.len();
            addrs.rotate_left(shift);
        }
        Some(addrs)
    }

    /// Name registered for `ip`, for reverse lookups. Anycast records are
    /// not reverse-mapped.
    pub fn resolve_ip(&self, ip: IpAddr) -> Option<String> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.by_ip.get(&ip)?.first().cloned()
    }

    /// Copy of every record currently stored.
    pub fn records(&self) -> Vec<ServiceRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.by_name.values().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.by_name.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ServiceRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> Option<Ipv4Addr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let store = ServiceRecordStore::new();
        store.add_record(ServiceRecord::container("ep1", "name1", v4("192.168.0.1"), None));

        for name in ["name1", "NaMe1.", "NAME1"] {
            assert_eq!(
                store.resolve(name, IpFamily::V4),
                Some(vec!["192.168.0.1".parse().unwrap()])
            );
        }
    }

    #[test]
    fn known_name_without_family_is_empty_not_missing() {
        let store = ServiceRecordStore::new();
        store.add_record(ServiceRecord::container("ep1", "name1", v4("192.168.0.1"), None));

        assert_eq!(store.resolve("name1", IpFamily::V6), Some(vec![]));
        assert_eq!(store.resolve("other", IpFamily::V6), None);
    }

    #[test]
    fn resolve_is_exact_match_only() {
        let store = ServiceRecordStore::new();
        store.add_record(ServiceRecord::container("ep1", "db", v4("10.0.0.5"), None));

        assert_eq!(store.resolve("db.example", IpFamily::V4), None);
        assert_eq!(store.resolve("d", IpFamily::V4), None);
    }

    #[test]
    fn anycast_rotates_round_robin() {
        let store = ServiceRecordStore::new();
        for (ep, ip) in [("t1", "10.0.0.1"), ("t2", "10.0.0.2"), ("t3", "10.0.0.3")] {
            let mut record = ServiceRecord::container(ep, "svc", v4(ip), None);
            record.is_anycast = true;
            store.add_record(record);
        }

        let first = store.resolve("svc", IpFamily::V4).unwrap();
        let second = store.resolve("svc", IpFamily::V4).unwrap();
        let third = store.resolve("svc", IpFamily::V4).unwrap();
        let fourth = store.resolve("svc", IpFamily::V4).unwrap();

        assert_eq!(first.len(), 3);
        assert_ne!(first[0], second[0]);
        assert_ne!(second[0], third[0]);
        assert_eq!(first, fourth);

        let mut sorted = second.clone();
        sorted.sort();
        let mut expected = first.clone();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn delete_record_removes_one_match() {
        let store = ServiceRecordStore::new();
        store.add_record(ServiceRecord::container("ep1", "dup", v4("10.0.0.1"), None));
        store.add_record(ServiceRecord::container("ep2", "dup", v4("10.0.0.1"), None));

        store.delete_record("DUP", v4("10.0.0.1"), None);
        assert_eq!(store.len(), 1);

        store.delete_record("dup", v4("10.0.0.1"), None);
        assert_eq!(store.resolve("dup", IpFamily::V4), None);

        store.delete_record("dup", v4("10.0.0.1"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn delete_endpoint_records_removes_aliases_and_reverse_entries() {
        let store = ServiceRecordStore::new();
        store.add_record(ServiceRecord::container("ep1", "web", v4("10.0.0.7"), None));
        store.add_record(ServiceRecord::container("ep1", "frontend", v4("10.0.0.7"), None));
        store.add_record(ServiceRecord::container("ep2", "db", v4("10.0.0.8"), None));

        assert_eq!(store.delete_endpoint_records("ep1"), 2);

        assert_eq!(store.resolve("web", IpFamily::V4), None);
        assert_eq!(store.resolve("frontend", IpFamily::V4), None);
        assert_eq!(store.resolve_ip("10.0.0.7".parse().unwrap()), None);
        assert_eq!(store.resolve_ip("10.0.0.8".parse().unwrap()).as_deref(), Some("db"));
    }

    #[test]
    fn anycast_records_are_not_reverse_mapped() {
        let store = ServiceRecordStore::new();
        let mut vip = ServiceRecord::container("ep1", "svc", v4("10.0.0.100"), None);
        vip.is_anycast = true;
        store.add_record(vip);

        assert_eq!(store.resolve_ip("10.0.0.100".parse().unwrap()), None);
    }
}
