//! In-memory hypervisor backend for tests and local bringup.
//!
//! Keeps domains, networks, leases and stats in a mutex-guarded table and
//! supports targeted failure injection so callers can exercise partial-failure
//! policies without a real hypervisor.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use virtkit_common::{DhcpLease, DomainHandle, Error, MemoryStatEntry, NetworkHandle, Result};

use crate::xml::decode_domain_xml;
use crate::Hypervisor;

struct MockDomain {
    handle: DomainHandle,
    xml: String,
    state_code: i32,
}

#[derive(Default)]
struct Inner {
    next_id: i32,
    domains: Vec<MockDomain>,
    networks: Vec<NetworkHandle>,
    leases: HashMap<String, Vec<DhcpLease>>,
    stats: HashMap<i32, Vec<MemoryStatEntry>>,
    stats_periods: HashMap<i32, i32>,
    created: Vec<String>,
    fail_leases: bool,
    fail_create: bool,
    fail_stats: HashSet<i32>,
    fail_xml: HashSet<i32>,
}

pub struct MockHypervisor {
    inner: Mutex<Inner>,
}

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHypervisor {
    /// Fresh mock with the `default` network already present.
    pub fn new() -> Self {
        let hv = MockHypervisor {
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Inner::default()
            }),
        };
        hv.add_network("default");
        hv
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock hypervisor state lock")
    }

    pub fn add_network(&self, name: &str) {
        self.state().networks.push(NetworkHandle {
            name: name.to_string(),
            uuid: Uuid::new_v4(),
        });
    }

    /// Register a running domain with the given config document and state
    /// code, returning its handle.
    pub fn add_domain(&self, name: &str, xml: &str, state_code: i32) -> DomainHandle {
        let mut inner = self.state();
        let id = inner.next_id;
        inner.next_id += 1;
        let handle = DomainHandle {
            id,
            uuid: Uuid::new_v4(),
            name: name.to_string(),
        };
        inner.domains.push(MockDomain {
            handle: handle.clone(),
            xml: xml.to_string(),
            state_code,
        });
        handle
    }

    /// Register a defined-but-not-running domain (runtime id -1), which live
    /// listing must skip.
    pub fn add_defined_domain(&self, name: &str, xml: &str) -> DomainHandle {
        let handle = DomainHandle {
            id: -1,
            uuid: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.state().domains.push(MockDomain {
            handle: handle.clone(),
            xml: xml.to_string(),
            state_code: 5,
        });
        handle
    }

    pub fn add_lease(&self, network: &str, mac: &str, ip: &str) {
        self.state()
            .leases
            .entry(network.to_string())
            .or_default()
            .push(DhcpLease {
                mac: mac.to_string(),
                ip: ip.to_string(),
                hostname: None,
                expiry: None,
            });
    }

    pub fn set_stats(&self, domain_id: i32, entries: Vec<MemoryStatEntry>) {
        self.state().stats.insert(domain_id, entries);
    }

    /// The empirically observed reference array backends return by default.
    pub fn canonical_stats() -> Vec<MemoryStatEntry> {
        [
            (6, 2_097_152),
            (0, 0),
            (1, 0),
            (2, 922),
            (3, 314_341),
            (4, 1_787_532),
            (5, 2_041_024),
            (8, 1_830_488),
            (9, 1_605_988_199),
            (7, 457_240),
        ]
        .into_iter()
        .map(|(tag, value)| MemoryStatEntry { tag, value })
        .collect()
    }

    /// Make every DHCP lease query fail with a transport error.
    pub fn fail_lease_queries(&self) {
        self.state().fail_leases = true;
    }

    /// Make every `create_domain` call fail with a transport error.
    pub fn fail_domain_creation(&self) {
        self.state().fail_create = true;
    }

    /// Make memory-statistics queries for one domain fail.
    pub fn fail_stats_for(&self, domain_id: i32) {
        self.state().fail_stats.insert(domain_id);
    }

    /// Make XML fetches for one domain fail.
    pub fn fail_xml_for(&self, domain_id: i32) {
        self.state().fail_xml.insert(domain_id);
    }

    /// Descriptors submitted through `create_domain`, in order.
    pub fn created_domains(&self) -> Vec<String> {
        self.state().created.clone()
    }

    /// Configured stats period for a domain, if one was set.
    pub fn stats_period(&self, domain_id: i32) -> Option<i32> {
        self.state().stats_periods.get(&domain_id).copied()
    }
}

#[async_trait]
impl Hypervisor for MockHypervisor {
    async fn list_domains(&self) -> Result<Vec<DomainHandle>> {
        Ok(self.state().domains.iter().map(|d| d.handle.clone()).collect())
    }

    async fn lookup_domain_by_id(&self, id: i32) -> Result<DomainHandle> {
        self.state()
            .domains
            .iter()
            .find(|d| d.handle.id == id && id != -1)
            .map(|d| d.handle.clone())
            .ok_or_else(|| Error::NotFound(format!("domain {id}")))
    }

    async fn domain_xml(&self, domain: &DomainHandle) -> Result<String> {
        let inner = self.state();
        if inner.fail_xml.contains(&domain.id) {
            return Err(Error::Transport(format!(
                "injected xml failure for domain {}",
                domain.id
            )));
        }
        inner
            .domains
            .iter()
            .find(|d| d.handle.id == domain.id)
            .map(|d| d.xml.clone())
            .ok_or_else(|| Error::NotFound(format!("domain {}", domain.id)))
    }

    async fn domain_state(&self, domain: &DomainHandle) -> Result<i32> {
        self.state()
            .domains
            .iter()
            .find(|d| d.handle.id == domain.id)
            .map(|d| d.state_code)
            .ok_or_else(|| Error::NotFound(format!("domain {}", domain.id)))
    }

    async fn memory_stats(
        &self,
        domain: &DomainHandle,
        max_entries: u32,
    ) -> Result<Vec<MemoryStatEntry>> {
        let inner = self.state();
        if inner.fail_stats.contains(&domain.id) {
            return Err(Error::Transport(format!(
                "injected stats failure for domain {}",
                domain.id
            )));
        }
        let mut entries = inner
            .stats
            .get(&domain.id)
            .cloned()
            .unwrap_or_else(Self::canonical_stats);
        entries.truncate(max_entries as usize);
        Ok(entries)
    }

    async fn lookup_network(&self, name: &str) -> Result<NetworkHandle> {
        self.state()
            .networks
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("network {name}")))
    }

    async fn dhcp_leases(
        &self,
        network: &NetworkHandle,
        mac: Option<&str>,
    ) -> Result<Vec<DhcpLease>> {
        let inner = self.state();
        if inner.fail_leases {
            return Err(Error::Transport("injected lease query failure".into()));
        }
        let leases = inner.leases.get(&network.name).cloned().unwrap_or_default();
        Ok(match mac {
            Some(mac) => leases.into_iter().filter(|l| l.mac == mac).collect(),
            None => leases,
        })
    }

    async fn create_domain(&self, xml: &str) -> Result<DomainHandle> {
        // The mock validates the descriptor the way a real hypervisor would
        // reject garbage, then registers the domain as running.
        let config = decode_domain_xml(xml)
            .map_err(|e| Error::Transport(format!("rejected descriptor: {e}")))?;
        let mut inner = self.state();
        if inner.fail_create {
            return Err(Error::Transport(format!(
                "injected create failure for {}",
                config.name
            )));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let handle = DomainHandle {
            id,
            uuid: Uuid::new_v4(),
            name: config.name,
        };
        inner.created.push(xml.to_string());
        inner.domains.push(MockDomain {
            handle: handle.clone(),
            xml: xml.to_string(),
            state_code: 1,
        });
        Ok(handle)
    }

    async fn set_memory_stats_period(&self, domain: &DomainHandle, seconds: i32) -> Result<()> {
        self.state().stats_periods.insert(domain.id, seconds);
        Ok(())
    }
}
