//! The VM reconciler: derives the application's `Vm` view from live,
//! authoritative hypervisor state.

use std::sync::Arc;

use virtkit_common::{DomainHandle, NetworkHandle, Result, Vm, VmState};
use virtkit_hypervisor::memstats::MemoryStats;
use virtkit_hypervisor::xml::decode_domain_xml;
use virtkit_hypervisor::{Hypervisor, MEMSTATS_MAX_ENTRIES};

use crate::network::resolve_identity;
use crate::provision::DiskStager;

#[derive(Debug, Clone)]
pub struct VmManagerConfig {
    /// Virtual network VMs attach to and DHCP leases are resolved against.
    pub network: String,
    /// Host directory holding base images and per-VM disks.
    pub image_dir: String,
}

impl Default for VmManagerConfig {
    fn default() -> Self {
        VmManagerConfig {
            network: "default".to_string(),
            image_dir: "/var/lib/libvirt/images".to_string(),
        }
    }
}

/// Central orchestration point over one hypervisor session. All `Vm` values
/// in the system are produced here, from a live domain handle, so their
/// `domain_id` and `state` are never stale relative to the transport at the
/// moment of construction.
pub struct VmManager {
    hypervisor: Arc<dyn Hypervisor>,
    pub(crate) stager: Arc<dyn DiskStager>,
    pub(crate) config: VmManagerConfig,
}

impl VmManager {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        stager: Arc<dyn DiskStager>,
        config: VmManagerConfig,
    ) -> Self {
        VmManager {
            hypervisor,
            stager,
            config,
        }
    }

    pub(crate) fn hypervisor(&self) -> &dyn Hypervisor {
        self.hypervisor.as_ref()
    }

    /// Enumerate all live domains and reconcile each. Fail-fast: the first
    /// domain that cannot be reconciled aborts the whole listing, trading
    /// fleet visibility for correctness-on-error.
    pub async fn list_running_vms(&self) -> Result<Vec<Vm>> {
        let network = self.hypervisor.lookup_network(&self.config.network).await?;
        let domains = self.hypervisor.list_domains().await?;

        let mut vms = Vec::new();
        for domain in &domains {
            // -1 marks a defined-but-not-running domain.
            if domain.id != -1 {
                vms.push(self.reconcile(domain, &network).await?);
            }
        }
        Ok(vms)
    }

    /// Look up one domain by its transport-assigned runtime id and reconcile
    /// it. A domain the transport does not know is `Error::NotFound`.
    pub async fn vm_by_domain_id(&self, domain_id: i32) -> Result<Vm> {
        let network = self.hypervisor.lookup_network(&self.config.network).await?;
        let domain = self.hypervisor.lookup_domain_by_id(domain_id).await?;
        self.reconcile(&domain, &network).await
    }

    /// Point-in-time memory usage percentage for one live domain: raw stats
    /// fetch, positional decode, derived percentage.
    pub async fn memory_usage_percent(&self, domain_id: i32) -> Result<f64> {
        let domain = self.hypervisor.lookup_domain_by_id(domain_id).await?;
        let entries = self
            .hypervisor
            .memory_stats(&domain, MEMSTATS_MAX_ENTRIES)
            .await
            .map_err(|e| e.context(format!("domain {}: fetch memory stats", domain.name)))?;
        MemoryStats::decode(&entries)?.usage_percent()
    }

    /// Assemble the `Vm` record for one live domain: config document fetch and
    /// decode, live state fetch, network identity resolution. Every transport
    /// round-trip must succeed; failures carry which sub-step broke.
    pub(crate) async fn reconcile(
        &self,
        domain: &DomainHandle,
        network: &NetworkHandle,
    ) -> Result<Vm> {
        let xml = self
            .hypervisor
            .domain_xml(domain)
            .await
            .map_err(|e| e.context(format!("domain {}: fetch config", domain.name)))?;
        let config = decode_domain_xml(&xml)
            .map_err(|e| e.context(format!("domain {}", domain.name)))?;

        let state_code = self
            .hypervisor
            .domain_state(domain)
            .await
            .map_err(|e| e.context(format!("domain {}: fetch state", domain.name)))?;

        let (mac, ip) = resolve_identity(self.hypervisor.as_ref(), &config, network)
            .await
            .map_err(|e| e.context(format!("domain {}", domain.name)))?;

        Ok(Vm {
            domain_id: domain.id,
            name: domain.name.clone(),
            state: VmState::from_code(state_code),
            ip,
            mac,
            memory_mib: config.memory_mib,
            current_memory_mib: config.current_memory_mib,
            vcpus: config.vcpus,
            os_type: config.os_type,
            devices: config.devices,
        })
    }
}
