use async_trait::async_trait;
use virtkit_common::{DhcpLease, DomainHandle, MemoryStatEntry, NetworkHandle, Result};

pub mod memstats;
pub mod xml;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "libvirt")]
pub mod libvirt;

/// Maximum number of memory-statistics entries requested per query. The
/// positional decoder in [`memstats`] is only verified against exactly this
/// many entries.
pub const MEMSTATS_MAX_ENTRIES: u32 = 10;

/// Session to one hypervisor host's control protocol.
///
/// Implementations that wrap a single non-reentrant request/response exchange
/// must serialize access internally: one in-flight call per session at a time,
/// so that one response always belongs to exactly one request.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Enumerate all domains known to the host, running or not. Callers
    /// filter on `DomainHandle::id != -1` for live domains.
    async fn list_domains(&self) -> Result<Vec<DomainHandle>>;

    /// Look up one domain by its transport-assigned runtime id. A missing
    /// domain is `Error::NotFound`, never a transport failure.
    async fn lookup_domain_by_id(&self, id: i32) -> Result<DomainHandle>;

    /// Fetch the domain's XML configuration document.
    async fn domain_xml(&self, domain: &DomainHandle) -> Result<String>;

    /// Fetch the domain's current state code. See `VmState::from_code` for
    /// the application-level mapping.
    async fn domain_state(&self, domain: &DomainHandle) -> Result<i32>;

    /// Fetch up to `max_entries` raw (tag, value) memory-statistics pairs,
    /// in the order the hypervisor returns them.
    async fn memory_stats(
        &self,
        domain: &DomainHandle,
        max_entries: u32,
    ) -> Result<Vec<MemoryStatEntry>>;

    /// Look up a virtual network by name.
    async fn lookup_network(&self, name: &str) -> Result<NetworkHandle>;

    /// Current DHCP lease table for a network, optionally filtered by MAC.
    async fn dhcp_leases(
        &self,
        network: &NetworkHandle,
        mac: Option<&str>,
    ) -> Result<Vec<DhcpLease>>;

    /// Create and start a domain from an XML descriptor.
    async fn create_domain(&self, xml: &str) -> Result<DomainHandle>;

    /// Enable periodic balloon-statistics collection so later memory-stats
    /// queries return fresh data.
    async fn set_memory_stats_period(&self, domain: &DomainHandle, seconds: i32) -> Result<()>;
}
