//! Libvirt-backed hypervisor session.
//!
//! Domain and network operations go through the `virt` bindings over one
//! shared connection (libvirt serializes request/response pairing on its
//! side). DHCP lease queries shell out to `virsh net-dhcp-leases`, which the
//! bindings do not expose.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;
use virt::connect::Connect;
use virt::domain::Domain;
use virt::network::Network;

use virtkit_common::{DhcpLease, DomainHandle, Error, MemoryStatEntry, NetworkHandle, Result};

use crate::Hypervisor;

/// A hung dial must not hang process startup.
const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

pub struct LibvirtHypervisor {
    uri: String,
    connection: Connect,
}

impl LibvirtHypervisor {
    /// Connect to libvirt at the given URI (`qemu:///system`,
    /// `qemu+tcp://host/system`, ...) with a bounded dial timeout.
    pub async fn connect(uri: &str) -> Result<Self> {
        let dial_uri = uri.to_string();
        let connection = tokio::time::timeout(
            DIAL_TIMEOUT,
            tokio::task::spawn_blocking(move || Connect::open(Some(&dial_uri))),
        )
        .await
        .map_err(|_| Error::Transport(format!("connect to {uri}: dial timed out")))?
        .map_err(|e| Error::Transport(format!("connect to {uri}: {e}")))?
        .map_err(|e| Error::Transport(format!("connect to {uri}: {e}")))?;

        info!(uri, "connected to libvirt");
        Ok(LibvirtHypervisor {
            uri: uri.to_string(),
            connection,
        })
    }

    /// Re-resolve a handle to a live `Domain`. Handles carry the domain UUID,
    /// which stays valid across the runtime-id recycling that makes `id`
    /// unusable as a durable key.
    fn domain(&self, handle: &DomainHandle) -> Result<Domain> {
        Domain::lookup_by_uuid_string(&self.connection, &handle.uuid.to_string())
            .map_err(|e| Error::NotFound(format!("domain {}: {e}", handle.name)))
    }

    fn handle_for(&self, domain: &Domain) -> Result<DomainHandle> {
        let name = domain
            .get_name()
            .map_err(|e| Error::Transport(format!("domain name: {e}")))?;
        let uuid_str = domain
            .get_uuid_string()
            .map_err(|e| Error::Transport(format!("domain {name} uuid: {e}")))?;
        let uuid = Uuid::parse_str(&uuid_str)
            .map_err(|e| Error::Transport(format!("domain {name} uuid '{uuid_str}': {e}")))?;
        // get_id returns None for defined-but-not-running domains; -1 marks
        // those for callers filtering on live identity.
        let id = domain.get_id().map(|id| id as i32).unwrap_or(-1);
        Ok(DomainHandle { id, uuid, name })
    }
}

#[async_trait]
impl Hypervisor for LibvirtHypervisor {
    async fn list_domains(&self) -> Result<Vec<DomainHandle>> {
        let domains = self
            .connection
            .list_all_domains(0)
            .map_err(|e| Error::Transport(format!("list domains: {e}")))?;
        domains.iter().map(|d| self.handle_for(d)).collect()
    }

    async fn lookup_domain_by_id(&self, id: i32) -> Result<DomainHandle> {
        if id < 0 {
            return Err(Error::NotFound(format!("domain {id}")));
        }
        let domain = Domain::lookup_by_id(&self.connection, id as u32)
            .map_err(|e| Error::NotFound(format!("domain {id}: {e}")))?;
        self.handle_for(&domain)
    }

    async fn domain_xml(&self, handle: &DomainHandle) -> Result<String> {
        self.domain(handle)?
            .get_xml_desc(0)
            .map_err(|e| Error::Transport(format!("domain {} xml: {e}", handle.name)))
    }

    async fn domain_state(&self, handle: &DomainHandle) -> Result<i32> {
        let (state, _reason) = self
            .domain(handle)?
            .get_state()
            .map_err(|e| Error::Transport(format!("domain {} state: {e}", handle.name)))?;
        Ok(state as i32)
    }

    async fn memory_stats(
        &self,
        handle: &DomainHandle,
        max_entries: u32,
    ) -> Result<Vec<MemoryStatEntry>> {
        let stats = self
            .domain(handle)?
            .memory_stats(0)
            .map_err(|e| Error::Transport(format!("domain {} memory stats: {e}", handle.name)))?;
        let mut entries: Vec<MemoryStatEntry> = stats
            .iter()
            .map(|s| MemoryStatEntry {
                tag: s.tag as i32,
                value: s.val,
            })
            .collect();
        entries.truncate(max_entries as usize);
        Ok(entries)
    }

    async fn lookup_network(&self, name: &str) -> Result<NetworkHandle> {
        let network = Network::lookup_by_name(&self.connection, name)
            .map_err(|e| Error::NotFound(format!("network {name}: {e}")))?;
        let uuid_str = network
            .get_uuid_string()
            .map_err(|e| Error::Transport(format!("network {name} uuid: {e}")))?;
        let uuid = Uuid::parse_str(&uuid_str)
            .map_err(|e| Error::Transport(format!("network {name} uuid '{uuid_str}': {e}")))?;
        Ok(NetworkHandle {
            name: name.to_string(),
            uuid,
        })
    }

    async fn dhcp_leases(
        &self,
        network: &NetworkHandle,
        mac: Option<&str>,
    ) -> Result<Vec<DhcpLease>> {
        let mut cmd = Command::new("virsh");
        cmd.args(["-c", &self.uri, "net-dhcp-leases", &network.name]);
        if let Some(mac) = mac {
            cmd.args(["--mac", mac]);
        }
        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Transport(format!("spawn virsh: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Transport(format!(
                "virsh net-dhcp-leases {}: {}",
                network.name,
                stderr.trim()
            )));
        }
        Ok(parse_lease_table(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn create_domain(&self, xml: &str) -> Result<DomainHandle> {
        let domain = Domain::create_xml(&self.connection, xml, 0)
            .map_err(|e| Error::Transport(format!("create domain: {e}")))?;
        self.handle_for(&domain)
    }

    async fn set_memory_stats_period(&self, handle: &DomainHandle, seconds: i32) -> Result<()> {
        self.domain(handle)?
            .set_memory_stats_period(seconds, 0)
            .map_err(|e| {
                Error::Transport(format!("domain {} stats period: {e}", handle.name))
            })?;
        Ok(())
    }
}

/// Parse the virsh lease table:
///
/// ```text
///  Expiry Time           MAC address         Protocol   IP address          Hostname   Client ID or DUID
/// ---------------------------------------------------------------------------------------------------
///  2020-11-21 19:49:59   52:54:00:6c:3c:01   ipv4       192.168.122.45/24   web-1      01:52:54:00:...
/// ```
fn parse_lease_table(stdout: &str) -> Vec<DhcpLease> {
    let mut leases = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('-') || line.starts_with("Expiry") {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            warn!(line, "skipping unparseable lease line");
            continue;
        }
        let expiry = NaiveDateTime::parse_from_str(
            &format!("{} {}", fields[0], fields[1]),
            "%Y-%m-%d %H:%M:%S",
        )
        .ok()
        .map(|dt| dt.and_utc());
        let ip = fields[4].split('/').next().unwrap_or(fields[4]).to_string();
        let hostname = fields
            .get(5)
            .filter(|h| **h != "-")
            .map(|h| h.to_string());
        leases.push(DhcpLease {
            mac: fields[2].to_string(),
            ip,
            hostname,
            expiry,
        });
    }
    leases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lease_table_rows() {
        let out = " Expiry Time           MAC address         Protocol   IP address          Hostname   Client ID or DUID\n\
                    ---------------------------------------------------------------------------------------------------\n\
                    \n \
                    2020-11-21 19:49:59   52:54:00:6c:3c:01   ipv4       192.168.122.45/24   web-1      01:52:54:00:6c:3c:01\n \
                    2020-11-21 20:03:12   52:54:00:aa:bb:cc   ipv4       192.168.122.46/24   -          -\n";
        let leases = parse_lease_table(out);
        assert_eq!(leases.len(), 2);
        assert_eq!(leases[0].mac, "52:54:00:6c:3c:01");
        assert_eq!(leases[0].ip, "192.168.122.45");
        assert_eq!(leases[0].hostname.as_deref(), Some("web-1"));
        assert!(leases[0].expiry.is_some());
        assert_eq!(leases[1].ip, "192.168.122.46");
        assert_eq!(leases[1].hostname, None);
    }
}
