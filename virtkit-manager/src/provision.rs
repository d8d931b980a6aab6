//! VM provisioning: disk staging on the image host, descriptor creation,
//! and post-create telemetry arming.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;
use uuid::Uuid;

use virtkit_common::{Error, Result, Vm};
use virtkit_hypervisor::xml::build_domain_xml;

use crate::manager::VmManager;

/// Balloon driver collection period armed on freshly created domains, in
/// seconds. Without it the guest never refreshes its memory stats and the
/// sampler reads stale zeros.
pub const MEMORY_STATS_PERIOD_SECS: i32 = 5;

/// Normalize a requested memory size in GiB to a provisionable size in MiB.
/// Only 1, 2, 4 and 8 GiB shapes exist; anything else downgrades to 2 GiB.
pub fn memory_mib_for(gib: u32) -> u64 {
    match gib {
        1 => 1024,
        2 => 2048,
        4 => 4096,
        8 => 8192,
        _ => 2048,
    }
}

/// Normalize a requested vCPU count. Only 1, 2 and 4 are provisionable;
/// anything else downgrades to 1.
pub fn vcpus_for(requested: u32) -> u32 {
    match requested {
        1 | 2 | 4 => requested,
        _ => 1,
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Prepares per-VM disk artifacts on the image host before a domain is
/// created, and removes them again if creation does not go through.
#[async_trait]
pub trait DiskStager: Send + Sync {
    /// Stage the root disk and cloud-init seed ISO for `{machine_type}-{unique_id}`.
    async fn stage_disks(&self, machine_type: &str, unique_id: &str) -> Result<()>;

    /// Remove previously staged artifacts. Callers treat failure here as
    /// non-fatal; orphaned files are reclaimed out of band.
    async fn cleanup_disks(&self, machine_type: &str, unique_id: &str) -> Result<()>;
}

/// Stages disks over ssh on a remote image host: copy-on-write of the base
/// image plus a `cloud-localds` seed ISO, both derived from the machine type.
pub struct SshDiskStager {
    user: String,
    host: String,
    image_dir: String,
}

impl SshDiskStager {
    pub fn new(user: impl Into<String>, host: impl Into<String>, image_dir: impl Into<String>) -> Self {
        SshDiskStager {
            user: user.into(),
            host: host.into(),
            image_dir: image_dir.into(),
        }
    }

    async fn run_remote(&self, script: &str) -> Result<()> {
        let target = format!("{}@{}", self.user, self.host);
        let output = Command::new("ssh")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(&target)
            .arg(script)
            .output()
            .await
            .map_err(|e| Error::Provision(format!("ssh {target}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Provision(format!(
                "ssh {target}: {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DiskStager for SshDiskStager {
    async fn stage_disks(&self, machine_type: &str, unique_id: &str) -> Result<()> {
        let dir = &self.image_dir;
        let script = [
            format!("cp {dir}/{machine_type}.img {dir}/{machine_type}-{unique_id}.img"),
            format!("cloud-localds {dir}/{machine_type}-{unique_id}.iso {dir}/cloud.txt"),
        ]
        .join("; ");
        self.run_remote(&script).await
    }

    async fn cleanup_disks(&self, machine_type: &str, unique_id: &str) -> Result<()> {
        let dir = &self.image_dir;
        let script = format!(
            "rm -f {dir}/{machine_type}-{unique_id}.img {dir}/{machine_type}-{unique_id}.iso"
        );
        self.run_remote(&script).await
    }
}

impl VmManager {
    /// Provision a new VM: stage its disks, create the domain from a built
    /// descriptor, arm memory stats collection, then reconcile the fresh
    /// domain into a `Vm`. Staging failure aborts before anything is created;
    /// creation failure triggers best-effort disk cleanup.
    pub async fn create_vm(&self, machine_type: &str, memory_gib: u32, vcpus: u32) -> Result<Vm> {
        let unique_id = short_id();
        let name = format!("{machine_type}-{unique_id}");
        let memory_mib = memory_mib_for(memory_gib);
        let vcpus = vcpus_for(vcpus);

        self.stager.stage_disks(machine_type, &unique_id).await?;

        let dir = &self.config.image_dir;
        let root_disk = format!("{dir}/{machine_type}-{unique_id}.img");
        let seed_iso = format!("{dir}/{machine_type}-{unique_id}.iso");
        let xml = build_domain_xml(&name, memory_mib, vcpus, &root_disk, &seed_iso, &self.config.network);

        let domain = match self.hypervisor().create_domain(&xml).await {
            Ok(domain) => domain,
            Err(e) => {
                if let Err(cleanup_err) = self.stager.cleanup_disks(machine_type, &unique_id).await {
                    warn!(vm = %name, error = %cleanup_err, "disk cleanup after failed create");
                }
                return Err(e.context(format!("create domain {name}")));
            }
        };

        if let Err(e) = self
            .hypervisor()
            .set_memory_stats_period(&domain, MEMORY_STATS_PERIOD_SECS)
            .await
        {
            warn!(vm = %name, error = %e, "arming memory stats period");
        }

        let network = self.hypervisor().lookup_network(&self.config.network).await?;
        self.reconcile(&domain, &network).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::VmManagerConfig;
    use crate::mock::StubStager;
    use std::sync::Arc;
    use virtkit_common::{PENDING, VmState};
    use virtkit_hypervisor::mock::MockHypervisor;

    fn manager_with(hv: Arc<MockHypervisor>, stager: Arc<StubStager>) -> VmManager {
        VmManager::new(hv, stager, VmManagerConfig::default())
    }

    #[test]
    fn memory_shapes_are_whitelisted() {
        assert_eq!(memory_mib_for(1), 1024);
        assert_eq!(memory_mib_for(2), 2048);
        assert_eq!(memory_mib_for(4), 4096);
        assert_eq!(memory_mib_for(8), 8192);
        assert_eq!(memory_mib_for(3), 2048);
        assert_eq!(memory_mib_for(16), 2048);
        assert_eq!(memory_mib_for(0), 2048);
    }

    #[test]
    fn vcpu_shapes_are_whitelisted() {
        assert_eq!(vcpus_for(1), 1);
        assert_eq!(vcpus_for(2), 2);
        assert_eq!(vcpus_for(4), 4);
        assert_eq!(vcpus_for(3), 1);
        assert_eq!(vcpus_for(8), 1);
        assert_eq!(vcpus_for(0), 1);
    }

    #[test]
    fn short_ids_are_twelve_hex_chars() {
        let id = short_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(short_id(), id);
    }

    #[tokio::test]
    async fn creates_and_reconciles_vm() {
        let hv = Arc::new(MockHypervisor::new());
        let stager = Arc::new(StubStager::new());
        let mgr = manager_with(hv.clone(), stager.clone());

        let vm = mgr.create_vm("ubuntu-noble", 4, 2).await.unwrap();
        assert!(vm.name.starts_with("ubuntu-noble-"));
        assert_eq!(vm.state, VmState::Running);
        assert_eq!(vm.memory_mib, 4096);
        assert_eq!(vm.vcpus, 2);
        assert_eq!(vm.mac, PENDING);
        assert_eq!(vm.ip, PENDING);

        assert_eq!(stager.staged().len(), 1);
        assert!(stager.cleaned().is_empty());
        assert_eq!(hv.created_domains().len(), 1);
        assert!(hv.created_domains()[0].contains("ubuntu-noble-"));
        assert_eq!(hv.stats_period(vm.domain_id), Some(MEMORY_STATS_PERIOD_SECS));
    }

    #[tokio::test]
    async fn oversized_request_downgrades_to_defaults() {
        let hv = Arc::new(MockHypervisor::new());
        let mgr = manager_with(hv, Arc::new(StubStager::new()));

        let vm = mgr.create_vm("ubuntu-noble", 3, 6).await.unwrap();
        assert_eq!(vm.memory_mib, 2048);
        assert_eq!(vm.vcpus, 1);
    }

    #[tokio::test]
    async fn staging_failure_aborts_before_create() {
        let hv = Arc::new(MockHypervisor::new());
        let stager = Arc::new(StubStager::failing());
        let mgr = manager_with(hv.clone(), stager.clone());

        let err = mgr.create_vm("ubuntu-noble", 2, 1).await.unwrap_err();
        assert!(matches!(err, virtkit_common::Error::Provision(_)));
        assert!(hv.created_domains().is_empty());
        assert!(stager.cleaned().is_empty());
    }

    #[tokio::test]
    async fn create_failure_cleans_staged_disks() {
        let hv = Arc::new(MockHypervisor::new());
        hv.fail_domain_creation();
        let stager = Arc::new(StubStager::new());
        let mgr = manager_with(hv.clone(), stager.clone());

        let err = mgr.create_vm("ubuntu-noble", 2, 1).await.unwrap_err();
        assert!(matches!(err, virtkit_common::Error::Transport(_)));
        assert!(hv.created_domains().is_empty());

        // Disks were staged, creation failed, so the staged pair was removed.
        assert_eq!(stager.staged().len(), 1);
        assert_eq!(stager.cleaned(), stager.staged());
    }
}
