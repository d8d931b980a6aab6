//! In-memory doubles for the persistence and disk-staging seams.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use virtkit_common::{Error, MemUsage, Result};

use crate::provision::DiskStager;
use crate::storage::Datastore;

struct VmRow {
    id: i64,
    name: String,
    domain_id: i32,
}

#[derive(Default)]
struct StoreInner {
    next_id: i64,
    vms: Vec<VmRow>,
    samples: Vec<(i64, MemUsage)>,
    fail_domains: HashSet<i32>,
}

/// Mutex-guarded `Datastore` double, mirroring the surrogate-key scheme of
/// the real schema so id-translation bugs surface in tests.
pub struct MemoryDatastore {
    inner: Mutex<StoreInner>,
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatastore {
    pub fn new() -> Self {
        MemoryDatastore {
            inner: Mutex::new(StoreInner {
                next_id: 1,
                ..StoreInner::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("memory datastore lock")
    }

    /// Make writes for one domain fail with a storage error.
    pub fn fail_for_domain(&self, domain_id: i32) {
        self.state().fail_domains.insert(domain_id);
    }

    /// Registered VMs as `(surrogate id, name, domain id)`, in insertion order.
    pub fn registered_vms(&self) -> Vec<(i64, String, i32)> {
        self.state()
            .vms
            .iter()
            .map(|v| (v.id, v.name.clone(), v.domain_id))
            .collect()
    }

    /// Samples recorded for the VM currently holding `domain_id`.
    pub fn samples_for(&self, domain_id: i32) -> Vec<MemUsage> {
        let inner = self.state();
        let Some(vm_id) = inner
            .vms
            .iter()
            .rev()
            .find(|v| v.domain_id == domain_id)
            .map(|v| v.id)
        else {
            return Vec::new();
        };
        inner
            .samples
            .iter()
            .filter(|(id, _)| *id == vm_id)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn create_vm(&self, name: &str, domain_id: i32) -> Result<i64> {
        let mut inner = self.state();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.vms.push(VmRow {
            id,
            name: name.to_string(),
            domain_id,
        });
        Ok(id)
    }

    async fn vm_id_for_domain(&self, domain_id: i32) -> Result<i64> {
        self.state()
            .vms
            .iter()
            .rev()
            .find(|v| v.domain_id == domain_id)
            .map(|v| v.id)
            .ok_or_else(|| Error::NotFound(format!("vm for domain {domain_id}")))
    }

    async fn record_usage(&self, domain_id: i32, usage: f64) -> Result<()> {
        let vm_id = self.vm_id_for_domain(domain_id).await?;
        let mut inner = self.state();
        if inner.fail_domains.contains(&domain_id) {
            return Err(Error::Storage(sqlx::Error::PoolClosed));
        }
        inner.samples.push((
            vm_id,
            MemUsage {
                time: Utc::now(),
                usage,
            },
        ));
        Ok(())
    }

    async fn recent_usage(&self, vm_id: i64) -> Result<Vec<MemUsage>> {
        let mut samples: Vec<MemUsage> = self
            .state()
            .samples
            .iter()
            .filter(|(id, _)| *id == vm_id)
            .map(|(_, s)| s.clone())
            .collect();
        samples.reverse();
        samples.truncate(12);
        Ok(samples)
    }
}

#[derive(Default)]
struct StagerInner {
    staged: Vec<String>,
    cleaned: Vec<String>,
}

/// `DiskStager` double that records staged and cleaned artifact names
/// instead of touching an image host.
pub struct StubStager {
    inner: Mutex<StagerInner>,
    fail_stage: bool,
}

impl Default for StubStager {
    fn default() -> Self {
        Self::new()
    }
}

impl StubStager {
    pub fn new() -> Self {
        StubStager {
            inner: Mutex::new(StagerInner::default()),
            fail_stage: false,
        }
    }

    /// A stager whose staging step always fails.
    pub fn failing() -> Self {
        StubStager {
            inner: Mutex::new(StagerInner::default()),
            fail_stage: true,
        }
    }

    pub fn staged(&self) -> Vec<String> {
        self.inner.lock().expect("stub stager lock").staged.clone()
    }

    pub fn cleaned(&self) -> Vec<String> {
        self.inner.lock().expect("stub stager lock").cleaned.clone()
    }
}

#[async_trait]
impl DiskStager for StubStager {
    async fn stage_disks(&self, machine_type: &str, unique_id: &str) -> Result<()> {
        if self.fail_stage {
            return Err(Error::Provision(format!(
                "staging disks for {machine_type}-{unique_id}: image host unreachable"
            )));
        }
        self.inner
            .lock()
            .expect("stub stager lock")
            .staged
            .push(format!("{machine_type}-{unique_id}"));
        Ok(())
    }

    async fn cleanup_disks(&self, machine_type: &str, unique_id: &str) -> Result<()> {
        self.inner
            .lock()
            .expect("stub stager lock")
            .cleaned
            .push(format!("{machine_type}-{unique_id}"));
        Ok(())
    }
}
