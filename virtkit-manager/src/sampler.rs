//! Periodic memory telemetry collection for the running fleet.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use virtkit_common::Result;

use crate::manager::VmManager;
use crate::storage::Datastore;

/// Sampling loop: every `interval_secs`, sample the whole fleet and persist
/// one usage reading per reachable VM. Runs until the task is dropped.
pub async fn run(manager: Arc<VmManager>, store: Arc<dyn Datastore>, interval_secs: u64) {
    info!("📊 Memory sampler started (every {interval_secs}s)");
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        match sample_all(&manager, store.as_ref()).await {
            Ok(recorded) => info!(recorded, "memory sampling pass complete"),
            Err(e) => warn!(error = %e, "memory sampling pass failed"),
        }
    }
}

/// One sampling pass. Listing the fleet is fail-fast and fails the whole
/// pass; per-VM sampling and persistence are best-effort, so one broken
/// guest never starves the others of telemetry. Returns the number of
/// samples recorded.
pub async fn sample_all(manager: &VmManager, store: &dyn Datastore) -> Result<usize> {
    let vms = manager.list_running_vms().await?;

    let mut recorded = 0;
    for vm in &vms {
        let usage = match manager.memory_usage_percent(vm.domain_id).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(vm = %vm.name, error = %e, "skipping memory sample");
                continue;
            }
        };
        if let Err(e) = store.record_usage(vm.domain_id, usage).await {
            warn!(vm = %vm.name, error = %e, "persisting memory sample");
            continue;
        }
        recorded += 1;
    }
    Ok(recorded)
}
