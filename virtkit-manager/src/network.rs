//! Network identity resolution: which MAC a domain has on the target network,
//! and which IP the network's DHCP server has leased to that MAC.

use virtkit_common::{DomainConfig, Error, NetworkHandle, Result, PENDING};
use virtkit_hypervisor::Hypervisor;

/// Resolve `(mac, ip)` for a decoded domain against the target network.
///
/// No interface bound to the network yet (the domain has not finished
/// attaching) resolves to `("pending", "pending")`; a bound interface with no
/// matching lease resolves to `(mac, "pending")`. When several leases carry
/// the same MAC the first encountered wins; the lease-query contract gives no
/// stronger ordering and this mirrors it deliberately.
///
/// A failing lease query is a `Resolution` error, not "pending": the caller
/// must not report an identity it could not actually look up.
pub async fn resolve_identity(
    hypervisor: &dyn Hypervisor,
    config: &DomainConfig,
    network: &NetworkHandle,
) -> Result<(String, String)> {
    let mac = config
        .devices
        .interfaces
        .iter()
        .find(|iface| iface.network.as_deref() == Some(network.name.as_str()))
        .and_then(|iface| iface.mac.clone());

    let Some(mac) = mac else {
        return Ok((PENDING.to_string(), PENDING.to_string()));
    };

    let leases = hypervisor
        .dhcp_leases(network, Some(&mac))
        .await
        .map_err(|e| Error::Resolution(format!("dhcp leases for {mac}: {e}")))?;

    let ip = leases
        .iter()
        .find(|lease| lease.mac == mac)
        .map(|lease| lease.ip.clone())
        .unwrap_or_else(|| PENDING.to_string());

    Ok((mac, ip))
}
