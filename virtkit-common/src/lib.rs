use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::{Error, Result};

// --- Enums ---

/// Application-level view of a hypervisor domain state code.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum VmState {
    Unknown,
    Running,
    Blocked,
    Paused,
    ShuttingDown,
    Off,
    Crashed,
    PmSuspended,
}

impl VmState {
    /// Fixed table for the 8 known hypervisor state codes. Codes outside the
    /// table map to `Unknown` rather than failing; a new hypervisor state must
    /// never crash reconciliation.
    pub fn from_code(code: i32) -> VmState {
        match code {
            0 => VmState::Unknown,
            1 => VmState::Running,
            2 => VmState::Blocked,
            3 => VmState::Paused,
            4 => VmState::ShuttingDown,
            5 => VmState::Off,
            6 => VmState::Crashed,
            7 => VmState::PmSuspended,
            _ => VmState::Unknown,
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VmState::Unknown => "unknown",
            VmState::Running => "running",
            VmState::Blocked => "blocked",
            VmState::Paused => "paused",
            VmState::ShuttingDown => "shutting-down",
            VmState::Off => "off",
            VmState::Crashed => "crashed",
            VmState::PmSuspended => "pm-suspended",
        };
        f.write_str(s)
    }
}

// --- Transport-level records ---

/// Runtime identity of a domain as reported by the hypervisor. `id` is -1 for
/// domains that are defined but not running, and is recycled across restarts,
/// so it is never used as a durable key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainHandle {
    pub id: i32,
    pub uuid: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub name: String,
    pub uuid: Uuid,
}

/// One DHCP-assigned IP-to-MAC binding known to the hypervisor's virtual
/// network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpLease {
    pub mac: String,
    pub ip: String,
    pub hostname: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

/// Raw (tag, value) pair from the hypervisor's memory-statistics query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStatEntry {
    pub tag: i32,
    pub value: u64,
}

// --- Decoded domain configuration ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OsType {
    pub arch: Option<String>,
    pub machine: Option<String>,
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub mac: Option<String>,
    pub network: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DiskConfig {
    pub source_file: Option<String>,
    pub target_dev: Option<String>,
    pub target_bus: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct DeviceList {
    pub interfaces: Vec<InterfaceConfig>,
    pub disks: Vec<DiskConfig>,
}

/// Structured view of a domain's XML configuration document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    pub name: String,
    pub memory_mib: u64,
    pub current_memory_mib: u64,
    pub vcpus: u32,
    pub os_type: OsType,
    pub devices: DeviceList,
}

// --- Application entities ---

/// Sentinel for a network identity that has not resolved yet: either no
/// interface is bound to the target network, or no DHCP lease exists for the
/// interface's MAC.
pub const PENDING: &str = "pending";

/// The application's view of one live hypervisor domain. Always derived by the
/// reconciler from a live domain handle, never constructed independently, so
/// `domain_id` and `state` are current as of the last transport round-trip.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Vm {
    pub domain_id: i32,
    pub name: String,
    pub state: VmState,
    pub ip: String,
    pub mac: String,
    pub memory_mib: u64,
    pub current_memory_mib: u64,
    pub vcpus: u32,
    pub os_type: OsType,
    pub devices: DeviceList,
}

/// One persisted memory-usage sample, read back for charting.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct MemUsage {
    pub time: DateTime<Utc>,
    pub usage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_table_covers_known_codes() {
        assert_eq!(VmState::from_code(0), VmState::Unknown);
        assert_eq!(VmState::from_code(1), VmState::Running);
        assert_eq!(VmState::from_code(2), VmState::Blocked);
        assert_eq!(VmState::from_code(3), VmState::Paused);
        assert_eq!(VmState::from_code(4), VmState::ShuttingDown);
        assert_eq!(VmState::from_code(5), VmState::Off);
        assert_eq!(VmState::from_code(6), VmState::Crashed);
        assert_eq!(VmState::from_code(7), VmState::PmSuspended);
    }

    #[test]
    fn unrecognized_state_codes_map_to_unknown() {
        assert_eq!(VmState::from_code(8), VmState::Unknown);
        assert_eq!(VmState::from_code(99), VmState::Unknown);
        assert_eq!(VmState::from_code(-1), VmState::Unknown);
    }

    #[test]
    fn vm_state_serializes_kebab_case() {
        let s = serde_json::to_string(&VmState::ShuttingDown).unwrap();
        assert_eq!(s, "\"shutting-down\"");
        let s = serde_json::to_string(&VmState::PmSuspended).unwrap();
        assert_eq!(s, "\"pm-suspended\"");
    }
}
