//! Decoding the hypervisor's memory-statistics array into named counters.
//!
//! The transport returns (tag, value) pairs, but the tag values are not
//! documented anywhere usable. The mapping below trusts array POSITION, not
//! the tag field: it was derived empirically by lining the array up against
//! `virsh dommemstat` output, and held for every observation made against one
//! hypervisor version. Known fragility: if the transport ever reorders the
//! array, this decoder mislabels values with no way to detect it from the
//! data alone. Re-verify the ordering on any hypervisor upgrade.
//!
//! Reference observation (tags as returned, labels from virsh):
//!   [0] tag 6 -> actual        [5] tag 5 -> available
//!   [1] tag 0 -> swap_in       [6] tag 8 -> usable
//!   [2] tag 1 -> swap_out      [7] tag 9 -> last_update
//!   [3] tag 2 -> major_fault   [8] tag 7 -> rss
//!   [4] tag 4 -> unused
//! (minor_fault sits between major_fault and unused.)

use serde::{Deserialize, Serialize};
use virtkit_common::{Error, MemoryStatEntry, Result};

/// Number of entries the positional mapping was verified against. Any other
/// length means the mapping cannot be trusted, so decoding fails outright.
pub const EXPECTED_ENTRIES: usize = 10;

/// Named memory counters for one domain, decoded from the raw stats array.
/// Values are in KiB except `last_update` (seconds since epoch).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    pub actual: u64,
    pub swap_in: u64,
    pub swap_out: u64,
    pub major_fault: u64,
    pub minor_fault: u64,
    pub unused: u64,
    pub available: u64,
    pub usable: u64,
    pub last_update: u64,
    pub rss: u64,
}

impl MemoryStats {
    /// Decode the fixed-order stats array. Fails with `MalformedStats` for
    /// any length other than [`EXPECTED_ENTRIES`]; never a partial result.
    pub fn decode(entries: &[MemoryStatEntry]) -> Result<MemoryStats> {
        if entries.len() != EXPECTED_ENTRIES {
            return Err(Error::MalformedStats {
                expected: EXPECTED_ENTRIES,
                got: entries.len(),
            });
        }
        Ok(MemoryStats {
            actual: entries[0].value,
            swap_in: entries[1].value,
            swap_out: entries[2].value,
            major_fault: entries[3].value,
            minor_fault: entries[4].value,
            unused: entries[5].value,
            available: entries[6].value,
            usable: entries[7].value,
            last_update: entries[8].value,
            rss: entries[9].value,
        })
    }

    /// Point-in-time memory usage as a percentage of available memory.
    /// `available == 0` indicates broken balloon reporting and surfaces as
    /// `DivisionByZeroStat` rather than propagating NaN or infinity.
    pub fn usage_percent(&self) -> Result<f64> {
        if self.available == 0 {
            return Err(Error::DivisionByZeroStat);
        }
        Ok((self.available as f64 - self.usable as f64) / self.available as f64 * 100.0)
    }
}
