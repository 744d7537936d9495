//! Platform configuration.
//!
//! The spec references several platform-wide constants (total host memory,
//! the memory-guarantee reserve, traffic-class bandwidth bounds, the aging
//! sweeper cadence) without pinning down where they come from in this
//! crate's scope — they're operator-provided in the real daemon. We load
//! them from a small `serde_json` document, the same serialization the
//! rest of the property/snapshot layer uses.

use serde::{Deserialize, Serialize};

/// Host-wide limits and tunables the property engine enforces against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    /// Total usable host memory, in bytes. Used by the memory-guarantee
    /// overcommit invariant.
    pub total_memory_bytes: u64,

    /// Bytes withheld from `memory_guarantee` accounting, so a margin of
    /// host memory always stays unguaranteed.
    pub memory_guarantee_reserve: u64,

    /// Upper bound accepted for `net_guarantee`.
    pub max_net_guarantee: u64,

    /// Upper bound accepted for `net_limit`.
    pub max_net_limit: u64,

    /// Seconds between aging sweeps.
    pub aging_sweep_interval_secs: u64,

    /// Highest capability number reported supported by the running kernel
    /// when resolving the default set a container's capabilities fall back to.
    pub last_capability: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            total_memory_bytes: 16 * 1024 * 1024 * 1024,
            memory_guarantee_reserve: 64 * 1024 * 1024,
            max_net_guarantee: 10_000_000_000,
            max_net_limit: 10_000_000_000,
            aging_sweep_interval_secs: 10,
            last_capability: 40,
        }
    }
}

impl CoreConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_json() {
        let cfg = CoreConfig::default();
        let text = cfg.to_json().unwrap();
        let back = CoreConfig::from_json(&text).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn missing_fields_fall_back_to_default() {
        let cfg = CoreConfig::from_json("{\"aging_sweep_interval_secs\": 42}").unwrap();
        assert_eq!(cfg.aging_sweep_interval_secs, 42);
        assert_eq!(cfg.total_memory_bytes, CoreConfig::default().total_memory_bytes);
    }
}
