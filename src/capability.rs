//! Capability interfaces consumed by the property/traffic layers.
//!
//! These are the seams the core requires from external collaborators:
//! the cgroup subsystems, the netlink-backed network stack, and the
//! snapshot store. Production wiring plugs in real implementations that
//! shell out to cgroupfs/netlink/a KV store; this crate only defines the
//! traits and, for tests, in-memory fakes.

use std::collections::HashMap;

use crate::error::CoreResult;

/// A single resource-controller operation result: ok, or a kernel-level
/// failure with an errno when one is available.
pub type CapResult<T> = CoreResult<T>;

/// CPU scheduling policy understood by `CpuSubsystem::set_cpu_policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, parse_display::Display, parse_display::FromStr)]
#[display(style = "lowercase")]
pub enum CpuPolicyKind {
    Rt,
    Normal,
    Idle,
}

/// Per-container memory cgroup operations.
pub trait MemorySubsystem {
    fn set_guarantee(&mut self, container_id: u64, bytes: u64) -> CapResult<()>;
    fn set_limit(&mut self, container_id: u64, bytes: u64) -> CapResult<()>;
    fn set_anon_limit(&mut self, container_id: u64, bytes: u64) -> CapResult<()>;
    fn set_dirty_limit(&mut self, container_id: u64, bytes: u64) -> CapResult<()>;
    fn set_recharge_on_pgfault(&mut self, container_id: u64, enabled: bool) -> CapResult<()>;
    fn usage(&self, container_id: u64) -> CapResult<u64>;
    fn anon_usage(&self, container_id: u64) -> CapResult<u64>;
    fn statistics(&self, container_id: u64) -> CapResult<HashMap<String, u64>>;
    fn is_supported(&self) -> bool {
        true
    }
}

/// Per-container cpu cgroup operations.
pub trait CpuSubsystem {
    fn set_cpu_policy(
        &mut self,
        container_id: u64,
        policy: CpuPolicyKind,
        guarantee_cores: f64,
        limit_cores: f64,
    ) -> CapResult<()>;
    fn is_supported(&self) -> bool {
        true
    }
}

/// Per-container cpuacct accounting reads.
pub trait CpuacctSubsystem {
    fn cpu_usage(&self, container_id: u64) -> CapResult<u64>;
    fn cpu_usage_system(&self, container_id: u64) -> CapResult<u64>;
    fn is_supported(&self) -> bool {
        true
    }
}

/// Per-container blkio cgroup operations.
pub trait BlkioSubsystem {
    fn set_io_policy(&mut self, container_id: u64, batch: bool) -> CapResult<()>;
    fn set_io_limit(&mut self, container_id: u64, bytes_per_sec: u64) -> CapResult<()>;
    fn set_iops_limit(&mut self, container_id: u64, ops_per_sec: u64) -> CapResult<()>;
    fn statistics(&self, container_id: u64) -> CapResult<HashMap<String, u64>>;
    fn is_supported(&self) -> bool {
        true
    }
}

/// Per-interface traffic class parameters, keyed by a container's minor
/// handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficClassUpdate {
    pub parent_minor: u32,
    pub minor: u32,
    pub prio: HashMap<String, u32>,
    pub rate: HashMap<String, u64>,
    pub ceil: HashMap<String, u64>,
}

/// Statistic kinds readable back per traffic class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficStatKind {
    Bytes,
    Packets,
    Drops,
    Overlimits,
    RxBytes,
    RxPackets,
    RxDrops,
}

pub trait NetworkCapability {
    fn update_traffic_classes(&mut self, iface: &str, update: &TrafficClassUpdate) -> CapResult<()>;
    fn remove_traffic_classes(&mut self, iface: &str, minor: u32) -> CapResult<()>;
    fn traffic_counters(
        &self,
        iface: &str,
        minor: u32,
        kind: TrafficStatKind,
    ) -> CapResult<u64>;
    fn interface_counters(&self, iface: &str, kind: TrafficStatKind) -> CapResult<u64>;
    /// Reads back the last class pushed for `(iface, minor)`, for callers
    /// (and tests) that need to confirm what was actually programmed
    /// rather than just that the call succeeded.
    fn current_class(&self, _iface: &str, _minor: u32) -> Option<TrafficClassUpdate> {
        None
    }
    fn is_supported(&self) -> bool {
        true
    }
}

/// Serializes/restores one property value as a textual line, for every
/// property where serialization to a persisted snapshot is enabled.
pub trait SnapshotSink {
    fn put(&mut self, container: &str, property: &str, value: &str) -> CoreResult<()>;
}

pub trait SnapshotSource {
    fn get(&self, container: &str, property: &str) -> CoreResult<Option<String>>;
    fn properties_of(&self, container: &str) -> CoreResult<Vec<String>>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fakes {
    use std::collections::HashMap;

    use super::*;

    /// In-memory stand-in for every cgroup-backed capability, keyed by
    /// container id. Tracks the last value each setter was called with so
    /// tests can assert on the commit protocol.
    #[derive(Debug, Default)]
    pub struct FakeCgroups {
        pub guarantee: HashMap<u64, u64>,
        pub limit: HashMap<u64, u64>,
        pub anon_limit: HashMap<u64, u64>,
        pub dirty_limit: HashMap<u64, u64>,
        pub recharge_on_pgfault: HashMap<u64, bool>,
        pub cpu_policy: HashMap<u64, (CpuPolicyKind, f64, f64)>,
        pub io_policy: HashMap<u64, bool>,
        pub io_limit: HashMap<u64, u64>,
        pub iops_limit: HashMap<u64, u64>,
        pub usage: HashMap<u64, u64>,
        pub anon_usage: HashMap<u64, u64>,
        pub cpu_usage: HashMap<u64, u64>,
        pub cpu_usage_system: HashMap<u64, u64>,
        /// When set, the next call for this container fails with this
        /// message instead of succeeding — used to exercise rollback
        /// mutating call, used to exercise rollback.
        pub fail_next: HashMap<u64, String>,
        pub memory_supported: bool,
        pub cpu_supported: bool,
        pub blkio_supported: bool,
    }

    impl FakeCgroups {
        pub fn new() -> Self {
            FakeCgroups {
                memory_supported: true,
                cpu_supported: true,
                blkio_supported: true,
                ..Default::default()
            }
        }

        fn maybe_fail(&mut self, container_id: u64) -> CapResult<()> {
            if let Some(msg) = self.fail_next.remove(&container_id) {
                return Err(crate::error::CoreError::invalid_value(msg));
            }
            Ok(())
        }
    }

    impl MemorySubsystem for FakeCgroups {
        fn set_guarantee(&mut self, id: u64, bytes: u64) -> CapResult<()> {
            self.maybe_fail(id)?;
            self.guarantee.insert(id, bytes);
            Ok(())
        }
        fn set_limit(&mut self, id: u64, bytes: u64) -> CapResult<()> {
            self.maybe_fail(id)?;
            self.limit.insert(id, bytes);
            Ok(())
        }
        fn set_anon_limit(&mut self, id: u64, bytes: u64) -> CapResult<()> {
            self.maybe_fail(id)?;
            self.anon_limit.insert(id, bytes);
            Ok(())
        }
        fn set_dirty_limit(&mut self, id: u64, bytes: u64) -> CapResult<()> {
            self.maybe_fail(id)?;
            self.dirty_limit.insert(id, bytes);
            Ok(())
        }
        fn set_recharge_on_pgfault(&mut self, id: u64, enabled: bool) -> CapResult<()> {
            self.maybe_fail(id)?;
            self.recharge_on_pgfault.insert(id, enabled);
            Ok(())
        }
        fn usage(&self, id: u64) -> CapResult<u64> {
            Ok(self.usage.get(&id).copied().unwrap_or(0))
        }
        fn anon_usage(&self, id: u64) -> CapResult<u64> {
            Ok(self.anon_usage.get(&id).copied().unwrap_or(0))
        }
        fn statistics(&self, _id: u64) -> CapResult<HashMap<String, u64>> {
            Ok(HashMap::new())
        }
        fn is_supported(&self) -> bool {
            self.memory_supported
        }
    }

    impl CpuSubsystem for FakeCgroups {
        fn set_cpu_policy(
            &mut self,
            id: u64,
            policy: CpuPolicyKind,
            guarantee_cores: f64,
            limit_cores: f64,
        ) -> CapResult<()> {
            self.maybe_fail(id)?;
            self.cpu_policy.insert(id, (policy, guarantee_cores, limit_cores));
            Ok(())
        }
        fn is_supported(&self) -> bool {
            self.cpu_supported
        }
    }

    impl CpuacctSubsystem for FakeCgroups {
        fn cpu_usage(&self, id: u64) -> CapResult<u64> {
            Ok(self.cpu_usage.get(&id).copied().unwrap_or(0))
        }
        fn cpu_usage_system(&self, id: u64) -> CapResult<u64> {
            Ok(self.cpu_usage_system.get(&id).copied().unwrap_or(0))
        }
    }

    impl BlkioSubsystem for FakeCgroups {
        fn set_io_policy(&mut self, id: u64, batch: bool) -> CapResult<()> {
            self.maybe_fail(id)?;
            self.io_policy.insert(id, batch);
            Ok(())
        }
        fn set_io_limit(&mut self, id: u64, bytes_per_sec: u64) -> CapResult<()> {
            self.maybe_fail(id)?;
            self.io_limit.insert(id, bytes_per_sec);
            Ok(())
        }
        fn set_iops_limit(&mut self, id: u64, ops_per_sec: u64) -> CapResult<()> {
            self.maybe_fail(id)?;
            self.iops_limit.insert(id, ops_per_sec);
            Ok(())
        }
        fn statistics(&self, _id: u64) -> CapResult<HashMap<String, u64>> {
            Ok(HashMap::new())
        }
        fn is_supported(&self) -> bool {
            self.blkio_supported
        }
    }

    /// In-memory stand-in for the netlink-backed traffic-class/interface
    /// layer.
    #[derive(Debug, Default)]
    pub struct FakeNetwork {
        pub classes: HashMap<(String, u32), TrafficClassUpdate>,
        pub counters: HashMap<(String, u32, &'static str), u64>,
        pub fail_next: Option<String>,
        pub supported: bool,
    }

    impl FakeNetwork {
        pub fn new() -> Self {
            FakeNetwork {
                supported: true,
                ..Default::default()
            }
        }

        fn kind_key(kind: TrafficStatKind) -> &'static str {
            match kind {
                TrafficStatKind::Bytes => "bytes",
                TrafficStatKind::Packets => "packets",
                TrafficStatKind::Drops => "drops",
                TrafficStatKind::Overlimits => "overlimits",
                TrafficStatKind::RxBytes => "rx_bytes",
                TrafficStatKind::RxPackets => "rx_packets",
                TrafficStatKind::RxDrops => "rx_drops",
            }
        }
    }

    impl NetworkCapability for FakeNetwork {
        fn update_traffic_classes(&mut self, iface: &str, update: &TrafficClassUpdate) -> CapResult<()> {
            if let Some(msg) = self.fail_next.take() {
                return Err(crate::error::CoreError::invalid_value(msg));
            }
            self.classes.insert((iface.to_string(), update.minor), update.clone());
            Ok(())
        }

        fn remove_traffic_classes(&mut self, iface: &str, minor: u32) -> CapResult<()> {
            self.classes.remove(&(iface.to_string(), minor));
            Ok(())
        }

        fn traffic_counters(&self, iface: &str, minor: u32, kind: TrafficStatKind) -> CapResult<u64> {
            Ok(self
                .counters
                .get(&(iface.to_string(), minor, Self::kind_key(kind)))
                .copied()
                .unwrap_or(0))
        }

        fn interface_counters(&self, iface: &str, kind: TrafficStatKind) -> CapResult<u64> {
            Ok(self
                .counters
                .get(&(iface.to_string(), 0, Self::kind_key(kind)))
                .copied()
                .unwrap_or(0))
        }

        fn current_class(&self, iface: &str, minor: u32) -> Option<TrafficClassUpdate> {
            self.classes.get(&(iface.to_string(), minor)).cloned()
        }

        fn is_supported(&self) -> bool {
            self.supported
        }
    }

    /// In-memory snapshot store, used both as sink and source in tests.
    #[derive(Debug, Default)]
    pub struct FakeSnapshotStore {
        pub lines: HashMap<(String, String), String>,
    }

    impl SnapshotSink for FakeSnapshotStore {
        fn put(&mut self, container: &str, property: &str, value: &str) -> CoreResult<()> {
            self.lines
                .insert((container.to_string(), property.to_string()), value.to_string());
            Ok(())
        }
    }

    impl SnapshotSource for FakeSnapshotStore {
        fn get(&self, container: &str, property: &str) -> CoreResult<Option<String>> {
            Ok(self
                .lines
                .get(&(container.to_string(), property.to_string()))
                .cloned())
        }

        fn properties_of(&self, container: &str) -> CoreResult<Vec<String>> {
            Ok(self
                .lines
                .keys()
                .filter(|(c, _)| c == container)
                .map(|(_, p)| p.clone())
                .collect())
        }
    }
}
