//! Read-only counters and statistics. Each of these reads
//! through a capability trait or the filesystem; none of them carry a
//! `PropMask` bit because none can be explicitly set.

use std::io::{Read, Seek, SeekFrom};

use crate::capability::TrafficStatKind;
use crate::container::{Container, PropMask, State};
use crate::cred::OwnerCred;
use crate::error::{CoreError, CoreResult};
use crate::holder::Holder;
use crate::property::{PropertyFlags, PropertyHandler, Registry};

use super::{arc, CounterHandler};

/// *running-readable*: counters that only exist once the container has
/// run at least once. Rejects Stopped/Unknown, accepts Running/Meta/
/// Paused/Dead.
fn require_has_run(c: &Container) -> CoreResult<()> {
    if matches!(c.state, State::Stopped | State::Unknown) {
        return Err(CoreError::invalid_state(format!(
            "{} is not available before the container has run (current state: {})",
            c.name, c.state
        )));
    }
    Ok(())
}

fn read_output_file(path: &str, offset: u64) -> CoreResult<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| CoreError::InvalidData(format!("cannot open {path}: {e}")))?;
    let metadata = file
        .metadata()
        .map_err(|e| CoreError::InvalidData(format!("cannot stat {path}: {e}")))?;
    if !metadata.is_file() {
        return Err(CoreError::InvalidData(format!("{path} is not a regular file")));
    }
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| CoreError::InvalidData(format!("cannot seek {path}: {e}")))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)
        .map_err(|e| CoreError::InvalidData(format!("cannot read {path}: {e}")))?;
    Ok(buf)
}

/// `stdout`/`stderr`: a plain `Get` reads from the current rotation
/// watermark (`stdout_offset`/`stderr_offset`); `GetIndexed` lets a
/// client request an arbitrary absolute stream offset, rejecting one
/// that has already rotated away.
struct OutputHandler {
    name: &'static str,
    path: fn(&Container) -> &str,
    watermark: fn(&Container) -> u64,
}

impl PropertyHandler for OutputHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn flags(&self) -> PropertyFlags {
        PropertyFlags {
            read_only: true,
            hidden: false,
            serialized: false,
            dynamic: true,
            propagates: false,
            indexed: true,
        }
    }

    fn set_mask(&self) -> PropMask {
        PropMask::empty()
    }

    fn get(&self, holder: &Holder, container: &str) -> CoreResult<String> {
        let c = holder.container(container)?;
        read_output_file((self.path)(c), (self.watermark)(c))
    }

    fn get_indexed(&self, holder: &Holder, container: &str, index: &str) -> CoreResult<String> {
        let c = holder.container(container)?;
        let requested: u64 = index
            .trim()
            .parse()
            .map_err(|_| CoreError::invalid_value(format!("not a byte offset: {index}")))?;
        let watermark = (self.watermark)(c);
        if requested < watermark {
            return Err(CoreError::InvalidData(format!(
                "offset {requested} is below the current rotation watermark {watermark}"
            )));
        }
        read_output_file((self.path)(c), requested)
    }

    fn set(&self, _holder: &mut Holder, _client: &OwnerCred, _container: &str, _value: &str) -> CoreResult<()> {
        Err(CoreError::invalid_value(format!("{} is read-only", self.name)))
    }
}

fn memory_guarantee_total(holder: &Holder, container: &Container) -> u64 {
    let own = container.mem_guarantee;
    let children: u64 = container
        .children
        .iter()
        .filter_map(|name| holder.container(name).ok())
        .map(|child| memory_guarantee_total(holder, child))
        .sum();
    own + children
}

/// Every interface/minor counter collapses onto a single representative
/// interface per container, since this crate doesn't model which veth
/// actually gets created at start (that's process supervision, out of
/// scope per spec Non-goals); the traffic class itself is still keyed
/// correctly per interface by the Traffic Class Coordinator.
const REPRESENTATIVE_IFACE: &str = "default";

fn net_counter(kind: TrafficStatKind) -> fn(&Holder, &Container) -> CoreResult<String> {
    match kind {
        TrafficStatKind::Bytes => |h: &Holder, c: &Container| {
            Ok(h.network.traffic_counters(REPRESENTATIVE_IFACE, c.id as u32, TrafficStatKind::Bytes)?.to_string())
        },
        TrafficStatKind::Packets => |h: &Holder, c: &Container| {
            Ok(h.network.traffic_counters(REPRESENTATIVE_IFACE, c.id as u32, TrafficStatKind::Packets)?.to_string())
        },
        TrafficStatKind::Drops => |h: &Holder, c: &Container| {
            Ok(h.network.traffic_counters(REPRESENTATIVE_IFACE, c.id as u32, TrafficStatKind::Drops)?.to_string())
        },
        TrafficStatKind::Overlimits => |h: &Holder, c: &Container| {
            Ok(h.network.traffic_counters(REPRESENTATIVE_IFACE, c.id as u32, TrafficStatKind::Overlimits)?.to_string())
        },
        TrafficStatKind::RxBytes => |h: &Holder, c: &Container| {
            Ok(h.network.traffic_counters(REPRESENTATIVE_IFACE, c.id as u32, TrafficStatKind::RxBytes)?.to_string())
        },
        TrafficStatKind::RxPackets => |h: &Holder, c: &Container| {
            Ok(h.network.traffic_counters(REPRESENTATIVE_IFACE, c.id as u32, TrafficStatKind::RxPackets)?.to_string())
        },
        TrafficStatKind::RxDrops => |h: &Holder, c: &Container| {
            Ok(h.network.traffic_counters(REPRESENTATIVE_IFACE, c.id as u32, TrafficStatKind::RxDrops)?.to_string())
        },
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(arc(OutputHandler {
        name: "stdout",
        path: |c: &Container| c.stdout_path.as_str(),
        watermark: |c: &Container| c.stdout_offset,
    }));

    registry.register(arc(CounterHandler {
        name: "stdout_offset",
        hidden: false,
        get: |_h, c| Ok(c.stdout_offset.to_string()),
    }));

    registry.register(arc(OutputHandler {
        name: "stderr",
        path: |c: &Container| c.stderr_path.as_str(),
        watermark: |c: &Container| c.stderr_offset,
    }));

    registry.register(arc(CounterHandler {
        name: "stderr_offset",
        hidden: false,
        get: |_h, c| Ok(c.stderr_offset.to_string()),
    }));

    registry.register(arc(CounterHandler {
        name: "memory_usage",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            Ok(h.memory.usage(c.id)?.to_string())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "memory_guarantee_total",
        hidden: false,
        get: |h, c| Ok(memory_guarantee_total(h, c).to_string()),
    }));

    registry.register(arc(CounterHandler {
        name: "anon_usage",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            Ok(h.memory.anon_usage(c.id)?.to_string())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "minor_faults",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            Ok(h.memory.statistics(c.id)?.get("minor_faults").copied().unwrap_or(0).to_string())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "major_faults",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            Ok(h.memory.statistics(c.id)?.get("major_faults").copied().unwrap_or(0).to_string())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "max_rss",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            Ok(h.memory.statistics(c.id)?.get("max_rss").copied().unwrap_or(0).to_string())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "cpu_usage",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            Ok(h.cpuacct.cpu_usage(c.id)?.to_string())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "cpu_usage_system",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            Ok(h.cpuacct.cpu_usage_system(c.id)?.to_string())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "net_bytes",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            net_counter(TrafficStatKind::Bytes)(h, c)
        },
    }));
    registry.register(arc(CounterHandler {
        name: "net_packets",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            net_counter(TrafficStatKind::Packets)(h, c)
        },
    }));
    registry.register(arc(CounterHandler {
        name: "net_drops",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            net_counter(TrafficStatKind::Drops)(h, c)
        },
    }));
    registry.register(arc(CounterHandler {
        name: "net_overlimits",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            net_counter(TrafficStatKind::Overlimits)(h, c)
        },
    }));
    registry.register(arc(CounterHandler {
        name: "net_rx_bytes",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            net_counter(TrafficStatKind::RxBytes)(h, c)
        },
    }));
    registry.register(arc(CounterHandler {
        name: "net_rx_packets",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            net_counter(TrafficStatKind::RxPackets)(h, c)
        },
    }));
    registry.register(arc(CounterHandler {
        name: "net_rx_drops",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            net_counter(TrafficStatKind::RxDrops)(h, c)
        },
    }));

    registry.register(arc(CounterHandler {
        name: "io_read",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            Ok(h.blkio.statistics(c.id)?.get("read").copied().unwrap_or(0).to_string())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "io_write",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            Ok(h.blkio.statistics(c.id)?.get("write").copied().unwrap_or(0).to_string())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "io_ops",
        hidden: false,
        get: |h, c| {
            require_has_run(c)?;
            Ok(h.blkio.statistics(c.id)?.get("ops").copied().unwrap_or(0).to_string())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "porto_stat",
        hidden: true,
        get: |h, _c| Ok(format!("containers: {}", h.list().count())),
    }));
}

#[cfg(test)]
mod tests {
    use crate::cred::OwnerCred;
    use crate::holder::test_support::test_holder;

    #[test]
    fn stdout_errors_on_missing_file() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        holder.container_mut("a").unwrap().stdout_path = "/nonexistent/path/for/this/crate".to_string();
        let client = OwnerCred::root();
        let result = holder.dispatcher().get(&client, "a", "stdout");
        assert!(matches!(result, Err(crate::error::CoreError::InvalidData(_))));
    }

    #[test]
    fn stdout_indexed_read_rejects_offset_below_watermark() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file.reopen().unwrap(), b"0123456789").unwrap();
        {
            let c = holder.container_mut("a").unwrap();
            c.stdout_path = file.path().to_string_lossy().into_owned();
            c.stdout_offset = 5;
        }
        let client = OwnerCred::root();
        assert!(matches!(
            holder.dispatcher().get_indexed(&client, "a", "stdout", "3"),
            Err(crate::error::CoreError::InvalidData(_))
        ));
        assert_eq!(holder.dispatcher().get_indexed(&client, "a", "stdout", "5").unwrap(), "56789");
    }

    #[test]
    fn memory_guarantee_total_sums_subtree() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        holder.create_container("a/b", Some("a".into())).unwrap();
        holder.container_mut("a").unwrap().mem_guarantee = 100;
        holder.container_mut("a/b").unwrap().mem_guarantee = 50;
        let client = OwnerCred::root();
        assert_eq!(holder.dispatcher().get(&client, "a", "memory_guarantee_total").unwrap(), "150");
    }

    #[test]
    fn net_bytes_reads_through_network_capability() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        holder.container_mut("a").unwrap().state = crate::container::State::Running;
        let client = OwnerCred::root();
        assert_eq!(holder.dispatcher().get(&client, "a", "net_bytes").unwrap(), "0");
    }

    #[test]
    fn running_readable_counter_rejects_stopped_container() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        assert!(matches!(
            holder.dispatcher().get(&client, "a", "cpu_usage"),
            Err(crate::error::CoreError::InvalidState(_))
        ));
    }
}
