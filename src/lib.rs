//! A Linux container manager core: the in-process engine a porto-style
//! daemon would wrap with an RPC transport and a real cgroupfs/netlink
//! backend. This crate owns the container tree, the property registry
//! that is the RPC surface, the traffic class coordinator, and credential
//! resolution; it does not itself listen on a socket, fork a process, or
//! write to a real cgroupfs — those live behind the [`capability`] traits
//! so the engine is exercised here against in-memory fakes.

pub mod capability;
pub mod config;
pub mod container;
pub mod cred;
pub mod error;
pub mod holder;
pub mod property;
pub mod traffic;

pub use config::CoreConfig;
pub use container::{Container, State};
pub use error::{CoreError, CoreResult};
pub use holder::{Dispatcher, Holder};

/// Every property name the registry serves, in no particular order. Used
/// to assert the registry is complete and as the listing a real RPC
/// front end would enumerate.
pub const RPC_PROPERTY_NAMES: &[&str] = &[
    "user",
    "group",
    "capabilities",
    "porto_namespace",
    "private",
    "command",
    "cwd",
    "root",
    "root_readonly",
    "bind_dns",
    "isolate",
    "virt_mode",
    "hostname",
    "stdin_path",
    "stdout_path",
    "stderr_path",
    "stdout_limit",
    "env",
    "bind",
    "devices",
    "ulimit",
    "net",
    "ip",
    "default_gw",
    "resolv_conf",
    "net_tos",
    "net_guarantee",
    "net_limit",
    "net_priority",
    "memory_guarantee",
    "memory_limit",
    "anon_limit",
    "dirty_limit",
    "recharge_on_pgfault",
    "cpu_policy",
    "cpu_limit",
    "cpu_guarantee",
    "io_policy",
    "io_limit",
    "io_ops_limit",
    "enable_porto",
    "respawn",
    "max_respawns",
    "aging_time",
    "weak",
    "state",
    "oom_killed",
    "parent",
    "respawn_count",
    "root_pid",
    "exit_status",
    "start_errno",
    "absolute_name",
    "absolute_namespace",
    "time",
    "_root_pid",
    "_loop_dev",
    "_start_time",
    "_death_time",
    "stdout",
    "stdout_offset",
    "stderr",
    "stderr_offset",
    "memory_usage",
    "memory_guarantee_total",
    "anon_usage",
    "minor_faults",
    "major_faults",
    "max_rss",
    "cpu_usage",
    "cpu_usage_system",
    "net_bytes",
    "net_packets",
    "net_drops",
    "net_overlimits",
    "net_rx_bytes",
    "net_rx_packets",
    "net_rx_drops",
    "io_read",
    "io_write",
    "io_ops",
    "porto_stat",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cred::OwnerCred;
    use crate::holder::test_support::test_holder;

    #[test]
    fn end_to_end_create_configure_and_read_back() {
        let mut holder = test_holder();
        holder.create_container("web", None).unwrap();
        let client = OwnerCred::root();
        let mut d = holder.dispatcher();
        d.set(&client, "web", "command", "/usr/bin/nginx").unwrap();
        d.set(&client, "web", "memory_limit", "256MiB").unwrap();
        d.set(&client, "web", "cpu_limit", "1.5c").unwrap();

        assert_eq!(d.get(&client, "web", "command").unwrap(), "/usr/bin/nginx");
        assert_eq!(d.get(&client, "web", "memory_limit").unwrap(), (256 * 1024 * 1024).to_string());
        assert_eq!(d.get(&client, "web", "cpu_limit").unwrap(), "1.5c");
        assert_eq!(d.get(&client, "web", "state").unwrap(), "stopped");
    }

    #[test]
    fn child_inherits_cwd_until_isolated() {
        let mut holder = test_holder();
        holder.create_container("pod", None).unwrap();
        holder.create_container("pod/sidecar", Some("pod".into())).unwrap();
        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "pod", "cwd", "/srv/pod").unwrap();
        assert_eq!(holder.dispatcher().get(&client, "pod/sidecar", "cwd").unwrap(), "/srv/pod");
    }
}
