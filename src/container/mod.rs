//! Container Entity & State Machine.
//!
//! [`Container`] is the central in-memory record. The Holder (§4.4) owns
//! every instance in a flat table keyed by absolute name; `parent` and
//! `children` here are name references resolved through the Holder at
//! walk time rather than raw pointers, which sidesteps the cycle/
//! resurrection hazard a pointer-linked tree would have.

pub mod mask;
pub mod state;

use std::collections::BTreeMap;

use crate::capability::CpuPolicyKind;
use crate::cred::{CapabilityMask, OwnerCred, TaskCred};
use crate::property::value::{NetSpecLine, UlimitBound};

pub use mask::PropMask;
pub use state::State;

/// `app`: a single user command. `os`: init-like, with a richer default
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, parse_display::Display, parse_display::FromStr)]
#[display(style = "lowercase")]
pub enum VirtMode {
    App,
    Os,
}

impl Default for VirtMode {
    fn default() -> Self {
        VirtMode::App
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, parse_display::Display, parse_display::FromStr)]
#[display(style = "lowercase")]
pub enum IoPolicy {
    Normal,
    Batch,
}

impl Default for IoPolicy {
    fn default() -> Self {
        IoPolicy::Normal
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub dest: String,
    pub read_only: bool,
}

pub type Ulimits = BTreeMap<String, (UlimitBound, UlimitBound)>;
pub type NetMap<V> = BTreeMap<String, V>;

/// Looks a per-interface map property up, falling back to the `"default"`
/// key. Limits/ceilings that
/// are entirely absent are treated as unlimited by the caller, not here.
pub fn resolve_net_map<'a, V>(map: &'a NetMap<V>, iface: &str) -> Option<&'a V> {
    map.get(iface).or_else(|| map.get("default"))
}

/// The central entity.
#[derive(Debug, Clone)]
pub struct Container {
    // identity
    pub name: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub id: u64,
    pub loop_dev: Option<u32>,
    pub start_time_ms: Option<i64>,
    pub death_time_ms: Option<i64>,
    pub root_pid: Option<i32>,

    // credentials
    pub owner_cred: OwnerCred,
    pub task_cred: TaskCred,
    pub caps: CapabilityMask,

    // lifecycle
    pub state: State,
    pub exit_status: Option<i32>,
    pub oom_killed: bool,
    pub start_errno: Option<i32>,
    pub respawn_count: i64,
    pub to_respawn: bool,
    pub max_respawns: i64,
    pub aging_time_secs: u64,

    // runtime shape
    pub command: String,
    pub cwd: String,
    pub root: String,
    pub root_readonly: bool,
    pub bind_dns: bool,
    pub isolate: bool,
    pub virt_mode: VirtMode,
    pub hostname: String,
    pub stdin_path: String,
    pub stdout_path: String,
    pub stderr_path: String,
    pub stdout_limit: u64,
    pub stdout_offset: u64,
    pub stderr_offset: u64,
    pub env: Vec<(String, String)>,
    pub binds: Vec<BindMount>,
    pub devices: Vec<String>,
    pub ulimits: Ulimits,

    // network
    pub net_prop: Vec<NetSpecLine>,
    pub ip_list: Vec<String>,
    pub default_gw: String,
    pub resolv_conf: String,
    pub net_guarantee: NetMap<u64>,
    pub net_limit: NetMap<u64>,
    pub net_priority: NetMap<u32>,
    pub net_tos: String,
    pub porto_enabled: bool,

    // resources
    pub mem_guarantee: u64,
    pub current_mem_guarantee: u64,
    pub mem_limit: u64,
    pub anon_mem_limit: u64,
    pub dirty_mem_limit: u64,
    pub recharge_on_pgfault: bool,
    pub cpu_policy: CpuPolicyKind,
    pub cpu_limit: f64,
    pub cpu_guarantee: f64,
    pub io_policy: IoPolicy,
    pub io_limit: u64,
    pub iops_limit: u64,

    // housekeeping
    pub is_weak: bool,
    pub private: String,
    pub ns_name: String,

    pub prop_mask: PropMask,
}

impl Container {
    /// A freshly-created container, entered into Stopped under `parent`
    ///.
    pub fn new(name: impl Into<String>, parent: Option<String>, id: u64, owner: OwnerCred) -> Self {
        let task_cred = TaskCred { uid: owner.uid, gid: owner.gid };
        Container {
            name: name.into(),
            parent,
            children: Vec::new(),
            id,
            loop_dev: None,
            start_time_ms: None,
            death_time_ms: None,
            root_pid: None,
            owner_cred: owner,
            task_cred,
            caps: CapabilityMask::empty(),
            state: State::Stopped,
            exit_status: None,
            oom_killed: false,
            start_errno: None,
            respawn_count: 0,
            to_respawn: false,
            max_respawns: -1,
            aging_time_secs: 10,
            command: String::new(),
            cwd: "/".to_string(),
            root: "/".to_string(),
            root_readonly: false,
            bind_dns: true,
            isolate: false,
            virt_mode: VirtMode::App,
            hostname: String::new(),
            stdin_path: "/dev/null".to_string(),
            stdout_path: "stdout".to_string(),
            stderr_path: "stderr".to_string(),
            stdout_limit: 8 * 1024 * 1024,
            stdout_offset: 0,
            stderr_offset: 0,
            env: Vec::new(),
            binds: Vec::new(),
            devices: Vec::new(),
            ulimits: Ulimits::new(),
            net_prop: vec![NetSpecLine::Inherited],
            ip_list: Vec::new(),
            default_gw: String::new(),
            resolv_conf: String::new(),
            net_guarantee: NetMap::new(),
            net_limit: NetMap::new(),
            net_priority: NetMap::new(),
            net_tos: String::new(),
            porto_enabled: true,
            mem_guarantee: 0,
            current_mem_guarantee: 0,
            mem_limit: 0,
            anon_mem_limit: 0,
            dirty_mem_limit: 0,
            recharge_on_pgfault: false,
            cpu_policy: CpuPolicyKind::Normal,
            cpu_limit: 0.0,
            cpu_guarantee: 0.0,
            io_policy: IoPolicy::Normal,
            io_limit: 0,
            iops_limit: 0,
            is_weak: false,
            private: String::new(),
            ns_name: String::new(),
            prop_mask: PropMask::empty(),
        }
    }

    /// Whether `prop_mask` records the given property as explicitly set
    /// (as opposed to inherited via propagation or a virt-mode back-fill).
    pub fn is_explicit(&self, bit: PropMask) -> bool {
        self.prop_mask.contains(bit)
    }

    /// Uptime in milliseconds if live, or time-since-death if Dead.
    /// `now_ms` is supplied by the caller so this stays a pure function.
    pub fn time_ms(&self, now_ms: i64) -> Option<i64> {
        match self.state {
            State::Dead => self.death_time_ms.zip(self.start_time_ms).map(|(d, s)| d - s),
            _ => self.start_time_ms.map(|s| now_ms - s),
        }
    }

    /// `command`/`cwd`/etc. back-fill applied when `virt_mode` is set to
    /// `Os` and the corresponding bits are clear. Returns the
    /// (field, default) pairs that still need applying, as explicit data
    /// rather than scattering the logic across handlers. `capabilities`
    /// isn't in this table because its default
    /// (every capability up to the running kernel's `last_capability`)
    /// isn't a fixed string; `property::handlers::runtime::apply_virt_mode`
    /// back-fills it separately.
    pub fn os_virt_mode_defaults() -> &'static [(&'static str, &'static str)] {
        &[
            ("cwd", "/"),
            ("command", "/sbin/init"),
            ("stdout_path", "/dev/null"),
            ("stderr_path", "/dev/null"),
            ("bind_dns", "false"),
            ("net", "none"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerCred {
        OwnerCred { uid: 1000, gid: 1000, groups: vec![1000] }
    }

    #[test]
    fn new_container_starts_stopped_with_empty_mask() {
        let c = Container::new("a", None, 1, owner());
        assert_eq!(c.state, State::Stopped);
        assert!(c.prop_mask.is_empty());
        assert!(!c.is_explicit(PropMask::COMMAND_SET));
    }

    #[test]
    fn time_ms_uses_death_minus_start_once_dead() {
        let mut c = Container::new("a", None, 1, owner());
        c.start_time_ms = Some(1_000);
        c.death_time_ms = Some(5_000);
        c.state = State::Dead;
        assert_eq!(c.time_ms(9_999), Some(4_000));
    }

    #[test]
    fn time_ms_uses_uptime_while_live() {
        let mut c = Container::new("a", None, 1, owner());
        c.start_time_ms = Some(1_000);
        c.state = State::Running;
        assert_eq!(c.time_ms(3_000), Some(2_000));
    }

    #[test]
    fn resolve_net_map_falls_back_to_default_key() {
        let mut map = NetMap::new();
        map.insert("default".to_string(), 500u64);
        assert_eq!(resolve_net_map(&map, "eth0"), Some(&500));
        map.insert("eth0".to_string(), 900u64);
        assert_eq!(resolve_net_map(&map, "eth0"), Some(&900));
    }
}
