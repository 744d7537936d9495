//! Resource-control properties: every property that reprograms a cgroup
//! subsystem goes through the commit protocol's `apply` hook (parse →
//! validate → save-previous → apply → rollback-on-failure → commit,
//! commit protocol's `apply` hook. Controllers are only touched once a container is
//! live; while Stopped the value is recorded and applied at start time
//! (start itself is out of this crate's scope per spec Non-goals, so the
//! apply hook here is the enforcement point for already-live containers).

use crate::capability::CpuPolicyKind;
use crate::container::{Container, IoPolicy, PropMask};
use crate::error::CoreError;
use crate::error::CoreResult;
use crate::holder::Holder;
use crate::property::value::{format_bool, format_cpu, format_size, parse_bool, parse_cpu, parse_size, ParseError};
use crate::property::{PropertyFlags, Registry};

use super::{arc, FieldHandler};

fn apply_memory_guarantee(holder: &mut Holder, name: &str, bytes: &u64) -> CoreResult<()> {
    let c = holder.container(name)?;
    if !c.state.is_live() {
        return Ok(());
    }
    let id = c.id;
    holder.memory.set_guarantee(id, *bytes)
}

fn apply_memory_limit(holder: &mut Holder, name: &str, bytes: &u64) -> CoreResult<()> {
    let c = holder.container(name)?;
    if !c.state.is_live() {
        return Ok(());
    }
    let id = c.id;
    holder.memory.set_limit(id, *bytes)
}

fn apply_anon_limit(holder: &mut Holder, name: &str, bytes: &u64) -> CoreResult<()> {
    let c = holder.container(name)?;
    if !c.state.is_live() {
        return Ok(());
    }
    let id = c.id;
    holder.memory.set_anon_limit(id, *bytes)
}

fn apply_dirty_limit(holder: &mut Holder, name: &str, bytes: &u64) -> CoreResult<()> {
    let c = holder.container(name)?;
    if !c.state.is_live() {
        return Ok(());
    }
    let id = c.id;
    holder.memory.set_dirty_limit(id, *bytes)
}

fn apply_recharge_on_pgfault(holder: &mut Holder, name: &str, enabled: &bool) -> CoreResult<()> {
    let c = holder.container(name)?;
    if !c.state.is_live() {
        return Ok(());
    }
    let id = c.id;
    holder.memory.set_recharge_on_pgfault(id, *enabled)
}

/// `cpu_policy`/`cpu_limit`/`cpu_guarantee` are three properties feeding
/// one cgroup call, so every one of them re-pushes the current triple
/// rather than each owning a fragment of the `CpuSubsystem` API.
fn apply_cpu(holder: &mut Holder, name: &str) -> CoreResult<()> {
    let c = holder.container(name)?;
    if !c.state.is_live() {
        return Ok(());
    }
    let (id, policy, guarantee, limit) = (c.id, c.cpu_policy, c.cpu_guarantee, c.cpu_limit);
    holder.cpu.set_cpu_policy(id, policy, guarantee, limit)
}

fn apply_cpu_policy(holder: &mut Holder, name: &str, _v: &CpuPolicyKind) -> CoreResult<()> {
    apply_cpu(holder, name)
}

fn apply_cpu_limit(holder: &mut Holder, name: &str, _v: &f64) -> CoreResult<()> {
    apply_cpu(holder, name)
}

fn apply_cpu_guarantee(holder: &mut Holder, name: &str, _v: &f64) -> CoreResult<()> {
    apply_cpu(holder, name)
}

fn apply_io_policy(holder: &mut Holder, name: &str, policy: &IoPolicy) -> CoreResult<()> {
    let c = holder.container(name)?;
    if !c.state.is_live() {
        return Ok(());
    }
    let id = c.id;
    holder.blkio.set_io_policy(id, matches!(policy, IoPolicy::Batch))
}

fn apply_io_limit(holder: &mut Holder, name: &str, bytes_per_sec: &u64) -> CoreResult<()> {
    let c = holder.container(name)?;
    if !c.state.is_live() {
        return Ok(());
    }
    let id = c.id;
    holder.blkio.set_io_limit(id, *bytes_per_sec)
}

fn apply_iops_limit(holder: &mut Holder, name: &str, ops_per_sec: &u64) -> CoreResult<()> {
    let c = holder.container(name)?;
    if !c.state.is_live() {
        return Ok(());
    }
    let id = c.id;
    holder.blkio.set_iops_limit(id, *ops_per_sec)
}

/// The memory-guarantee overcommit invariant:
/// the sum of every container's `memory_guarantee` may not exceed
/// `total_memory_bytes - memory_guarantee_reserve`.
fn validate_memory_guarantee(holder: &Holder, container: &Container, bytes: &u64) -> CoreResult<()> {
    let others: u64 = holder
        .list()
        .filter(|c| c.name != container.name)
        .map(|c| c.mem_guarantee)
        .sum();
    let bound = holder.config.total_memory_bytes.saturating_sub(holder.config.memory_guarantee_reserve);
    if others.saturating_add(*bytes) > bound {
        return Err(CoreError::ResourceNotAvailable(format!(
            "memory_guarantee {bytes} would push the host total to {} past the bound of {bound}",
            others + bytes
        )));
    }
    Ok(())
}

fn parse_cpu_cores(text: &str) -> Result<f64, ParseError> {
    Ok(parse_cpu(text)?.0)
}

pub fn register(registry: &mut Registry) {
    registry.register(arc(FieldHandler {
        name: "memory_guarantee",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::MEMORY_GUARANTEE_SET,
        parse: parse_size,
        format: |v: &u64| format_size(*v),
        get_field: |c: &Container| c.mem_guarantee,
        set_field: |c: &mut Container, v: u64| c.mem_guarantee = v,
        validate: Some(validate_memory_guarantee),
        apply: Some(apply_memory_guarantee),
        supported: Some(|h| h.memory.is_supported()),
    }));

    registry.register(arc(FieldHandler {
        name: "memory_limit",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::MEMORY_LIMIT_SET,
        parse: parse_size,
        format: |v: &u64| format_size(*v),
        get_field: |c: &Container| c.mem_limit,
        set_field: |c: &mut Container, v: u64| c.mem_limit = v,
        validate: None,
        apply: Some(apply_memory_limit),
        supported: Some(|h| h.memory.is_supported()),
    }));

    registry.register(arc(FieldHandler {
        name: "anon_limit",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::ANON_LIMIT_SET,
        parse: parse_size,
        format: |v: &u64| format_size(*v),
        get_field: |c: &Container| c.anon_mem_limit,
        set_field: |c: &mut Container, v: u64| c.anon_mem_limit = v,
        validate: None,
        apply: Some(apply_anon_limit),
        supported: Some(|h| h.memory.is_supported()),
    }));

    registry.register(arc(FieldHandler {
        name: "dirty_limit",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::DIRTY_LIMIT_SET,
        parse: parse_size,
        format: |v: &u64| format_size(*v),
        get_field: |c: &Container| c.dirty_mem_limit,
        set_field: |c: &mut Container, v: u64| c.dirty_mem_limit = v,
        validate: None,
        apply: Some(apply_dirty_limit),
        supported: Some(|h| h.memory.is_supported()),
    }));

    registry.register(arc(FieldHandler {
        name: "recharge_on_pgfault",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::RECHARGE_ON_PGFAULT_SET,
        parse: parse_bool,
        format: |v: &bool| format_bool(*v),
        get_field: |c: &Container| c.recharge_on_pgfault,
        set_field: |c: &mut Container, v: bool| c.recharge_on_pgfault = v,
        validate: None,
        apply: Some(apply_recharge_on_pgfault),
        supported: Some(|h| h.memory.is_supported()),
    }));

    registry.register(arc(FieldHandler {
        name: "cpu_policy",
        flags: PropertyFlags { dynamic: true, propagates: true, ..Default::default() },
        mask_bit: PropMask::CPU_POLICY_SET,
        parse: |v| v.parse::<CpuPolicyKind>().map_err(|_| ParseError::Other(format!("invalid cpu_policy: {v}"))),
        format: |v: &CpuPolicyKind| v.to_string(),
        get_field: |c: &Container| c.cpu_policy,
        set_field: |c: &mut Container, v: CpuPolicyKind| c.cpu_policy = v,
        validate: None,
        apply: Some(apply_cpu_policy),
        supported: Some(|h| h.cpu.is_supported()),
    }));

    registry.register(arc(FieldHandler {
        name: "cpu_limit",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::CPU_LIMIT_SET,
        parse: parse_cpu_cores,
        format: |v: &f64| format_cpu(*v),
        get_field: |c: &Container| c.cpu_limit,
        set_field: |c: &mut Container, v: f64| c.cpu_limit = v,
        validate: None,
        apply: Some(apply_cpu_limit),
        supported: Some(|h| h.cpu.is_supported()),
    }));

    registry.register(arc(FieldHandler {
        name: "cpu_guarantee",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::CPU_GUARANTEE_SET,
        parse: parse_cpu_cores,
        format: |v: &f64| format_cpu(*v),
        get_field: |c: &Container| c.cpu_guarantee,
        set_field: |c: &mut Container, v: f64| c.cpu_guarantee = v,
        validate: None,
        apply: Some(apply_cpu_guarantee),
        supported: Some(|h| h.cpu.is_supported()),
    }));

    registry.register(arc(FieldHandler {
        name: "io_policy",
        flags: PropertyFlags { dynamic: true, propagates: true, ..Default::default() },
        mask_bit: PropMask::IO_POLICY_SET,
        parse: |v| v.parse::<IoPolicy>().map_err(|_| ParseError::Other(format!("invalid io_policy: {v}"))),
        format: |v: &IoPolicy| v.to_string(),
        get_field: |c: &Container| c.io_policy,
        set_field: |c: &mut Container, v: IoPolicy| c.io_policy = v,
        validate: None,
        apply: Some(apply_io_policy),
        supported: Some(|h| h.blkio.is_supported()),
    }));

    registry.register(arc(FieldHandler {
        name: "io_limit",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::IO_LIMIT_SET,
        parse: parse_size,
        format: |v: &u64| format_size(*v),
        get_field: |c: &Container| c.io_limit,
        set_field: |c: &mut Container, v: u64| c.io_limit = v,
        validate: None,
        apply: Some(apply_io_limit),
        supported: Some(|h| h.blkio.is_supported()),
    }));

    registry.register(arc(FieldHandler {
        name: "io_ops_limit",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::IO_OPS_LIMIT_SET,
        parse: parse_size,
        format: |v: &u64| format_size(*v),
        get_field: |c: &Container| c.iops_limit,
        set_field: |c: &mut Container, v: u64| c.iops_limit = v,
        validate: None,
        apply: Some(apply_iops_limit),
        supported: Some(|h| h.blkio.is_supported()),
    }));
}

#[cfg(test)]
mod tests {
    use crate::cred::OwnerCred;
    use crate::holder::test_support::test_holder;

    #[test]
    fn memory_guarantee_rejects_host_overcommit() {
        let mut holder = test_holder();
        holder.config.total_memory_bytes = 1_000;
        holder.config.memory_guarantee_reserve = 0;
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        assert!(holder.dispatcher().set(&client, "a", "memory_guarantee", "2000").is_err());
    }

    #[test]
    fn memory_limit_apply_rolls_back_field_on_kernel_failure() {
        use crate::capability::fakes::{FakeCgroups, FakeNetwork};
        use crate::cred::fakes::FakeIdentityDirectory;
        use crate::holder::Holder;

        let mut holder = Holder::new(
            crate::config::CoreConfig::default(),
            Box::new(FakeIdentityDirectory::default()),
            Box::new(FakeCgroups::new()),
            Box::new(FakeCgroups::new()),
            Box::new(FakeCgroups::new()),
            Box::new(FakeCgroups::new()),
            Box::new(FakeNetwork::new()),
        );
        holder.create_container("a", None).unwrap();
        holder.container_mut("a").unwrap().state = crate::container::State::Running;
        holder.container_mut("a").unwrap().mem_limit = 1024;

        let id = holder.container("a").unwrap().id;
        let mut memory = FakeCgroups::new();
        memory.fail_next.insert(id, "cgroup write failed".to_string());
        holder.memory = Box::new(memory);

        let client = OwnerCred::root();
        let result = holder.dispatcher().set(&client, "a", "memory_limit", "4096");
        assert!(result.is_err());
        assert_eq!(holder.container("a").unwrap().mem_limit, 1024);
    }

    #[test]
    fn cpu_policy_set_pushes_current_triple_once_live() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        holder.container_mut("a").unwrap().state = crate::container::State::Running;
        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "cpu_limit", "2c").unwrap();
        holder.dispatcher().set(&client, "a", "cpu_policy", "idle").unwrap();
        assert_eq!(holder.container("a").unwrap().cpu_policy, crate::capability::CpuPolicyKind::Idle);
    }
}
