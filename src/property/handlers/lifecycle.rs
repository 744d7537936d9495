//! Lifecycle, respawn, and bookkeeping properties.

use crate::container::{Container, PropMask, State};
use crate::error::{CoreError, CoreResult};
use crate::holder::Holder;
use crate::property::value::{format_bool, parse_bool, ParseError};
use crate::property::{PropertyFlags, PropertyHandler, Registry};

use super::{arc, CounterHandler, FieldHandler};

fn parse_i64(text: &str) -> Result<i64, ParseError> {
    text.trim().parse().map_err(|_| ParseError::Int(text.to_string()))
}

fn parse_u64_plain(text: &str) -> Result<u64, ParseError> {
    text.trim().parse().map_err(|_| ParseError::Int(text.to_string()))
}

/// *running-readable*: rejects Stopped/Unknown, for bookkeeping fields
/// that only mean anything once the container has actually run.
fn require_has_run(c: &Container) -> CoreResult<()> {
    if matches!(c.state, State::Stopped | State::Unknown) {
        return Err(CoreError::invalid_state(format!(
            "{} is not available before the container has run (current state: {})",
            c.name, c.state
        )));
    }
    Ok(())
}

/// `PortoEnabled` propagates unconditionally and ignores `Isolate`, and a
/// subtree can only be switched *off* from a parent that is itself off
/// — `property::propagate_to_children`
/// special-cases this property by name.
struct EnablePortoHandler;

impl PropertyHandler for EnablePortoHandler {
    fn name(&self) -> &'static str {
        "enable_porto"
    }

    fn flags(&self) -> PropertyFlags {
        PropertyFlags { propagates: true, ..Default::default() }
    }

    fn set_mask(&self) -> PropMask {
        PropMask::ENABLE_PORTO_SET
    }

    fn get(&self, holder: &Holder, container: &str) -> CoreResult<String> {
        Ok(format_bool(holder.container(container)?.porto_enabled))
    }

    fn set(
        &self,
        holder: &mut Holder,
        _client: &crate::cred::OwnerCred,
        container: &str,
        value: &str,
    ) -> CoreResult<()> {
        let enabled = parse_bool(value)?;
        let c = holder.container_mut(container)?;
        c.porto_enabled = enabled;
        c.prop_mask.insert(PropMask::ENABLE_PORTO_SET);
        Ok(())
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(arc(EnablePortoHandler));

    registry.register(arc(FieldHandler {
        name: "respawn",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::RESPAWN_SET,
        parse: parse_bool,
        format: |v: &bool| format_bool(*v),
        get_field: |c: &Container| c.to_respawn,
        set_field: |c: &mut Container, v: bool| c.to_respawn = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "max_respawns",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::MAX_RESPAWNS_SET,
        parse: parse_i64,
        format: |v: &i64| v.to_string(),
        get_field: |c: &Container| c.max_respawns,
        set_field: |c: &mut Container, v: i64| c.max_respawns = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "aging_time",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::AGING_TIME_SET,
        parse: parse_u64_plain,
        format: |v: &u64| v.to_string(),
        get_field: |c: &Container| c.aging_time_secs,
        set_field: |c: &mut Container, v: u64| c.aging_time_secs = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "weak",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::WEAK_SET,
        parse: parse_bool,
        format: |v: &bool| format_bool(*v),
        get_field: |c: &Container| c.is_weak,
        set_field: |c: &mut Container, v: bool| c.is_weak = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(CounterHandler {
        name: "state",
        hidden: false,
        get: |_h, c| Ok(c.state.to_string()),
    }));

    registry.register(arc(CounterHandler {
        name: "oom_killed",
        hidden: false,
        // *dead-only*: meaningful only once the container has actually
        // died, not while it's still Running/Meta/Paused/Stopped.
        get: |_h, c| {
            if c.state != State::Dead {
                return Err(CoreError::invalid_state(format!(
                    "oom_killed is only readable once the container is dead (current state: {})",
                    c.state
                )));
            }
            Ok(format_bool(c.oom_killed))
        },
    }));

    registry.register(arc(CounterHandler {
        name: "parent",
        hidden: false,
        get: |_h, c| Ok(c.parent.clone().unwrap_or_default()),
    }));

    registry.register(arc(CounterHandler {
        name: "respawn_count",
        hidden: false,
        get: |_h, c| Ok(c.respawn_count.to_string()),
    }));

    registry.register(arc(CounterHandler {
        name: "root_pid",
        hidden: false,
        get: |_h, c| {
            require_has_run(c)?;
            Ok(c.root_pid.map(|p| p.to_string()).unwrap_or_default())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "exit_status",
        hidden: false,
        get: |_h, c| {
            require_has_run(c)?;
            Ok(c.exit_status.map(|s| s.to_string()).unwrap_or_default())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "start_errno",
        hidden: false,
        get: |_h, c| {
            require_has_run(c)?;
            Ok(c.start_errno.map(|e| e.to_string()).unwrap_or_default())
        },
    }));

    registry.register(arc(CounterHandler {
        name: "absolute_name",
        hidden: false,
        get: |_h, c| Ok(c.name.clone()),
    }));

    registry.register(arc(CounterHandler {
        name: "absolute_namespace",
        hidden: false,
        get: |_h, c| {
            let mut segments = Vec::new();
            if !c.ns_name.is_empty() {
                segments.push(c.ns_name.clone());
            }
            Ok(segments.join("/"))
        },
    }));

    registry.register(arc(CounterHandler {
        name: "time",
        hidden: false,
        get: |_h, c| Ok(c.time_ms(Holder::now_ms()).map(|ms| (ms / 1000).to_string()).unwrap_or_default()),
    }));

    registry.register(arc(CounterHandler {
        name: "_root_pid",
        hidden: true,
        get: |_h, c| Ok(c.root_pid.map(|p| p.to_string()).unwrap_or_default()),
    }));

    registry.register(arc(CounterHandler {
        name: "_loop_dev",
        hidden: true,
        get: |_h, c| Ok(c.loop_dev.map(|d| d.to_string()).unwrap_or_default()),
    }));

    registry.register(arc(CounterHandler {
        name: "_start_time",
        hidden: true,
        get: |_h, c| Ok(c.start_time_ms.map(|t| t.to_string()).unwrap_or_default()),
    }));

    registry.register(arc(CounterHandler {
        name: "_death_time",
        hidden: true,
        get: |_h, c| Ok(c.death_time_ms.map(|t| t.to_string()).unwrap_or_default()),
    }));
}

#[cfg(test)]
mod tests {
    use crate::cred::OwnerCred;
    use crate::holder::test_support::test_holder;

    #[test]
    fn enable_porto_propagates_off_but_not_on_into_isolated_subtree() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        holder.create_container("a/b", Some("a".into())).unwrap();
        holder.container_mut("a/b").unwrap().isolate = true;
        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "enable_porto", "false").unwrap();
        assert!(!holder.container("a/b").unwrap().porto_enabled);
    }

    #[test]
    fn oom_killed_is_dead_only() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        holder.container_mut("a").unwrap().state = crate::container::State::Running;
        let client = OwnerCred::root();
        assert!(matches!(
            holder.dispatcher().get(&client, "a", "oom_killed"),
            Err(crate::error::CoreError::InvalidState(_))
        ));
        holder.container_mut("a").unwrap().state = crate::container::State::Dead;
        assert_eq!(holder.dispatcher().get(&client, "a", "oom_killed").unwrap(), "false");
    }

    #[test]
    fn state_and_parent_are_read_only() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        assert!(holder.dispatcher().set(&client, "a", "state", "running").is_err());
        assert_eq!(holder.dispatcher().get(&client, "a", "state").unwrap(), "stopped");
    }
}
