//! Runtime shape properties: the command, filesystem root, namespaces,
//! and the VirtMode back-fill.

use crate::container::{BindMount, Container, PropMask, Ulimits, VirtMode};
use crate::error::CoreResult;
use crate::holder::Holder;
use crate::property::value::{
    format_bool, format_list, format_size, format_ulimits, parse_bool, parse_list, parse_size, parse_ulimits,
    ParseError,
};
use crate::property::{PropertyFlags, Registry};

use super::{arc, FieldHandler};

fn parse_binds(text: &str) -> Result<Vec<BindMount>, ParseError> {
    text.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split_whitespace().collect();
            if parts.len() < 2 || parts.len() > 3 {
                return Err(ParseError::Other(format!("malformed bind entry: {entry}")));
            }
            let read_only = match parts.get(2) {
                None => false,
                Some(&"ro") => true,
                Some(&"rw") => false,
                Some(other) => return Err(ParseError::Other(format!("unknown bind flag: {other}"))),
            };
            Ok(BindMount { source: parts[0].to_string(), dest: parts[1].to_string(), read_only })
        })
        .collect()
}

fn format_binds(binds: &[BindMount]) -> String {
    binds
        .iter()
        .map(|b| format!("{} {} {}", b.source, b.dest, if b.read_only { "ro" } else { "rw" }))
        .collect::<Vec<_>>()
        .join("; ")
}

fn parse_env(text: &str) -> Result<Vec<(String, String)>, ParseError> {
    crate::property::value::parse_map(text)
}

fn format_env(env: &[(String, String)]) -> String {
    crate::property::value::format_map(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

/// VirtMode=Os back-fills a handful of other properties. Each
/// back-filled property is routed through its own handler's
/// `set_inherited` so the back-fill participates in the same
/// parse/mutate path as every other write, without re-running gates and
/// without marking the property's `PropMask` bit — these are defaults,
/// not something the client asked for.
pub fn apply_virt_mode(holder: &mut Holder, name: &str, mode: &VirtMode) -> CoreResult<()> {
    if *mode != VirtMode::Os {
        return Ok(());
    }
    for (prop, default) in Container::os_virt_mode_defaults() {
        let handler = match holder.registry.get(prop) {
            Some(h) => h,
            None => continue,
        };
        let already = holder.container(name)?.is_explicit(handler.set_mask());
        if !already {
            handler.set_inherited(holder, name, default)?;
        }
    }
    if !holder.container(name)?.is_explicit(PropMask::CAPABILITIES_SET) {
        if let Some(handler) = holder.registry.get("capabilities") {
            let mask = crate::cred::CapabilityMask::all_up_to(holder.config.last_capability);
            handler.set_inherited(holder, name, &mask.format())?;
        }
    }
    Ok(())
}

pub fn register(registry: &mut Registry) {
    registry.register(arc(FieldHandler {
        name: "command",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::COMMAND_SET,
        parse: |v| Ok(v.to_string()),
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.command.clone(),
        set_field: |c: &mut Container, v: String| c.command = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "cwd",
        flags: PropertyFlags { propagates: true, ..Default::default() },
        mask_bit: PropMask::CWD_SET,
        parse: |v| Ok(v.to_string()),
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.cwd.clone(),
        set_field: |c: &mut Container, v: String| c.cwd = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "root",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::ROOT_SET,
        parse: |v| Ok(v.to_string()),
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.root.clone(),
        set_field: |c: &mut Container, v: String| c.root = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "root_readonly",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::ROOT_READONLY_SET,
        parse: parse_bool,
        format: |v: &bool| format_bool(*v),
        get_field: |c: &Container| c.root_readonly,
        set_field: |c: &mut Container, v: bool| c.root_readonly = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "bind_dns",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::BIND_DNS_SET,
        parse: parse_bool,
        format: |v: &bool| format_bool(*v),
        get_field: |c: &Container| c.bind_dns,
        set_field: |c: &mut Container, v: bool| c.bind_dns = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "isolate",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::ISOLATE_SET,
        parse: parse_bool,
        format: |v: &bool| format_bool(*v),
        get_field: |c: &Container| c.isolate,
        set_field: |c: &mut Container, v: bool| c.isolate = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "virt_mode",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::VIRT_MODE_SET,
        parse: |v| v.parse::<VirtMode>().map_err(|_| ParseError::Other(format!("invalid virt_mode: {v}"))),
        format: |v: &VirtMode| v.to_string(),
        get_field: |c: &Container| c.virt_mode,
        set_field: |c: &mut Container, v: VirtMode| c.virt_mode = v,
        validate: None,
        apply: Some(apply_virt_mode),
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "hostname",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::HOSTNAME_SET,
        parse: |v| Ok(v.to_string()),
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.hostname.clone(),
        set_field: |c: &mut Container, v: String| c.hostname = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "stdin_path",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::STDIN_PATH_SET,
        parse: |v| Ok(v.to_string()),
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.stdin_path.clone(),
        set_field: |c: &mut Container, v: String| c.stdin_path = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "stdout_path",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::STDOUT_PATH_SET,
        parse: |v| Ok(v.to_string()),
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.stdout_path.clone(),
        set_field: |c: &mut Container, v: String| c.stdout_path = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "stderr_path",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::STDERR_PATH_SET,
        parse: |v| Ok(v.to_string()),
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.stderr_path.clone(),
        set_field: |c: &mut Container, v: String| c.stderr_path = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "stdout_limit",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::STDOUT_LIMIT_SET,
        parse: parse_size,
        format: |v: &u64| format_size(*v),
        get_field: |c: &Container| c.stdout_limit,
        set_field: |c: &mut Container, v: u64| c.stdout_limit = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "env",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::ENV_SET,
        parse: parse_env,
        format: |v: &Vec<(String, String)>| format_env(v),
        get_field: |c: &Container| c.env.clone(),
        set_field: |c: &mut Container, v: Vec<(String, String)>| c.env = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "bind",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::BIND_SET,
        parse: parse_binds,
        format: |v: &Vec<BindMount>| format_binds(v),
        get_field: |c: &Container| c.binds.clone(),
        set_field: |c: &mut Container, v: Vec<BindMount>| c.binds = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "devices",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::DEVICES_SET,
        parse: |v| Ok(parse_list(v)),
        format: |v: &Vec<String>| format_list(v.iter().map(|s| s.as_str())),
        get_field: |c: &Container| c.devices.clone(),
        set_field: |c: &mut Container, v: Vec<String>| c.devices = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "ulimit",
        flags: PropertyFlags { propagates: true, ..Default::default() },
        mask_bit: PropMask::ULIMIT_SET,
        parse: parse_ulimits,
        format: |v: &Ulimits| format_ulimits(v),
        get_field: |c: &Container| c.ulimits.clone(),
        set_field: |c: &mut Container, v: Ulimits| c.ulimits = v,
        validate: None,
        apply: None,
        supported: None,
    }));
}

#[cfg(test)]
mod tests {
    use crate::container::PropMask;
    use crate::cred::OwnerCred;
    use crate::holder::test_support::test_holder;

    #[test]
    fn bind_parses_and_formats_read_only_flag() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "bind", "/host /guest ro; /tmp /tmp rw").unwrap();
        assert_eq!(
            holder.dispatcher().get(&client, "a", "bind").unwrap(),
            "/host /guest ro; /tmp /tmp rw"
        );
    }

    #[test]
    fn virt_mode_os_backfills_cleared_defaults_only() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "cwd", "/srv").unwrap();
        holder.dispatcher().set(&client, "a", "virt_mode", "os").unwrap();
        assert_eq!(holder.container("a").unwrap().cwd, "/srv");
        assert_eq!(holder.container("a").unwrap().command, "/sbin/init");
        assert!(!holder.container("a").unwrap().bind_dns);
        assert!(holder.container("a").unwrap().caps.0 != 0);
    }

    #[test]
    fn virt_mode_os_backfill_does_not_mark_defaults_explicit() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "virt_mode", "os").unwrap();
        let c = holder.container("a").unwrap();
        assert!(c.is_explicit(PropMask::VIRT_MODE_SET));
        assert!(!c.is_explicit(PropMask::COMMAND_SET));
        assert!(!c.is_explicit(PropMask::CWD_SET));
        assert!(!c.is_explicit(PropMask::BIND_DNS_SET));
        assert!(!c.is_explicit(PropMask::CAPABILITIES_SET));
    }

    #[test]
    fn ulimit_rejects_unknown_resource_name() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        assert!(holder.dispatcher().set(&client, "a", "ulimit", "bogus: 1 2").is_err());
    }
}
