//! Network properties: the `net` spec itself, addressing, and the maps
//! that feed the Traffic Class Coordinator.

use crate::container::{resolve_net_map, Container, NetMap, PropMask};
use crate::cred::OwnerCred;
use crate::error::{CoreError, CoreResult};
use crate::holder::Holder;
use crate::property::value::{
    format_list, format_net_spec, format_size, parse_list, parse_map, parse_net_priority, parse_net_spec, parse_size,
    NetSpecLine, ParseError,
};
use crate::property::{PropertyFlags, PropertyHandler, Registry};
use crate::traffic::TrafficCoordinator;

use super::{arc, FieldHandler};

/// `net_guarantee`/`net_limit`/`net_priority`: per-interface maps that
/// replace wholesale on `Set` and support `GetIndexed`/`SetIndexed` on a
/// single interface.
struct NetMapHandler<V> {
    name: &'static str,
    mask_bit: PropMask,
    parse_value: fn(&str) -> Result<V, ParseError>,
    format_value: fn(&V) -> String,
    get_map: fn(&Container) -> NetMap<V>,
    set_map: fn(&mut Container, NetMap<V>),
}

impl<V: Clone + Send + Sync + 'static> PropertyHandler for NetMapHandler<V> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn flags(&self) -> PropertyFlags {
        PropertyFlags { propagates: false, indexed: true, ..Default::default() }
    }

    fn set_mask(&self) -> PropMask {
        self.mask_bit
    }

    fn get(&self, holder: &Holder, container: &str) -> CoreResult<String> {
        let map = (self.get_map)(holder.container(container)?);
        Ok(map
            .iter()
            .map(|(k, v)| format!("{k}: {}", (self.format_value)(v)))
            .collect::<Vec<_>>()
            .join("; "))
    }

    fn get_indexed(&self, holder: &Holder, container: &str, index: &str) -> CoreResult<String> {
        let map = (self.get_map)(holder.container(container)?);
        match resolve_net_map(&map, index) {
            Some(v) => Ok((self.format_value)(v)),
            None => Err(CoreError::not_found(format!("no entry for interface {index}"))),
        }
    }

    fn set(&self, holder: &mut Holder, _client: &OwnerCred, container: &str, value: &str) -> CoreResult<()> {
        let mut map = NetMap::new();
        for (key, raw) in parse_map(value)? {
            map.insert(key, (self.parse_value)(&raw)?);
        }
        let previous = (self.get_map)(holder.container(container)?);
        (self.set_map)(holder.container_mut(container)?, map);
        if let Err(e) = TrafficCoordinator::sync_subtree(holder, container) {
            (self.set_map)(holder.container_mut(container)?, previous);
            return Err(e);
        }
        holder.container_mut(container)?.prop_mask.insert(self.mask_bit);
        Ok(())
    }

    fn set_indexed(
        &self,
        holder: &mut Holder,
        _client: &OwnerCred,
        container: &str,
        index: &str,
        value: &str,
    ) -> CoreResult<()> {
        let parsed = (self.parse_value)(value)?;
        let previous = (self.get_map)(holder.container(container)?);
        let mut map = previous.clone();
        map.insert(index.to_string(), parsed);
        (self.set_map)(holder.container_mut(container)?, map);
        if let Err(e) = TrafficCoordinator::sync_subtree(holder, container) {
            (self.set_map)(holder.container_mut(container)?, previous);
            return Err(e);
        }
        holder.container_mut(container)?.prop_mask.insert(self.mask_bit);
        Ok(())
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(arc(FieldHandler {
        name: "net",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::NET_SET,
        parse: parse_net_spec,
        format: |v: &Vec<NetSpecLine>| format_net_spec(v),
        get_field: |c: &Container| c.net_prop.clone(),
        set_field: |c: &mut Container, v: Vec<NetSpecLine>| c.net_prop = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "ip",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::IP_SET,
        parse: |v| Ok(parse_list(v)),
        format: |v: &Vec<String>| format_list(v.iter().map(|s| s.as_str())),
        get_field: |c: &Container| c.ip_list.clone(),
        set_field: |c: &mut Container, v: Vec<String>| c.ip_list = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "default_gw",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::DEFAULT_GW_SET,
        parse: |v| Ok(v.to_string()),
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.default_gw.clone(),
        set_field: |c: &mut Container, v: String| c.default_gw = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "resolv_conf",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::RESOLV_CONF_SET,
        parse: |v| Ok(v.to_string()),
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.resolv_conf.clone(),
        set_field: |c: &mut Container, v: String| c.resolv_conf = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "net_tos",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::NET_TOS_SET,
        parse: |v| Ok(v.to_string()),
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.net_tos.clone(),
        set_field: |c: &mut Container, v: String| c.net_tos = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(NetMapHandler {
        name: "net_guarantee",
        mask_bit: PropMask::NET_GUARANTEE_SET,
        parse_value: parse_size,
        format_value: |v: &u64| format_size(*v),
        get_map: |c: &Container| c.net_guarantee.clone(),
        set_map: |c: &mut Container, v: NetMap<u64>| c.net_guarantee = v,
    }));

    registry.register(arc(NetMapHandler {
        name: "net_limit",
        mask_bit: PropMask::NET_LIMIT_SET,
        parse_value: parse_size,
        format_value: |v: &u64| format_size(*v),
        get_map: |c: &Container| c.net_limit.clone(),
        set_map: |c: &mut Container, v: NetMap<u64>| c.net_limit = v,
    }));

    registry.register(arc(NetMapHandler {
        name: "net_priority",
        mask_bit: PropMask::NET_PRIORITY_SET,
        parse_value: parse_net_priority,
        format_value: |v: &u32| v.to_string(),
        get_map: |c: &Container| c.net_priority.clone(),
        set_map: |c: &mut Container, v: NetMap<u32>| c.net_priority = v,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::test_support::test_holder;

    #[test]
    fn net_guarantee_set_indexed_updates_single_interface() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "net_guarantee", "default: 1000").unwrap();
        holder.dispatcher().set_indexed(&client, "a", "net_guarantee", "eth0", "2000").unwrap();
        assert_eq!(
            holder.dispatcher().get_indexed(&client, "a", "net_guarantee", "eth0").unwrap(),
            "2000"
        );
        assert_eq!(
            holder.dispatcher().get_indexed(&client, "a", "net_guarantee", "eth1").unwrap(),
            "1000"
        );
    }

    #[test]
    fn net_limit_set_rolls_back_map_on_traffic_class_failure() {
        let mut holder = test_holder();
        holder.config.max_net_limit = 100;
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "net_limit", "default: 50").unwrap();
        assert!(holder
            .dispatcher()
            .set(&client, "a", "net_limit", "eth0:1000000; default:500000")
            .is_err());
        assert_eq!(
            holder.dispatcher().get(&client, "a", "net_limit").unwrap(),
            "default: 50"
        );
    }

    #[test]
    fn net_priority_rejects_out_of_range() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        assert!(holder.dispatcher().set(&client, "a", "net_priority", "default: 9").is_err());
    }

    #[test]
    fn net_spec_parses_through_registry() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "net", "host eth0").unwrap();
        assert_eq!(holder.dispatcher().get(&client, "a", "net").unwrap(), "host eth0");
    }
}
