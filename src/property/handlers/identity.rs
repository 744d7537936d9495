//! Ownership and namespace properties.

use crate::container::{Container, PropMask};
use crate::cred::{CapabilityMask, OwnerCred};
use crate::error::{CoreError, CoreResult};
use crate::holder::Holder;
use crate::property::{PropertyFlags, PropertyHandler, Registry};

use super::{arc, FieldHandler};

struct UserHandler;

impl PropertyHandler for UserHandler {
    fn name(&self) -> &'static str {
        "user"
    }

    fn flags(&self) -> PropertyFlags {
        PropertyFlags { propagates: false, ..Default::default() }
    }

    fn set_mask(&self) -> PropMask {
        PropMask::USER
    }

    fn get(&self, holder: &Holder, container: &str) -> CoreResult<String> {
        let c = holder.container(container)?;
        holder.identity.user_name(c.owner_cred.uid)
    }

    fn set(&self, holder: &mut Holder, _client: &OwnerCred, container: &str, value: &str) -> CoreResult<()> {
        let uid = holder.identity.uid_of(value)?;
        holder.container_mut(container)?.owner_cred.uid = uid;
        holder.container_mut(container)?.task_cred.uid = uid;
        holder.container_mut(container)?.prop_mask.insert(PropMask::USER);
        Ok(())
    }
}

struct GroupHandler;

impl PropertyHandler for GroupHandler {
    fn name(&self) -> &'static str {
        "group"
    }

    fn flags(&self) -> PropertyFlags {
        PropertyFlags { propagates: false, ..Default::default() }
    }

    fn set_mask(&self) -> PropMask {
        PropMask::GROUP
    }

    fn get(&self, holder: &Holder, container: &str) -> CoreResult<String> {
        let c = holder.container(container)?;
        holder.identity.group_name(c.owner_cred.gid)
    }

    fn set(&self, holder: &mut Holder, _client: &OwnerCred, container: &str, value: &str) -> CoreResult<()> {
        let gid = holder.identity.gid_of(value)?;
        holder.container_mut(container)?.owner_cred.gid = gid;
        holder.container_mut(container)?.task_cred.gid = gid;
        holder.container_mut(container)?.prop_mask.insert(PropMask::GROUP);
        Ok(())
    }
}

/// Capability parsing needs `config.last_capability`, which a plain
/// `fn(&str) -> Result<T, ParseError>` can't see, so this handler is
/// hand-written rather than a `FieldHandler<CapabilityMask>`.
struct CapabilitiesHandler;

impl PropertyHandler for CapabilitiesHandler {
    fn name(&self) -> &'static str {
        "capabilities"
    }

    fn flags(&self) -> PropertyFlags {
        PropertyFlags { propagates: false, ..Default::default() }
    }

    fn set_mask(&self) -> PropMask {
        PropMask::CAPABILITIES_SET
    }

    fn get(&self, holder: &Holder, container: &str) -> CoreResult<String> {
        Ok(holder.container(container)?.caps.format())
    }

    fn set(&self, holder: &mut Holder, _client: &OwnerCred, container: &str, value: &str) -> CoreResult<()> {
        let mask = CapabilityMask::parse(value, holder.config.last_capability)?;
        holder.container_mut(container)?.caps = mask;
        holder.container_mut(container)?.prop_mask.insert(PropMask::CAPABILITIES_SET);
        Ok(())
    }
}

fn parse_private(value: &str) -> Result<String, crate::property::value::ParseError> {
    Ok(value.to_string())
}

pub fn register(registry: &mut Registry) {
    registry.register(arc(UserHandler));
    registry.register(arc(GroupHandler));
    registry.register(arc(CapabilitiesHandler));

    registry.register(arc(FieldHandler {
        name: "porto_namespace",
        flags: PropertyFlags { propagates: false, ..Default::default() },
        mask_bit: PropMask::PORTO_NAMESPACE_SET,
        parse: |v| Ok(v.to_string()),
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.ns_name.clone(),
        set_field: |c: &mut Container, v: String| c.ns_name = v,
        validate: None,
        apply: None,
        supported: None,
    }));

    registry.register(arc(FieldHandler {
        name: "private",
        flags: PropertyFlags { dynamic: true, propagates: false, ..Default::default() },
        mask_bit: PropMask::PRIVATE_SET,
        parse: parse_private,
        format: |v: &String| v.clone(),
        get_field: |c: &Container| c.private.clone(),
        set_field: |c: &mut Container, v: String| c.private = v,
        validate: None,
        apply: None,
        supported: None,
    }));
}

#[cfg(test)]
mod tests {
    use crate::cred::fakes::FakeIdentityDirectory;
    use crate::holder::test_support::test_holder;

    use super::*;

    #[test]
    fn user_set_resolves_name_to_uid() {
        let mut holder = test_holder();
        let mut dir = FakeIdentityDirectory::default();
        dir.users.insert("alice".into(), (1000, 1000));
        holder.identity = Box::new(dir);
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "user", "alice").unwrap();
        assert_eq!(holder.container("a").unwrap().owner_cred.uid, 1000);
    }

    #[test]
    fn capabilities_roundtrip_through_registry() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "capabilities", "CHOWN; KILL").unwrap();
        assert_eq!(holder.dispatcher().get(&client, "a", "capabilities").unwrap(), "CHOWN; KILL");
    }

    #[test]
    fn capabilities_rejects_unknown_name() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        let client = OwnerCred::root();
        assert!(holder.dispatcher().set(&client, "a", "capabilities", "NOT_A_CAP").is_err());
    }
}
