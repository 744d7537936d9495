//! Property Registry.
//!
//! Each property is represented as a record of typed operations rather
//! than a node in an inheritance hierarchy: a
//! [`PropertyHandler`] trait object, held behind an `Arc` so the registry
//! can hand one out to the [`crate::holder::Dispatcher`] without holding
//! a borrow of itself across the handler call (the handler's `set` needs
//! to re-enter the registry for propagation).

pub mod gates;
pub mod handlers;
pub mod value;

use std::collections::HashMap;
use std::sync::Arc;

use crate::cred::OwnerCred;
use crate::error::{CoreError, CoreResult};
use crate::holder::Holder;

/// Static, per-handler metadata.
#[derive(Debug, Clone, Copy)]
pub struct PropertyFlags {
    pub read_only: bool,
    pub hidden: bool,
    /// Whether this property's value is written to the persisted snapshot
    /// (§6) for restart survival. Defaults to true: the large majority of
    /// properties are plain container configuration that must survive a
    /// restart, so handlers opt *out* (`CounterHandler` hardcodes false)
    /// rather than every `FieldHandler` registration opting in.
    pub serialized: bool,
    /// Settable while the container is Running/Meta/Paused, not only
    /// while Stopped.
    pub dynamic: bool,
    /// Propagates to non-isolated children whose own bit is clear.
    pub propagates: bool,
    pub indexed: bool,
}

impl Default for PropertyFlags {
    fn default() -> Self {
        PropertyFlags {
            read_only: false,
            hidden: false,
            serialized: true,
            dynamic: false,
            propagates: false,
            indexed: false,
        }
    }
}

/// One property's parse/format/validate/mutate/enforce/propagate behavior
///.
pub trait PropertyHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn flags(&self) -> PropertyFlags;
    fn set_mask(&self) -> crate::container::PropMask;

    /// Whether this handler's backing kernel feature was detected at boot
    /// Queried against the holder's
    /// capabilities; defaults to always-supported.
    fn is_supported(&self, _holder: &Holder) -> bool {
        true
    }

    fn get(&self, holder: &Holder, container: &str) -> CoreResult<String>;

    fn set(&self, holder: &mut Holder, client: &OwnerCred, container: &str, value: &str) -> CoreResult<()>;

    fn get_indexed(&self, _holder: &Holder, _container: &str, index: &str) -> CoreResult<String> {
        Err(CoreError::invalid_value(format!("{} is not an indexed property (index {index})", self.name())))
    }

    fn set_indexed(
        &self,
        _holder: &mut Holder,
        _client: &OwnerCred,
        _container: &str,
        index: &str,
        _value: &str,
    ) -> CoreResult<()> {
        Err(CoreError::invalid_value(format!("{} is not an indexed property (index {index})", self.name())))
    }

    /// Writes a value as root, skipping client permission checks and
    /// state gates, and marks the property's `PropMask` bit as if a
    /// client had just set it. Default: delegates to `set`. No caller in
    /// this crate currently wants both "skip gates" and "mark explicit"
    /// at once (restore, propagation, and VirtMode back-fill all want
    /// the gate skip without the mark — see `set_inherited`), but the
    /// distinction is kept for a future handler that does.
    fn set_from_restore(&self, holder: &mut Holder, container: &str, value: &str) -> CoreResult<()> {
        self.set(holder, &OwnerCred::root(), container, value)
    }

    /// Writes a value that was *inherited* rather than explicitly
    /// requested: a VirtMode back-fill, a propagation from a parent, or a
    /// snapshot restore of a property whose bit wasn't set at save time.
    /// Runs the same parse/validate/apply path as `set` but leaves the
    /// container's `PropMask` bit for this property untouched, since
    /// `PropMask` must record only properties a client actually set
    /// (§8: `p ∈ PropMask(C) ⇔ p was last assigned by an explicit Set`).
    /// Default: runs `set` (which unconditionally sets the bit) and then
    /// clears it again — every handler's `set` sets exactly its own
    /// `set_mask()` bit, so this is correct without per-handler overrides.
    fn set_inherited(&self, holder: &mut Holder, container: &str, value: &str) -> CoreResult<()> {
        self.set(holder, &OwnerCred::root(), container, value)?;
        holder.container_mut(container)?.prop_mask.remove(self.set_mask());
        Ok(())
    }
}

/// Immutable, boot-time-initialized mapping from property name to handler.
/// The registry owns a single handler instance per property name, shared
/// by every container.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<&'static str, Arc<dyn PropertyHandler>>,
    order: Vec<&'static str>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(&mut self, handler: Arc<dyn PropertyHandler>) {
        let name = handler.name();
        self.order.push(name);
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PropertyHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.order.iter().copied()
    }

    /// Properties that propagate to children, in registration
    /// order, for use by the propagation walk.
    pub fn propagating(&self) -> impl Iterator<Item = Arc<dyn PropertyHandler>> + '_ {
        self.order
            .iter()
            .filter_map(|n| self.handlers.get(n))
            .filter(|h| h.flags().propagates)
            .cloned()
    }

    /// Properties written to a persisted snapshot for restart survival
    /// (§6), in registration order.
    pub fn serialized(&self) -> impl Iterator<Item = Arc<dyn PropertyHandler>> + '_ {
        self.order
            .iter()
            .filter_map(|n| self.handlers.get(n))
            .filter(|h| h.flags().serialized)
            .cloned()
    }

    pub fn full() -> Self {
        let mut registry = Registry::new();
        handlers::register_all(&mut registry);
        registry
    }
}

/// Propagates `container`'s current value of `handler` to every
/// non-isolated child whose own bit for `handler.set_mask()` is clear
///. Depth-first pre-order; stops and returns
/// the error on the first kernel-apply failure, leaving already-visited
/// nodes holding the new value (see DESIGN.md for the rationale).
pub fn propagate_to_children(
    holder: &mut Holder,
    handler: &Arc<dyn PropertyHandler>,
    parent: &str,
) -> CoreResult<()> {
    let children = holder
        .container(parent)
        .map(|c| c.children.clone())
        .unwrap_or_default();

    for child in children {
        let (isolate, already_set, unconditional) = {
            let c = holder.container(&child)?;
            (c.isolate, c.is_explicit(handler.set_mask()), handler.name() == "enable_porto")
        };

        // PortoEnabled propagates unconditionally and ignores Isolate; it
        // can only be turned *off* in a subtree when the parent is off
        //.
        if unconditional {
            let parent_value = holder.container(parent)?.porto_enabled;
            if !parent_value {
                let child_mut = holder.container_mut(&child)?;
                child_mut.porto_enabled = false;
            }
        } else {
            if isolate || already_set {
                continue;
            }
            let value = handler.get(holder, parent)?;
            handler.set_inherited(holder, &child, &value)?;
        }

        propagate_to_children(holder, handler, &child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::test_support::test_holder;

    #[test]
    fn registry_full_contains_every_rpc_property() {
        let registry = Registry::full();
        for name in crate::RPC_PROPERTY_NAMES {
            assert!(registry.get(name).is_some(), "missing handler for {name}");
        }
    }

    #[test]
    fn propagation_stops_isolate_from_receiving_parent_value() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        holder.create_container("a/b", Some("a".into())).unwrap();
        holder.container_mut("a/b").unwrap().isolate = true;

        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "cpu_policy", "idle").unwrap();

        assert_eq!(holder.container("a/b").unwrap().cpu_policy, crate::capability::CpuPolicyKind::Normal);
    }

    #[test]
    fn propagation_reaches_non_isolated_child_until_explicitly_set() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        holder.create_container("a/b", Some("a".into())).unwrap();

        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "cpu_policy", "idle").unwrap();
        assert_eq!(holder.container("a/b").unwrap().cpu_policy, crate::capability::CpuPolicyKind::Idle);

        holder.dispatcher().set(&client, "a/b", "isolate", "true").unwrap();
        holder.dispatcher().set(&client, "a", "cpu_policy", "normal").unwrap();
        assert_eq!(holder.container("a/b").unwrap().cpu_policy, crate::capability::CpuPolicyKind::Idle);
    }

    #[test]
    fn propagated_value_does_not_mark_child_explicit() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        holder.create_container("a/b", Some("a".into())).unwrap();

        let client = OwnerCred::root();
        holder.dispatcher().set(&client, "a", "cpu_policy", "idle").unwrap();
        assert!(!holder
            .container("a/b")
            .unwrap()
            .is_explicit(crate::container::PropMask::CPU_POLICY_SET));

        holder.dispatcher().set(&client, "a", "cpu_policy", "normal").unwrap();
        assert_eq!(holder.container("a/b").unwrap().cpu_policy, crate::capability::CpuPolicyKind::Normal);
        assert_eq!(holder.container("a").unwrap().cpu_policy, crate::capability::CpuPolicyKind::Normal);
    }
}
