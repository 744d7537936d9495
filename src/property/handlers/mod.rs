//! Concrete property handlers.
//!
//! Most properties are a thin (parse, format, get field, set field)
//! quadruple; [`FieldHandler`] captures that shape generically so the
//! per-property boilerplate stays small, in the spirit of the registry
//! being "a table of typed operations, not a hierarchy". Properties with
//! real side effects (kernel cgroup/traffic-class programming, identity
//! resolution, VirtMode back-fill) implement
//! [`super::PropertyHandler`] by hand in their own submodule.

pub mod identity;
pub mod lifecycle;
pub mod network;
pub mod resources;
pub mod runtime;
pub mod stats;

use std::sync::Arc;

use crate::container::{Container, PropMask};
use crate::cred::OwnerCred;
use crate::error::{CoreError, CoreResult};
use crate::holder::Holder;
use crate::property::value::ParseError;
use crate::property::{PropertyFlags, PropertyHandler, Registry};

/// A property backed by one plain `Container` field, with no kernel side
/// effect beyond an optional `apply` hook (cgroup/traffic-class
/// programming). Covers the large majority of settable properties.
pub struct FieldHandler<T> {
    pub name: &'static str,
    pub flags: PropertyFlags,
    pub mask_bit: PropMask,
    pub parse: fn(&str) -> Result<T, ParseError>,
    pub format: fn(&T) -> String,
    pub get_field: fn(&Container) -> T,
    pub set_field: fn(&mut Container, T),
    pub validate: Option<fn(&Holder, &Container, &T) -> CoreResult<()>>,
    pub apply: Option<fn(&mut Holder, &str, &T) -> CoreResult<()>>,
    pub supported: Option<fn(&Holder) -> bool>,
}

impl<T: Clone + Send + Sync + 'static> PropertyHandler for FieldHandler<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn flags(&self) -> PropertyFlags {
        self.flags
    }

    fn set_mask(&self) -> PropMask {
        self.mask_bit
    }

    fn is_supported(&self, holder: &Holder) -> bool {
        self.supported.map(|f| f(holder)).unwrap_or(true)
    }

    fn get(&self, holder: &Holder, container: &str) -> CoreResult<String> {
        let c = holder.container(container)?;
        Ok((self.format)(&(self.get_field)(c)))
    }

    fn set(&self, holder: &mut Holder, _client: &OwnerCred, container: &str, value: &str) -> CoreResult<()> {
        let parsed = (self.parse)(value).map_err(CoreError::from)?;
        if let Some(validate) = self.validate {
            let c = holder.container(container)?;
            validate(holder, c, &parsed)?;
        }
        let previous = (self.get_field)(holder.container(container)?);
        (self.set_field)(holder.container_mut(container)?, parsed.clone());
        if let Some(apply) = self.apply {
            if let Err(e) = apply(holder, container, &parsed) {
                (self.set_field)(holder.container_mut(container)?, previous);
                return Err(e);
            }
        }
        holder.container_mut(container)?.prop_mask.insert(self.mask_bit);
        Ok(())
    }
}

/// A read-only property computed from a capability or a container field
/// that has no corresponding `PropMask` bit, because it can never be
/// explicitly set.
pub struct CounterHandler {
    pub name: &'static str,
    pub hidden: bool,
    pub get: fn(&Holder, &Container) -> CoreResult<String>,
}

impl PropertyHandler for CounterHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn flags(&self) -> PropertyFlags {
        PropertyFlags {
            read_only: true,
            hidden: self.hidden,
            serialized: false,
            dynamic: true,
            propagates: false,
            indexed: false,
        }
    }

    fn set_mask(&self) -> PropMask {
        PropMask::empty()
    }

    fn get(&self, holder: &Holder, container: &str) -> CoreResult<String> {
        let c = holder.container(container)?;
        (self.get)(holder, c)
    }

    fn set(&self, _holder: &mut Holder, _client: &OwnerCred, _container: &str, _value: &str) -> CoreResult<()> {
        Err(CoreError::invalid_value(format!("{} is read-only", self.name)))
    }
}

pub fn register_all(registry: &mut Registry) {
    identity::register(registry);
    runtime::register(registry);
    network::register(registry);
    resources::register(registry);
    lifecycle::register(registry);
    stats::register(registry);
}

pub(crate) fn arc(handler: impl PropertyHandler + 'static) -> Arc<dyn PropertyHandler> {
    Arc::new(handler)
}
