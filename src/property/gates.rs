//! Shared gating primitives applied by the Dispatcher before a handler's
//! `set`/`set_indexed` ever runs. Kept out of individual handlers so every
//! property enforces them identically.

use crate::container::{Container, State};
use crate::cred::{can_control, OwnerCred};
use crate::error::{CoreError, CoreResult};

pub fn require_permission(client: &OwnerCred, container: &Container) -> CoreResult<()> {
    if can_control(client, &container.owner_cred) {
        Ok(())
    } else {
        Err(CoreError::permission(format!(
            "{} is not permitted to modify container owned by uid {}",
            client.uid, container.owner_cred.uid
        )))
    }
}

/// `dynamic` ("runtime") properties are gated by *alive*: settable in any
/// state except Dead. Non-`dynamic` ("configuration") properties are
/// gated by *stopped-only*: settable while Stopped or Unknown (restore),
/// rejected once the container has been started (Running/Meta/Paused) or
/// has died.
pub fn require_settable_state(container: &Container, property: &str, dynamic: bool) -> CoreResult<()> {
    let ok = if dynamic {
        container.state != State::Dead
    } else {
        matches!(container.state, State::Stopped | State::Unknown)
    };
    if ok {
        Ok(())
    } else if dynamic {
        Err(CoreError::invalid_state(format!(
            "{property} cannot be set on a dead container (current state: {})",
            container.state
        )))
    } else {
        Err(CoreError::invalid_state(format!(
            "{property} may only be set while the container is stopped (current state: {})",
            container.state
        )))
    }
}
