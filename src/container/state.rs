//! Container lifecycle state machine.

use parse_display::{Display, FromStr};

/// A container's lifecycle state. `Unknown` only exists transiently during
/// restore, before the persisted state is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromStr)]
#[display(style = "lowercase")]
pub enum State {
    Unknown,
    Stopped,
    Running,
    Paused,
    Meta,
    Dead,
}

impl State {
    /// True for any state other than `Dead`.
    pub fn is_alive(&self) -> bool {
        !matches!(self, State::Dead)
    }

    /// True for the states that host a live process tree: a parent's
    /// state tracks Running/Meta/Paused whenever any child is live too.
    pub fn is_live(&self) -> bool {
        matches!(self, State::Running | State::Meta | State::Paused)
    }

    /// Is `to` a legal transition from `self`?
    pub fn can_transition_to(&self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Stopped, Running)
                | (Stopped, Meta)
                | (Running, Paused)
                | (Running, Dead)
                | (Meta, Paused)
                | (Meta, Dead)
                | (Paused, Running)
                | (Paused, Meta)
                | (Paused, Dead)
                | (Dead, Stopped)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_may_start_into_running_or_meta() {
        assert!(State::Stopped.can_transition_to(State::Running));
        assert!(State::Stopped.can_transition_to(State::Meta));
        assert!(!State::Stopped.can_transition_to(State::Paused));
    }

    #[test]
    fn dead_may_only_reset_to_stopped() {
        assert!(State::Dead.can_transition_to(State::Stopped));
        assert!(!State::Dead.can_transition_to(State::Running));
    }

    #[test]
    fn paused_resumes_into_running_or_meta_or_dies() {
        assert!(State::Paused.can_transition_to(State::Running));
        assert!(State::Paused.can_transition_to(State::Meta));
        assert!(State::Paused.can_transition_to(State::Dead));
        assert!(!State::Paused.can_transition_to(State::Stopped));
    }

    #[test]
    fn display_matches_persisted_state_names() {
        assert_eq!(State::Stopped.to_string(), "stopped");
        assert_eq!(State::Dead.to_string(), "dead");
        assert_eq!("meta".parse::<State>().unwrap(), State::Meta);
    }

    #[test]
    fn alive_and_live_classify_correctly() {
        assert!(!State::Dead.is_alive());
        assert!(State::Stopped.is_alive());
        assert!(!State::Stopped.is_live());
        assert!(State::Running.is_live());
        assert!(State::Meta.is_live());
        assert!(State::Paused.is_live());
    }
}
