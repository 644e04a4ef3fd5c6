//! Supervisor state machine, observer events and counters.

use std::fmt;
use std::time::Duration;

/// Lifecycle state of the connection supervisor.
///
/// `Disconnected → Connecting → Active → Disconnected → …` loops until an
/// operator shutdown moves it to the terminal `ShuttingDown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SupervisorState {
    #[default]
    Disconnected,
    Connecting,
    Active,
    ShuttingDown,
}

impl SupervisorState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Active)
                | (Connecting, Disconnected)
                | (Active, Active)
                | (Active, Disconnected)
                | (Disconnected | Connecting | Active, ShuttingDown)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::ShuttingDown
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Events published to an optional supervisor observer.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    StateChanged {
        from: SupervisorState,
        to: SupervisorState,
    },
    /// A connect attempt is starting (1-based).
    Connecting { attempt: u64 },
    /// The session joined and behavior tasks were armed.
    Ready { session_id: String, baseline_yaw: f32 },
    Kicked { reason: String },
    Terminated { cause: String },
    Failed { error: String },
    ReconnectScheduled { delay: Duration },
    ShutDown,
}

/// Lifetime counters, returned when the supervisor stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub connect_attempts: u64,
    pub sessions_ready: u64,
    pub kicks: u64,
    pub terminations: u64,
    pub failures: u64,
    pub reconnects_scheduled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions_are_allowed() {
        use SupervisorState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Active));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Active.can_transition_to(Disconnected));
        assert!(Active.can_transition_to(ShuttingDown));
    }

    #[test]
    fn shutting_down_is_terminal() {
        use SupervisorState::*;
        assert!(ShuttingDown.is_terminal());
        for next in [Disconnected, Connecting, Active, ShuttingDown] {
            assert!(!ShuttingDown.can_transition_to(next));
        }
        assert!(!Disconnected.can_transition_to(Active));
    }
}
