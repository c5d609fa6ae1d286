//! Lifespan policy: how long an idle aggregate worker stays resident.
//!
//! After every command outcome the worker consults its policy. A
//! returned [`Lifespan`] decision reprograms the idle timer; a policy
//! with no decision leaves whatever timer is currently in force --
//! the runtime's configured idle timeout, or an earlier decision.

use std::time::Duration;

use crate::aggregate::Aggregate;

/// Decision returned by a [`LifespanPolicy`] after each command outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifespan {
    /// Shut the worker down after this much idle time. Any message
    /// received before the deadline resets the timer.
    After(Duration),
    /// Keep the worker resident indefinitely; cancels any pending timer.
    Infinity,
    /// Compact the worker's resident representation without terminating.
    /// The worker drops its in-memory state and rehydrates from the
    /// event store on the next message. The idle timer is left as it was.
    Hibernate,
    /// Terminate the worker immediately, superseding any pending timer.
    Stop,
}

/// Pluggable decision function controlling worker residency.
///
/// One of the three hooks fires after every command, depending on the
/// outcome: events were produced, the command was a no-op, or the
/// command was rejected. Returning `Some(decision)` replaces the
/// worker's current idle timer; `None` expresses no opinion and keeps
/// the timer in force. The hooks default to `None`, so a policy only
/// overrides the outcomes it cares about.
pub trait LifespanPolicy<A: Aggregate>: Send + Sync + 'static {
    /// Called with the last event produced by a successful command.
    fn after_event(&self, _event: &A::DomainEvent) -> Option<Lifespan> {
        None
    }

    /// Called when a command succeeds without producing events.
    fn after_command(&self, _command: &A::Command) -> Option<Lifespan> {
        None
    }

    /// Called when the command handler rejects a command.
    fn after_error(&self, _error: &A::Error) -> Option<Lifespan> {
        None
    }
}

/// Default policy: never decides, so the runtime's configured idle
/// timeout governs worker eviction throughout.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLifespan;

impl<A: Aggregate> LifespanPolicy<A> for DefaultLifespan {}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::{Counter, CounterCommand, CounterError, CounterEvent};

    #[test]
    fn default_policy_never_decides() {
        let policy = DefaultLifespan;
        assert_eq!(
            LifespanPolicy::<Counter>::after_event(&policy, &CounterEvent::Incremented),
            None
        );
        assert_eq!(
            LifespanPolicy::<Counter>::after_command(&policy, &CounterCommand::Close),
            None
        );
        assert_eq!(
            LifespanPolicy::<Counter>::after_error(&policy, &CounterError::AlreadyZero),
            None
        );
    }

    #[test]
    fn stop_on_close_stops_only_on_closed_event() {
        let policy = test_policies::StopOnClose {
            idle: Duration::from_millis(100),
        };
        assert_eq!(
            policy.after_event(&CounterEvent::Closed),
            Some(Lifespan::Stop)
        );
        assert_eq!(
            policy.after_event(&CounterEvent::Incremented),
            Some(Lifespan::After(Duration::from_millis(100)))
        );
    }
}
