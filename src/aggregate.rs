//! Aggregate trait: the user-authored decision/fold seam.

use serde::{Serialize, de::DeserializeOwned};

/// Domain state rebuilt by folding a stream of events.
///
/// The implementing type *is* the aggregate's state. The runtime never
/// persists it: only events are stored, and state is recovered by
/// replaying the stream through [`apply`](Aggregate::apply) after a
/// spawn, hibernation, or crash. The `Default` bound supplies the state
/// of an empty stream.
///
/// Both methods must be pure. `handle` decides, with no I/O and no side
/// effects; `apply` folds, and must be total over the events `handle`
/// can produce. Everything stateful -- stream naming, persistence,
/// rehydration, residency -- belongs to the worker that owns an
/// instance of this type.
pub trait Aggregate:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Type tag prefixed onto every stream id (`"{type}-{identity}"`)
    /// and used to key the worker directory.
    const AGGREGATE_TYPE: &'static str;

    /// Commands this aggregate accepts.
    type Command: Send + 'static;

    /// Events this aggregate produces and folds.
    ///
    /// Must use adjacently tagged serde
    /// (`#[serde(tag = "type", content = "data")]`) -- the runtime
    /// splits the tag off as the stored event type and the content as
    /// the payload.
    type DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + 'static;

    /// Why a command was rejected. Surfaced unchanged through
    /// [`ExecuteError::Domain`](crate::ExecuteError::Domain).
    type Error: std::error::Error + Send + Sync + 'static;

    /// Decide what a command means given the current state.
    ///
    /// `Ok(vec![])` is a successful no-op: nothing is persisted and the
    /// stream version does not move. `Err` rejects the command.
    fn handle(&self, cmd: Self::Command) -> Result<Vec<Self::DomainEvent>, Self::Error>;

    /// Fold one event into the state.
    ///
    /// During rehydration, stored events whose type tag no longer
    /// deserializes are skipped before this is called, so
    /// implementations only ever see variants they know.
    fn apply(self, event: &Self::DomainEvent) -> Self;
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::Aggregate;
    use serde::{Deserialize, Serialize};

    /// A simple counter aggregate used as a test fixture.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Counter {
        pub value: u64,
        pub closed: bool,
    }

    /// Commands that can be issued to the `Counter` aggregate.
    #[derive(Debug, Clone)]
    pub(crate) enum CounterCommand {
        Increment,
        Decrement,
        Add(u64),
        /// Closes the counter; pairs with lifespan policies that stop on close.
        Close,
        /// Always rejected; exercises the error lifespan path.
        Reject,
    }

    /// Domain events produced by the `Counter` aggregate.
    ///
    /// Uses adjacently tagged serialization (`"type"` + `"data"`) which is the
    /// convention for all `DomainEvent` types in this crate.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    pub(crate) enum CounterEvent {
        Incremented,
        Decremented,
        Added { amount: u64 },
        Closed,
    }

    /// Errors that can occur when handling a `CounterCommand`.
    #[derive(Debug, thiserror::Error)]
    pub(crate) enum CounterError {
        #[error("cannot decrement: counter is already zero")]
        AlreadyZero,
        #[error("command rejected")]
        Rejected,
    }

    impl Aggregate for Counter {
        const AGGREGATE_TYPE: &'static str = "counter";

        type Command = CounterCommand;
        type DomainEvent = CounterEvent;
        type Error = CounterError;

        fn handle(&self, cmd: Self::Command) -> Result<Vec<Self::DomainEvent>, Self::Error> {
            match cmd {
                CounterCommand::Increment => Ok(vec![CounterEvent::Incremented]),
                CounterCommand::Decrement => {
                    if self.value == 0 {
                        return Err(CounterError::AlreadyZero);
                    }
                    Ok(vec![CounterEvent::Decremented])
                }
                CounterCommand::Add(n) => Ok(vec![CounterEvent::Added { amount: n }]),
                CounterCommand::Close => {
                    if self.closed {
                        // Closing twice is a no-op, not an error.
                        return Ok(vec![]);
                    }
                    Ok(vec![CounterEvent::Closed])
                }
                CounterCommand::Reject => Err(CounterError::Rejected),
            }
        }

        fn apply(mut self, event: &Self::DomainEvent) -> Self {
            match event {
                CounterEvent::Incremented => self.value += 1,
                CounterEvent::Decremented => self.value -= 1,
                CounterEvent::Added { amount } => self.value += amount,
                CounterEvent::Closed => self.closed = true,
            }
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Aggregate;
    use super::test_fixtures::{Counter, CounterCommand, CounterError, CounterEvent};

    #[test]
    fn handle_increment() {
        let counter = Counter::default();
        let events = counter.handle(CounterCommand::Increment).unwrap();
        assert_eq!(events, vec![CounterEvent::Incremented]);
    }

    #[test]
    fn handle_decrement_at_zero() {
        let counter = Counter::default();
        let result = counter.handle(CounterCommand::Decrement);
        let err = result.unwrap_err();
        assert!(
            matches!(err, CounterError::AlreadyZero),
            "expected AlreadyZero, got: {err}"
        );
    }

    #[test]
    fn handle_close_twice_is_noop() {
        let counter = Counter::default();
        let events = counter.handle(CounterCommand::Close).unwrap();
        let closed = events
            .iter()
            .fold(Counter::default(), |state, event| state.apply(event));
        assert!(closed.closed);

        let events = closed.handle(CounterCommand::Close).unwrap();
        assert!(events.is_empty(), "second close should produce no events");
    }

    #[test]
    fn apply_folds_sequentially() {
        let events = vec![
            CounterEvent::Incremented,
            CounterEvent::Added { amount: 10 },
            CounterEvent::Decremented,
        ];
        let state = events
            .iter()
            .fold(Counter::default(), |state, event| state.apply(event));
        assert_eq!(state.value, 10);
    }
}
