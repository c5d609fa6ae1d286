//! Runtime core for a command-query/event-sourcing library.
//!
//! Two responsibilities live here:
//!
//! 1. **Per-identity aggregate workers.** Exactly one addressable,
//!    stateful worker runs per (aggregate type, identity). Commands for
//!    one identity execute strictly sequentially; distinct identities
//!    run fully concurrently. Workers rehydrate from the event store on
//!    demand, idle out on a configurable timeout, and apply a pluggable
//!    [`LifespanPolicy`] after every command outcome.
//!
//! 2. **Consistency tracking.** Event consumers acknowledge the stream
//!    versions they have processed; a dispatcher can block in
//!    [`Subscriptions::wait_for`] until a stream has propagated to all
//!    required subscribers, with a timeout budget and a periodically
//!    purged ledger.
//!
//! The event store and the registration/broadcast transport are seams
//! ([`EventStore`], [`Registration`]) with bundled in-process
//! implementations for local deployments and tests.

mod aggregate;
pub use aggregate::Aggregate;
mod command;
pub use command::CommandContext;
mod error;
pub use error::{
    ConsistencyError, ExecuteError, RegistrationError, StartError, StateError, StoreError,
    WaitError,
};
mod event;
pub use event::{EventMetadata, ProposedEvent, RecordedEvent, stream_id};
mod lifespan;
pub use lifespan::{DefaultLifespan, Lifespan, LifespanPolicy};
mod registration;
pub use registration::{LocalRegistration, Registration};
mod registry;
pub use registry::AggregateRegistry;
mod runtime;
pub use runtime::{Runtime, RuntimeBuilder};
mod store;
pub use store::{EventStore, ExpectedVersion, InMemoryEventStore};
mod subscriptions;
pub use subscriptions::{
    ACK_TOPIC, Consistency, DEFAULT_ACK_TTL, DEFAULT_WAIT_TIMEOUT, SUBSCRIBERS_TOPIC,
    Subscriptions, WaitOptions,
};
mod worker;
pub use worker::{AggregateHandle, ExecuteOutcome};
