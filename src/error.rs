//! Crate-level error types for worker startup, command execution, and
//! consistency waits.

/// Error returned by the [`EventStore`](crate::EventStore) seam.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The stream's current version did not match the expected version.
    #[error("version conflict on stream '{stream_id}': expected {expected}, actual {actual}")]
    Conflict {
        /// Stream the append targeted.
        stream_id: String,
        /// Version the writer expected.
        expected: u64,
        /// Version the stream actually held.
        actual: u64,
    },

    /// Backend-specific failure (connection, disk, serialization).
    #[error("event store backend error: {0}")]
    Backend(String),
}

/// Error returned when starting (or finding) an aggregate worker fails.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The identity key is malformed. Identities must be non-empty strings.
    #[error("unsupported aggregate identity: {0:?}")]
    UnsupportedIdentity(String),

    /// Rehydrating the worker's state from the event store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error returned when executing a command against an aggregate fails.
///
/// Generic over `E`, the domain-specific error type that the aggregate's
/// command handler may produce (e.g., "insufficient funds").
///
/// # Type Parameters
///
/// * `E` - Domain error type, must implement `Error + Send + Sync + 'static`
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E: std::error::Error + Send + Sync + 'static> {
    /// Command rejected by aggregate logic.
    ///
    /// Wraps the domain-specific error returned from the aggregate's
    /// command handler, forwarding its `Display` and `Error` impls.
    /// The runtime does not interpret or retry these.
    #[error(transparent)]
    Domain(E),

    /// The stream moved underneath the worker's expected version.
    ///
    /// Only possible when another writer shares the stream; the worker
    /// itself is the sole writer for any identity it owns.
    #[error("optimistic concurrency conflict: {0}")]
    Conflict(StoreError),

    /// Event store failure while persisting or rehydrating.
    #[error(transparent)]
    Store(StoreError),

    /// The worker terminated while the command was in flight.
    ///
    /// Covers idle shutdown, a `Stop` lifespan decision, and crashes.
    /// The next registry access spawns a fresh worker; retrying is the
    /// dispatcher's decision, not the runtime's.
    #[error("aggregate worker is no longer running")]
    WorkerGone,

    /// The caller-supplied execution timeout elapsed before the worker
    /// replied. The command may still complete inside the worker.
    #[error("command execution timed out")]
    Timeout,
}

impl<E: std::error::Error + Send + Sync + 'static> From<StoreError> for ExecuteError<E> {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => ExecuteError::Conflict(err),
            StoreError::Backend(_) => ExecuteError::Store(err),
        }
    }
}

/// Error returned when reading the current state of an aggregate fails.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Event store failure while rehydrating.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The worker terminated before replying.
    #[error("aggregate worker is no longer running")]
    WorkerGone,
}

/// Error returned by the [`Registration`](crate::Registration) seam.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistrationError {
    /// Transport-specific failure (network partition, backend down).
    #[error("registration backend error: {0}")]
    Backend(String),
}

/// Error returned by [`Subscriptions::wait_for`](crate::Subscriptions::wait_for).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The wait budget elapsed before every required subscriber acked.
    /// Recoverable; the waiter has been removed and the ledger is
    /// untouched.
    #[error("timed out waiting for subscribers to acknowledge")]
    Timeout,
}

/// Error returned when a consistency selector cannot be parsed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConsistencyError {
    /// Not `"eventual"`, `"strong"`, or a list of subscriber names.
    #[error("invalid consistency spec: {0}")]
    InvalidSpec(String),
}
