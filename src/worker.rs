//! Worker loop that owns an aggregate identity and processes commands.
//!
//! Each worker runs as its own tokio task and sequentially processes
//! messages from an `mpsc` mailbox. It exclusively owns the in-memory
//! aggregate state and stream version; nothing else writes to the
//! stream while the worker is alive. After every command outcome the
//! worker consults its [`LifespanPolicy`]; an explicit decision
//! reprograms the idle timer, no decision leaves the current timer --
//! by default the configured idle timeout -- in force.
//!
//! Public API: [`AggregateHandle`] (cloneable async handle) and
//! [`ExecuteOutcome`] (version + events returned from a command).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::aggregate::Aggregate;
use crate::command::CommandContext;
use crate::error::{ExecuteError, StateError, StoreError};
use crate::event::{decode_domain_event, encode_domain_event, stream_id};
use crate::lifespan::{Lifespan, LifespanPolicy};
use crate::store::{EventStore, ExpectedVersion};

/// Mailbox capacity per worker.
const MAILBOX_CAPACITY: usize = 32;

/// Configuration for the worker loop.
///
/// Internal to the crate -- callers configure the idle timeout through
/// [`RuntimeBuilder::idle_timeout`](crate::RuntimeBuilder::idle_timeout).
pub(crate) struct WorkerConfig {
    /// How long the worker waits for a message before shutting down,
    /// unless a lifespan decision has replaced it.
    pub idle_timeout: Duration,
}

/// Successful result of executing a command.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome<A: Aggregate> {
    /// Stream version after the produced events were persisted.
    pub version: u64,
    /// The domain events the command produced (possibly empty).
    pub events: Vec<A::DomainEvent>,
}

/// Result type sent back through the `Execute` reply channel.
type ExecuteResult<A> = Result<ExecuteOutcome<A>, ExecuteError<<A as Aggregate>::Error>>;

/// Messages sent from `AggregateHandle` to the worker loop.
///
/// Each variant carries a `oneshot::Sender` for the worker to reply on
/// once the operation completes.
pub(crate) enum WorkerMessage<A: Aggregate> {
    /// Execute a command against the aggregate.
    Execute {
        /// The domain command to execute.
        cmd: A::Command,
        /// Cross-cutting metadata (actor identity, correlation ID, etc.).
        ctx: CommandContext,
        /// Channel to send back the outcome or an error.
        reply: oneshot::Sender<ExecuteResult<A>>,
    },

    /// Retrieve the current aggregate state and version.
    GetState {
        /// Channel to send back a clone of the current state or an error.
        reply: oneshot::Sender<Result<(A, u64), StateError>>,
    },

    /// Gracefully shut down the worker loop.
    Shutdown,
}

/// Exclusive owner of one aggregate identity's state and version.
struct Worker<A: Aggregate> {
    identity: String,
    stream: String,
    store: Arc<dyn EventStore>,
    lifespan: Arc<dyn LifespanPolicy<A>>,
    /// `None` while hibernated; rehydrated from the store on demand.
    state: Option<A>,
    /// Count of events persisted to the stream. Never decreases.
    version: u64,
    /// Current idle deadline; `None` means the worker never idles out.
    idle: Option<Duration>,
}

impl<A: Aggregate> Worker<A>
where
    A::Command: Clone,
{
    /// Main loop: wait for the next message within the idle budget,
    /// process it, apply the resulting lifespan decision.
    async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage<A>>) {
        loop {
            let msg = match self.idle {
                Some(idle) => match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(msg) => msg,
                    // Idle timeout elapsed with no messages.
                    Err(_elapsed) => {
                        tracing::info!(
                            aggregate_type = A::AGGREGATE_TYPE,
                            identity = %self.identity,
                            "worker idle, shutting down"
                        );
                        break;
                    }
                },
                None => rx.recv().await,
            };

            match msg {
                Some(WorkerMessage::Execute { cmd, ctx, reply }) => {
                    let span = tracing::info_span!(
                        "execute",
                        aggregate_type = A::AGGREGATE_TYPE,
                        identity = %self.identity,
                    );
                    let (result, decision) = self.execute(cmd, &ctx).instrument(span).await;
                    // If the receiver was dropped, the caller no longer cares
                    // about the result. Silently discard it.
                    let _ = reply.send(result);

                    match decision {
                        Some(Lifespan::After(duration)) => self.idle = Some(duration),
                        Some(Lifespan::Infinity) => self.idle = None,
                        // Hibernation compacts state but leaves the idle
                        // timer untouched, so eviction still applies.
                        Some(Lifespan::Hibernate) => {
                            tracing::debug!(
                                aggregate_type = A::AGGREGATE_TYPE,
                                identity = %self.identity,
                                "worker hibernating"
                            );
                            self.state = None;
                        }
                        Some(Lifespan::Stop) => {
                            tracing::debug!(
                                aggregate_type = A::AGGREGATE_TYPE,
                                identity = %self.identity,
                                "lifespan requested stop"
                            );
                            break;
                        }
                        // No policy opinion, or the outcome never reached
                        // the handler: keep the current timer.
                        None => {}
                    }
                }

                Some(WorkerMessage::GetState { reply }) => {
                    // Clone out of the rehydration borrow before reading
                    // the version.
                    let state = self.resident_state().await.map(A::clone);
                    let result = state
                        .map(|state| (state, self.version))
                        .map_err(StateError::Store);
                    let _ = reply.send(result);
                }

                // Explicit shutdown, or channel closed: all senders dropped.
                Some(WorkerMessage::Shutdown) | None => break,
            }
        }
        // Loop exited: Shutdown received, channel closed, idle timeout,
        // or a Stop decision. The registry's monitor removes the
        // directory entry once this task completes.
    }

    /// Execute a single command: ensure state is resident, run the
    /// handler, persist produced events, fold them into state.
    ///
    /// Returns the execution result plus the lifespan decision for this
    /// outcome (`None` when the policy has no opinion, or when the
    /// outcome never reached the handler, e.g. a store failure during
    /// rehydration).
    async fn execute(
        &mut self,
        cmd: A::Command,
        ctx: &CommandContext,
    ) -> (ExecuteResult<A>, Option<Lifespan>) {
        // 1. Make sure state is resident (first command after spawn or
        //    hibernation rehydrates from the event store).
        let state = match self.resident_state().await {
            Ok(state) => state.clone(),
            Err(e) => return (Err(e.into()), None),
        };

        // 2. Decide: run the command handler against current state.
        let domain_events = match state.handle(cmd.clone()) {
            Ok(events) => events,
            Err(e) => {
                let decision = self.lifespan.after_error(&e);
                return (Err(ExecuteError::Domain(e)), decision);
            }
        };

        // 3. No-op commands produce no events and persist nothing.
        let Some(last) = domain_events.last().cloned() else {
            let decision = self.lifespan.after_command(&cmd);
            return (
                Ok(ExecuteOutcome {
                    version: self.version,
                    events: domain_events,
                }),
                decision,
            );
        };

        // 4. Encode and append with the exact expected version. The
        //    worker is the sole writer, so a conflict means an external
        //    writer touched the stream.
        let mut proposed = Vec::with_capacity(domain_events.len());
        for event in &domain_events {
            match encode_domain_event::<A>(event, ctx, &self.identity) {
                Ok(p) => proposed.push(p),
                Err(e) => {
                    let err = StoreError::Backend(format!("event serialization: {e}"));
                    return (Err(ExecuteError::Store(err)), None);
                }
            }
        }
        let recorded = match self
            .store
            .append(&self.stream, ExpectedVersion::Exact(self.version), proposed)
            .await
        {
            Ok(recorded) => recorded,
            Err(e) => return (Err(e.into()), None),
        };

        // 5. Fold the events into state; the version advances by the
        //    number of events persisted.
        let next = domain_events
            .iter()
            .fold(state, |state, event| state.apply(event));
        self.state = Some(next);
        self.version += recorded.len() as u64;

        tracing::debug!(count = recorded.len(), version = self.version, "events appended");

        let decision = self.lifespan.after_event(&last);
        (
            Ok(ExecuteOutcome {
                version: self.version,
                events: domain_events,
            }),
            decision,
        )
    }

    /// Return the resident state, rehydrating from the event store if
    /// the worker is freshly spawned or hibernated.
    async fn resident_state(&mut self) -> Result<&A, StoreError> {
        if self.state.is_none() {
            let recorded = self.store.read(&self.stream).await?;
            // Version counts every recorded event; unknown event types
            // are skipped by the fold but still occupy a version slot.
            self.version = recorded.len() as u64;
            let state = recorded
                .iter()
                .filter_map(decode_domain_event::<A>)
                .fold(A::default(), |state, event| state.apply(&event));
            tracing::debug!(
                aggregate_type = A::AGGREGATE_TYPE,
                identity = %self.identity,
                version = self.version,
                "rehydrated from event store"
            );
            self.state = Some(state);
        }
        // Resident by construction above.
        Ok(self.state.as_ref().unwrap_or_else(|| unreachable!()))
    }
}

/// Async handle to a running aggregate worker.
///
/// Lightweight, cloneable, and `Send + Sync`. Communicates with the
/// worker task over a bounded channel.
///
/// # Type Parameters
///
/// * `A` - The [`Aggregate`] type this handle controls.
#[derive(Debug)]
pub struct AggregateHandle<A: Aggregate> {
    sender: mpsc::Sender<WorkerMessage<A>>,
}

// Manual `Clone` because `A` itself need not be `Clone` for the handle --
// we only clone the `Sender`, which is always `Clone` regardless of `A`.
impl<A: Aggregate> Clone for AggregateHandle<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<A: Aggregate> AggregateHandle<A> {
    /// Send a command to the aggregate and wait for the result.
    ///
    /// # Arguments
    ///
    /// * `cmd` - The domain command to execute against the aggregate.
    /// * `ctx` - Cross-cutting metadata (actor identity, correlation ID, etc.).
    ///
    /// # Returns
    ///
    /// The stream version after execution and the domain events produced.
    ///
    /// # Errors
    ///
    /// * [`ExecuteError::Domain`] -- the aggregate rejected the command.
    /// * [`ExecuteError::Conflict`] -- an external writer moved the stream.
    /// * [`ExecuteError::Store`] -- the event store failed.
    /// * [`ExecuteError::WorkerGone`] -- the worker task has exited.
    pub async fn execute(
        &self,
        cmd: A::Command,
        ctx: CommandContext,
    ) -> Result<ExecuteOutcome<A>, ExecuteError<A::Error>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerMessage::Execute {
                cmd,
                ctx,
                reply: tx,
            })
            .await
            .map_err(|_| ExecuteError::WorkerGone)?;
        rx.await.map_err(|_| ExecuteError::WorkerGone)?
    }

    /// Send a command and wait at most `timeout` for the result.
    ///
    /// On timeout the command may still complete inside the worker;
    /// only the caller stops waiting. Retrying is the dispatcher's
    /// decision.
    ///
    /// # Errors
    ///
    /// [`ExecuteError::Timeout`] when the budget elapses; otherwise the
    /// same errors as [`execute`](AggregateHandle::execute).
    pub async fn execute_timeout(
        &self,
        cmd: A::Command,
        ctx: CommandContext,
        timeout: Duration,
    ) -> Result<ExecuteOutcome<A>, ExecuteError<A::Error>> {
        tokio::time::timeout(timeout, self.execute(cmd, ctx))
            .await
            .map_err(|_elapsed| ExecuteError::Timeout)?
    }

    /// Read the current aggregate state and stream version.
    ///
    /// Rehydrates from the event store first if the worker is hibernated.
    ///
    /// # Errors
    ///
    /// * [`StateError::Store`] -- rehydration from the event store failed.
    /// * [`StateError::WorkerGone`] -- the worker task has exited.
    pub async fn state(&self) -> Result<(A, u64), StateError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerMessage::GetState { reply: tx })
            .await
            .map_err(|_| StateError::WorkerGone)?;
        rx.await.map_err(|_| StateError::WorkerGone)?
    }

    /// Ask the worker to shut down gracefully.
    ///
    /// Best-effort: a worker that already exited is not an error.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(WorkerMessage::Shutdown).await;
    }

    /// Check whether the worker backing this handle is still running.
    ///
    /// Returns `false` if the worker task has exited (idle timeout, a
    /// `Stop` lifespan decision, shutdown, or a crash). The registry
    /// uses this to evict stale handles and re-spawn on next access.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Spawn a new aggregate worker for `identity`.
///
/// Rehydrates state from the event store before the first message is
/// accepted, then runs the worker loop on its own tokio task. The
/// returned [`JoinHandle`] completes when the worker terminates for any
/// reason and is used by the registry to remove the directory entry.
///
/// # Errors
///
/// Returns [`StoreError`] if the initial read from the event store fails.
pub(crate) async fn spawn_worker<A>(
    identity: &str,
    store: Arc<dyn EventStore>,
    lifespan: Arc<dyn LifespanPolicy<A>>,
    config: WorkerConfig,
) -> Result<(AggregateHandle<A>, JoinHandle<()>), StoreError>
where
    A: Aggregate,
    A::Command: Clone,
{
    let mut worker = Worker {
        identity: identity.to_string(),
        stream: stream_id(A::AGGREGATE_TYPE, identity),
        store,
        lifespan,
        state: None,
        version: 0,
        idle: Some(config.idle_timeout),
    };
    // Rehydrate eagerly so startup surfaces store failures to the
    // caller instead of to the first command.
    worker.resident_state().await?;

    let (tx, rx) = mpsc::channel::<WorkerMessage<A>>(MAILBOX_CAPACITY);
    let task = tokio::spawn(worker.run(rx));

    Ok((AggregateHandle { sender: tx }, task))
}
