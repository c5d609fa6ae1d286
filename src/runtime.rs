//! Top-level entry point that composes the registry, the consistency
//! tracker, and their backends into a single [`Runtime`] type.
//!
//! The runtime is opened via [`RuntimeBuilder`], which collects the
//! event store, the registration backend, per-type lifespan policies,
//! and timing configuration, then starts the background ack listener
//! and ledger purge tasks.

use std::any::TypeId;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::aggregate::Aggregate;
use crate::error::{RegistrationError, StartError};
use crate::lifespan::LifespanPolicy;
use crate::registration::{LocalRegistration, Registration};
use crate::registry::{AggregateRegistry, PolicyMap};
use crate::store::{EventStore, InMemoryEventStore};
use crate::subscriptions::{DEFAULT_ACK_TTL, DEFAULT_WAIT_TIMEOUT, Subscriptions};
use crate::worker::AggregateHandle;

/// Default idle timeout for workers: 5 minutes.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Background tasks owned by the runtime; aborted when the last clone
/// of the runtime is dropped.
struct BackgroundTasks(Vec<JoinHandle<()>>);

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// The runtime core: per-identity aggregate workers plus the
/// consistency tracker.
///
/// `Clone` is cheap -- all internal state is `Arc`-wrapped.
#[derive(Clone)]
pub struct Runtime {
    registry: AggregateRegistry,
    subscriptions: Subscriptions,
    _tasks: Arc<BackgroundTasks>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("registry", &self.registry)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

impl Runtime {
    /// Get a handle to an aggregate worker, spawning it if needed.
    ///
    /// Delegates to [`AggregateRegistry::ensure_started`]: creation
    /// races collapse to a single worker and a dead worker is replaced
    /// by a fresh one rehydrated from the event store.
    ///
    /// # Errors
    ///
    /// * [`StartError::UnsupportedIdentity`] -- the identity is empty.
    /// * [`StartError::Store`] -- rehydration from the event store failed.
    pub async fn aggregate<A>(&self, identity: &str) -> Result<AggregateHandle<A>, StartError>
    where
        A: Aggregate,
        A::Command: Clone,
    {
        self.registry.ensure_started::<A>(identity).await
    }

    /// The worker registry.
    pub fn registry(&self) -> &AggregateRegistry {
        &self.registry
    }

    /// The consistency tracker.
    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }
}

/// Builder for configuring and opening a [`Runtime`].
///
/// Collects configuration -- event store, registration backend,
/// lifespan policies, idle and wait timeouts, ledger ttl -- then wires
/// everything together on [`build`](RuntimeBuilder::build).
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use aggregate_runtime::RuntimeBuilder;
///
/// # async fn example() -> Result<(), aggregate_runtime::RegistrationError> {
/// let runtime = RuntimeBuilder::new()
///     .idle_timeout(Duration::from_secs(60))
///     .wait_timeout(Duration::from_secs(10))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct RuntimeBuilder {
    store: Option<Arc<dyn EventStore>>,
    registration: Option<Arc<dyn Registration>>,
    policies: PolicyMap,
    idle_timeout: Duration,
    wait_timeout: Duration,
    ack_ttl: Duration,
    purge_interval: Duration,
}

impl RuntimeBuilder {
    /// Create a builder with default configuration.
    ///
    /// Without further calls, [`build`](RuntimeBuilder::build) produces
    /// a runtime over an [`InMemoryEventStore`] and a
    /// [`LocalRegistration`] backend.
    pub fn new() -> Self {
        Self {
            store: None,
            registration: None,
            policies: PolicyMap::new(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            ack_ttl: DEFAULT_ACK_TTL,
            purge_interval: DEFAULT_ACK_TTL,
        }
    }

    /// Set the event store backend.
    pub fn event_store(mut self, store: impl EventStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the registration backend (membership directory and ack
    /// broadcast transport).
    pub fn registration(mut self, registration: impl Registration) -> Self {
        self.registration = Some(Arc::new(registration));
        self
    }

    /// Register a lifespan policy for aggregate type `A`.
    ///
    /// Types without a registered policy use
    /// [`DefaultLifespan`](crate::DefaultLifespan).
    pub fn lifespan<A: Aggregate>(mut self, policy: impl LifespanPolicy<A>) -> Self {
        self.policies.insert(
            TypeId::of::<A>(),
            Box::new(Arc::new(policy) as Arc<dyn LifespanPolicy<A>>),
        );
        self
    }

    /// Set the idle timeout for worker eviction.
    ///
    /// Workers that receive no messages for this duration shut down;
    /// the next access transparently re-spawns them from the event
    /// store. A lifespan decision replaces this per outcome.
    ///
    /// Defaults to 5 minutes.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the default budget for consistency waits.
    ///
    /// Overridable per call in
    /// [`Subscriptions::wait_for`](crate::Subscriptions::wait_for).
    /// Defaults to 5 seconds.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set the ack record time-to-live used by the periodic purge.
    ///
    /// Defaults to one hour.
    pub fn ack_ttl(mut self, ttl: Duration) -> Self {
        self.ack_ttl = ttl;
        self
    }

    /// Set how often the background purge pass runs.
    ///
    /// Defaults to the ack ttl.
    pub fn purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    /// Wire everything together and start the background tasks.
    ///
    /// Starts the ack broadcast listener and the periodic ledger purge.
    /// Both stop when the last clone of the runtime is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if subscribing to the ack topic on
    /// the registration backend fails.
    pub async fn build(self) -> Result<Runtime, RegistrationError> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryEventStore::new()));
        let registration = self
            .registration
            .unwrap_or_else(|| Arc::new(LocalRegistration::new()));

        let registry = AggregateRegistry::new(
            Arc::clone(&store),
            Arc::new(self.policies),
            self.idle_timeout,
        );
        let subscriptions = Subscriptions::with_config(
            Arc::clone(&registration),
            self.wait_timeout,
            self.ack_ttl,
        );

        let listener = subscriptions.start_listener().await?;

        let purge_task = {
            let tracker = subscriptions.clone();
            let ttl = self.ack_ttl;
            let mut ticker = tokio::time::interval(self.purge_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tokio::spawn(async move {
                // The first tick completes immediately; skip it so the
                // first purge runs a full interval after startup.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    tracker.purge(ttl).await;
                }
            })
        };

        Ok(Runtime {
            registry,
            subscriptions,
            _tasks: Arc::new(BackgroundTasks(vec![listener, purge_task])),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
