//! Registry that guarantees at most one live worker per aggregate identity.
//!
//! The directory maps `(aggregate type, identity)` to a type-erased
//! worker handle. Creation happens under the directory write lock so
//! concurrent first-access calls for the same identity converge to a
//! single worker. A monitor task per worker removes the directory entry
//! when the worker terminates -- graceful stop, idle shutdown, or panic
//! -- so the next access spawns a fresh worker rehydrated from the
//! event store.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;

use crate::aggregate::Aggregate;
use crate::error::StartError;
use crate::lifespan::{DefaultLifespan, LifespanPolicy};
use crate::store::EventStore;
use crate::worker::{AggregateHandle, WorkerConfig, spawn_worker};

/// Type-erased lifespan policy map keyed by aggregate `TypeId`.
///
/// Each value is a `Box<Arc<dyn LifespanPolicy<A>>>` for its concrete
/// `A`; downcasting recovers the typed policy.
pub(crate) type PolicyMap = HashMap<TypeId, Box<dyn Any + Send + Sync>>;

/// A directory entry: the type-erased handle plus the epoch of the
/// spawn that created it.
///
/// The epoch lets a worker's monitor remove exactly its own entry. If a
/// fresh worker has already replaced the entry, the stale monitor must
/// leave it alone.
struct DirectoryEntry {
    handle: Box<dyn Any + Send + Sync>,
    epoch: u64,
}

/// Directory keyed by `(TypeId, identity)`.
///
/// `TypeId` identifies the aggregate type at runtime; the `String` is
/// the identity. `Box<dyn Any + Send + Sync>` lets a single map hold
/// `AggregateHandle<A>` for any concrete `A`.
type WorkerDirectory = HashMap<(TypeId, String), DirectoryEntry>;

/// Creates and finds aggregate workers by identity.
///
/// `Clone` is cheap -- all internal state is `Arc`-wrapped.
#[derive(Clone)]
pub struct AggregateRegistry {
    store: Arc<dyn EventStore>,
    directory: Arc<RwLock<WorkerDirectory>>,
    policies: Arc<PolicyMap>,
    idle_timeout: Duration,
    next_epoch: Arc<AtomicU64>,
}

// Manual `Debug` because `dyn Any` is not `Debug` and we don't want to
// expose directory internals.
impl std::fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateRegistry")
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl AggregateRegistry {
    /// Create a registry over an event store with the given per-type
    /// lifespan policies and default idle timeout.
    pub(crate) fn new(
        store: Arc<dyn EventStore>,
        policies: Arc<PolicyMap>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            store,
            directory: Arc::new(RwLock::new(HashMap::new())),
            policies,
            idle_timeout,
            next_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get a handle to an aggregate worker, spawning it if needed.
    ///
    /// If the worker is already running, returns a clone of the
    /// existing handle -- including when another caller won a
    /// concurrent creation race (`AlreadyStarted` is collapsed into
    /// success, never surfaced). Otherwise spawns a worker under the
    /// directory write lock and registers a monitor that removes the
    /// entry once the worker terminates.
    ///
    /// # Arguments
    ///
    /// * `identity` - Unique identity within the aggregate type. Must
    ///   be a non-empty string.
    ///
    /// # Errors
    ///
    /// * [`StartError::UnsupportedIdentity`] -- the identity is empty.
    /// * [`StartError::Store`] -- rehydration from the event store failed.
    pub async fn ensure_started<A>(&self, identity: &str) -> Result<AggregateHandle<A>, StartError>
    where
        A: Aggregate,
        A::Command: Clone,
    {
        if identity.is_empty() {
            return Err(StartError::UnsupportedIdentity(identity.to_string()));
        }
        let key = (TypeId::of::<A>(), identity.to_owned());

        // Fast path: check the directory with a read lock.
        {
            let directory = self.directory.read().await;
            if let Some(entry) = directory.get(&key)
                && let Some(handle) = entry.handle.downcast_ref::<AggregateHandle<A>>()
                && handle.is_alive()
            {
                return Ok(handle.clone());
            }
        }

        // Slow path: take the write lock and re-check, then spawn while
        // still holding it. Whichever concurrent caller gets the lock
        // first creates the worker; the rest find it here.
        let mut directory = self.directory.write().await;
        if let Some(entry) = directory.get(&key)
            && let Some(handle) = entry.handle.downcast_ref::<AggregateHandle<A>>()
            && handle.is_alive()
        {
            return Ok(handle.clone());
        }
        directory.remove(&key);

        tracing::debug!(
            aggregate_type = A::AGGREGATE_TYPE,
            identity,
            "spawning worker"
        );

        let (handle, task) = spawn_worker::<A>(
            identity,
            Arc::clone(&self.store),
            self.policy::<A>(),
            WorkerConfig {
                idle_timeout: self.idle_timeout,
            },
        )
        .await?;

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        directory.insert(
            key.clone(),
            DirectoryEntry {
                handle: Box::new(handle.clone()),
                epoch,
            },
        );
        drop(directory);

        // Monitor: remove the directory entry when the worker task
        // completes, however it terminated. Panics inside the worker
        // task surface here as a JoinError and stay confined to this
        // identity's fault domain.
        let directory = Arc::clone(&self.directory);
        tokio::spawn(async move {
            let result = task.await;
            if let Err(join_err) = result
                && join_err.is_panic()
            {
                tracing::error!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    identity = %key.1,
                    "worker crashed"
                );
            }
            let mut directory = directory.write().await;
            if directory.get(&key).is_some_and(|entry| entry.epoch == epoch) {
                directory.remove(&key);
                tracing::debug!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    identity = %key.1,
                    "worker terminated, directory entry removed"
                );
            }
        });

        Ok(handle)
    }

    /// Number of directory entries (live or not-yet-reaped workers).
    pub async fn len(&self) -> usize {
        self.directory.read().await.len()
    }

    /// Whether the directory holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.directory.read().await.is_empty()
    }

    /// Resolve the lifespan policy registered for `A`, defaulting to
    /// [`DefaultLifespan`].
    fn policy<A: Aggregate>(&self) -> Arc<dyn LifespanPolicy<A>> {
        self.policies
            .get(&TypeId::of::<A>())
            .and_then(|boxed| boxed.downcast_ref::<Arc<dyn LifespanPolicy<A>>>())
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::new(DefaultLifespan))
    }
}
