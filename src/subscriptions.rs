//! Consistency tracker: per-subscriber-per-stream acknowledgement ledger.
//!
//! Event consumers acknowledge the stream versions they have processed;
//! dispatchers can then block until a stream has propagated to every
//! required subscriber. The ledger is bounded by periodic purging and
//! acks propagate across trackers through the [`Registration`] broadcast
//! transport, so local-only and cluster-wide deployments share one code
//! path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{ConsistencyError, RegistrationError, WaitError};
use crate::registration::Registration;

/// Registration topic where strong subscribers advertise membership.
pub const SUBSCRIBERS_TOPIC: &str = "subscriptions";

/// Registration topic carrying ack broadcasts.
pub const ACK_TOPIC: &str = "subscription_acks";

/// Default budget for a consistency wait: 5 seconds.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default ack record time-to-live: one hour.
pub const DEFAULT_ACK_TTL: Duration = Duration::from_millis(3_600_000);

/// Which subscribers a consistency query selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consistency {
    /// Do not wait for any subscriber.
    Eventual,
    /// Every currently-registered strong subscriber, evaluated at query
    /// time (not snapshotted at waiter registration).
    Strong,
    /// An explicit list of subscriber names.
    Subscribers(Vec<String>),
}

impl Consistency {
    /// Parse a consistency selector from its JSON representation:
    /// `"eventual"`, `"strong"`, or an array of subscriber names.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::InvalidSpec`] for anything else.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConsistencyError> {
        match value {
            serde_json::Value::String(s) if s == "eventual" => Ok(Consistency::Eventual),
            serde_json::Value::String(s) if s == "strong" => Ok(Consistency::Strong),
            serde_json::Value::Array(items) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(name) if !name.is_empty() => names.push(name.to_string()),
                        _ => return Err(ConsistencyError::InvalidSpec(value.to_string())),
                    }
                }
                Ok(Consistency::Subscribers(names))
            }
            other => Err(ConsistencyError::InvalidSpec(other.to_string())),
        }
    }
}

/// Options for [`Subscriptions::wait_for`].
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Which subscribers must have acked. Defaults to
    /// [`Consistency::Strong`].
    pub consistency: Consistency,
    /// Subscriber names to leave out of the required set, e.g. the
    /// dispatching handler itself.
    pub exclude: Vec<String>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            consistency: Consistency::Strong,
            exclude: Vec::new(),
        }
    }
}

/// Ack broadcast payload exchanged between trackers.
///
/// `origin` identifies the sending tracker so listeners can discard
/// the echo of their own broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AckNotice {
    origin: Uuid,
    name: String,
    stream_id: String,
    version: u64,
}

/// Last acknowledged version for one (subscriber, stream) key.
#[derive(Debug, Clone, Copy)]
struct AckRecord {
    version: u64,
    recorded_at: Instant,
}

/// A caller suspended in `wait_for` until its condition holds.
struct Waiter {
    id: u64,
    stream_id: String,
    version: u64,
    consistency: Consistency,
    exclude: Vec<String>,
    reply: oneshot::Sender<()>,
}

/// Ledger and pending-waiter list, guarded by one mutex so that ack
/// evaluation never reads stale cross-key state.
#[derive(Default)]
struct Ledger {
    acks: HashMap<(String, String), AckRecord>,
    waiters: Vec<Waiter>,
    next_waiter_id: u64,
}

/// Tracks acknowledgements and answers consistency queries.
///
/// `Clone` is cheap -- the ledger is `Arc`-wrapped and shared.
#[derive(Clone)]
pub struct Subscriptions {
    /// Identifies this tracker in ack broadcasts; shared by clones.
    id: Uuid,
    registration: Arc<dyn Registration>,
    ledger: Arc<Mutex<Ledger>>,
    default_timeout: Duration,
    ttl: Duration,
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriptions")
            .field("default_timeout", &self.default_timeout)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Subscriptions {
    /// Create a tracker over a registration backend.
    pub fn new(registration: Arc<dyn Registration>) -> Self {
        Self::with_config(registration, DEFAULT_WAIT_TIMEOUT, DEFAULT_ACK_TTL)
    }

    /// Create a tracker with explicit wait timeout and ack ttl defaults.
    pub fn with_config(
        registration: Arc<dyn Registration>,
        default_timeout: Duration,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            registration,
            ledger: Arc::new(Mutex::new(Ledger::default())),
            default_timeout,
            ttl,
        }
    }

    /// The configured ack record time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a subscriber by name.
    ///
    /// `Eventual` registration is a no-op. `Strong` advertises the name
    /// on the cluster-wide subscriber directory so that
    /// [`Consistency::Strong`] queries include it from now on.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if advertising membership fails.
    pub async fn register(
        &self,
        name: &str,
        consistency: Consistency,
    ) -> Result<(), RegistrationError> {
        match consistency {
            Consistency::Strong => {
                tracing::debug!(name, "registering strong subscriber");
                self.registration.track(SUBSCRIBERS_TOPIC, name).await
            }
            Consistency::Eventual | Consistency::Subscribers(_) => Ok(()),
        }
    }

    /// Record that `name` has processed `stream_id` up to `version`.
    ///
    /// Idempotent and monotonic per (subscriber, stream) key: a version
    /// lower than the recorded one leaves the record in place, though
    /// its purge timestamp is still refreshed. Re-evaluates every
    /// pending waiter on the stream, then broadcasts the ack for remote
    /// trackers.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if the broadcast fails. The local
    /// record is kept either way.
    pub async fn ack(
        &self,
        name: &str,
        stream_id: &str,
        version: u64,
    ) -> Result<(), RegistrationError> {
        self.record_ack(name, stream_id, version).await;

        let notice = AckNotice {
            origin: self.id,
            name: name.to_string(),
            stream_id: stream_id.to_string(),
            version,
        };
        let bytes = serde_json::to_vec(&notice)
            .map_err(|e| RegistrationError::Backend(format!("ack serialization: {e}")))?;
        self.registration.broadcast(ACK_TOPIC, bytes).await
    }

    /// Apply an ack to the ledger and resolve any satisfied waiters.
    async fn record_ack(&self, name: &str, stream_id: &str, version: u64) {
        // Fetch the strong set before taking the ledger lock; waiter
        // evaluation must not await while holding it.
        let strong = self.strong_subscribers().await;

        let mut ledger = self.ledger.lock().await;
        let key = (name.to_string(), stream_id.to_string());
        let record = ledger.acks.entry(key).or_insert(AckRecord {
            version,
            recorded_at: Instant::now(),
        });
        record.version = record.version.max(version);
        record.recorded_at = Instant::now();

        tracing::trace!(name, stream_id, version, "ack recorded");

        // Resolve satisfied waiters and sweep waiters whose caller
        // disappeared. Each waiter resolves at most once; removal here
        // is what makes the ack win over a concurrent timeout.
        let Ledger { acks, waiters, .. } = &mut *ledger;
        let mut kept = Vec::with_capacity(waiters.len());
        for waiter in waiters.drain(..) {
            if waiter.reply.is_closed() {
                continue;
            }
            let satisfied = waiter.stream_id == stream_id
                && check_handled(
                    acks,
                    &waiter.stream_id,
                    waiter.version,
                    &waiter.consistency,
                    &waiter.exclude,
                    &strong,
                );
            if satisfied {
                let _ = waiter.reply.send(());
            } else {
                kept.push(waiter);
            }
        }
        *waiters = kept;
    }

    /// Has `stream_id` reached `version` for every selected subscriber?
    ///
    /// Subscribers in `exclude` are left out of the required set. An
    /// empty eligible set is vacuously true; `Eventual` selects nobody.
    /// The `Strong` selector reads the subscriber directory at query
    /// time.
    pub async fn handled_by_all(
        &self,
        stream_id: &str,
        version: u64,
        consistency: &Consistency,
        exclude: &[String],
    ) -> bool {
        let strong = self.strong_subscribers().await;
        let ledger = self.ledger.lock().await;
        check_handled(&ledger.acks, stream_id, version, consistency, exclude, &strong)
    }

    /// Suspend until `stream_id` has reached `version` for the selected
    /// subscribers, or until the timeout budget elapses.
    ///
    /// Resolves immediately when the condition already holds (and
    /// always for `Eventual`). Otherwise a pending waiter is registered
    /// and resolved exactly once: `Ok` by the ack that completes the
    /// required set, or `Err(Timeout)` when the budget lapses. On the
    /// race between a timeout and a concurrent satisfying ack,
    /// whichever side takes the ledger lock first wins; a timed-out
    /// waiter that finds itself already resolved returns `Ok`.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Wait budget; `None` uses the configured default
    ///   (5000 ms unless overridden).
    ///
    /// # Errors
    ///
    /// [`WaitError::Timeout`] when the budget elapses first.
    pub async fn wait_for(
        &self,
        stream_id: &str,
        version: u64,
        opts: WaitOptions,
        timeout: Option<Duration>,
    ) -> Result<(), WaitError> {
        if opts.consistency == Consistency::Eventual {
            return Ok(());
        }

        let strong = self.strong_subscribers().await;
        let (waiter_id, rx) = {
            let mut ledger = self.ledger.lock().await;
            if check_handled(
                &ledger.acks,
                stream_id,
                version,
                &opts.consistency,
                &opts.exclude,
                &strong,
            ) {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            let id = ledger.next_waiter_id;
            ledger.next_waiter_id += 1;
            ledger.waiters.push(Waiter {
                id,
                stream_id: stream_id.to_string(),
                version,
                consistency: opts.consistency,
                exclude: opts.exclude,
                reply: tx,
            });
            (id, rx)
        };

        let budget = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(budget, rx).await {
            // A satisfying ack resolved us.
            Ok(Ok(())) => Ok(()),
            // The waiter was discarded without resolution (reset).
            Ok(Err(_dropped)) => Err(WaitError::Timeout),
            Err(_elapsed) => {
                // Compare-and-remove under the ledger lock: if the
                // waiter is still pending we own the timeout; if an ack
                // already removed it, the ack won.
                let mut ledger = self.ledger.lock().await;
                if let Some(pos) = ledger.waiters.iter().position(|w| w.id == waiter_id) {
                    ledger.waiters.remove(pos);
                    tracing::debug!(stream_id, version, "consistency wait timed out");
                    Err(WaitError::Timeout)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Drop every ack record older than `ttl`, bounding ledger growth.
    ///
    /// Also sweeps waiters whose caller has disappeared. Run
    /// periodically by the runtime; callable directly for tests and
    /// administration.
    pub async fn purge(&self, ttl: Duration) {
        let now = Instant::now();
        let mut ledger = self.ledger.lock().await;
        let before = ledger.acks.len();
        ledger
            .acks
            .retain(|_, record| now.duration_since(record.recorded_at) <= ttl);
        let purged = before - ledger.acks.len();
        ledger.waiters.retain(|w| !w.reply.is_closed());
        if purged > 0 {
            tracing::debug!(purged, remaining = ledger.acks.len(), "ack ledger purged");
        }
    }

    /// Clear the entire ledger and pending-waiter set.
    ///
    /// Administrative/test-only. Pending waiters resolve as timed out.
    pub async fn reset(&self) {
        let mut ledger = self.ledger.lock().await;
        ledger.acks.clear();
        ledger.waiters.clear();
        tracing::debug!("subscriptions tracker reset");
    }

    /// Number of waiters currently pending resolution.
    pub async fn pending_waiters(&self) -> usize {
        self.ledger.lock().await.waiters.len()
    }

    /// Spawn the background task that applies acks broadcast by other
    /// trackers on the same registration backend.
    ///
    /// Remote acks are recorded without rebroadcasting, so propagation
    /// cannot loop. Echoes of this tracker's own broadcasts are
    /// discarded -- re-applying them would refresh the record's purge
    /// timestamp on every delivery.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if subscribing to the ack topic fails.
    pub(crate) async fn start_listener(&self) -> Result<JoinHandle<()>, RegistrationError> {
        let mut rx = self.registration.subscribe(ACK_TOPIC).await?;
        let tracker = self.clone();
        Ok(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(bytes) => match serde_json::from_slice::<AckNotice>(&bytes) {
                        Ok(notice) => {
                            if notice.origin != tracker.id {
                                tracker
                                    .record_ack(&notice.name, &notice.stream_id, notice.version)
                                    .await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "discarding malformed ack broadcast");
                        }
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "ack listener lagged behind broadcasts");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Current strong subscriber names from the registration backend.
    ///
    /// A discovery failure logs and selects nobody; for the bundled
    /// local backend discovery is infallible.
    async fn strong_subscribers(&self) -> Vec<String> {
        match self.registration.list(SUBSCRIBERS_TOPIC).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "strong subscriber discovery failed");
                Vec::new()
            }
        }
    }
}

/// Evaluate the consistency condition against the ack ledger.
fn check_handled(
    acks: &HashMap<(String, String), AckRecord>,
    stream_id: &str,
    version: u64,
    consistency: &Consistency,
    exclude: &[String],
    strong: &[String],
) -> bool {
    let eligible: Vec<&String> = match consistency {
        Consistency::Eventual => return true,
        Consistency::Strong => strong.iter().collect(),
        Consistency::Subscribers(names) => names.iter().collect(),
    };
    eligible
        .into_iter()
        .filter(|name| !exclude.contains(name))
        .all(|name| {
            acks.get(&(name.clone(), stream_id.to_string()))
                .is_some_and(|record| record.version >= version)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::LocalRegistration;
    use serde_json::json;

    fn tracker() -> Subscriptions {
        Subscriptions::new(Arc::new(LocalRegistration::new()))
    }

    // --- selector parsing ---

    #[test]
    fn parse_eventual_and_strong() {
        assert_eq!(
            Consistency::from_json(&json!("eventual")).unwrap(),
            Consistency::Eventual
        );
        assert_eq!(
            Consistency::from_json(&json!("strong")).unwrap(),
            Consistency::Strong
        );
    }

    #[test]
    fn parse_name_list() {
        let parsed = Consistency::from_json(&json!(["a", "b"])).unwrap();
        assert_eq!(
            parsed,
            Consistency::Subscribers(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn parse_invalid_selector_is_rejected() {
        for bad in [json!("sorta-strong"), json!(42), json!([1, 2]), json!({})] {
            let result = Consistency::from_json(&bad);
            assert!(
                matches!(result, Err(ConsistencyError::InvalidSpec(_))),
                "expected InvalidSpec for {bad}, got: {result:?}"
            );
        }
    }

    // --- handled_by_all ---

    #[tokio::test]
    async fn empty_eligible_set_is_vacuously_true() {
        let tracker = tracker();
        assert!(
            tracker
                .handled_by_all("orders-1", 3, &Consistency::Strong, &[])
                .await,
            "no strong subscribers registered, so the condition holds"
        );
    }

    #[tokio::test]
    async fn strong_requires_every_registered_subscriber() {
        let tracker = tracker();
        tracker
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");
        tracker
            .register("B", Consistency::Strong)
            .await
            .expect("register should succeed");

        assert!(
            !tracker
                .handled_by_all("orders-1", 3, &Consistency::Strong, &[])
                .await
        );

        tracker.ack("A", "orders-1", 3).await.expect("ack should succeed");
        assert!(
            !tracker
                .handled_by_all("orders-1", 3, &Consistency::Strong, &[])
                .await,
            "B has not acked yet"
        );

        tracker.ack("B", "orders-1", 3).await.expect("ack should succeed");
        assert!(
            tracker
                .handled_by_all("orders-1", 3, &Consistency::Strong, &[])
                .await
        );
        // Stays true for any version at or below the acked one.
        for version in 0..=3 {
            assert!(
                tracker
                    .handled_by_all("orders-1", version, &Consistency::Strong, &[])
                    .await
            );
        }
        assert!(
            !tracker
                .handled_by_all("orders-1", 4, &Consistency::Strong, &[])
                .await
        );
    }

    #[tokio::test]
    async fn eventual_registration_is_a_noop() {
        let tracker = tracker();
        tracker
            .register("E", Consistency::Eventual)
            .await
            .expect("register should succeed");

        // E never joined the strong set, so it does not gate anything.
        assert!(
            tracker
                .handled_by_all("orders-1", 1, &Consistency::Strong, &[])
                .await
        );
    }

    #[tokio::test]
    async fn exclude_removes_subscriber_from_required_set() {
        let tracker = tracker();
        tracker
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");
        tracker
            .register("B", Consistency::Strong)
            .await
            .expect("register should succeed");
        tracker.ack("A", "orders-1", 2).await.expect("ack should succeed");

        assert!(
            tracker
                .handled_by_all("orders-1", 2, &Consistency::Strong, &["B".to_string()])
                .await,
            "excluding B leaves only A, which has acked"
        );
    }

    #[tokio::test]
    async fn named_selector_ignores_strong_directory() {
        let tracker = tracker();
        tracker
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");
        tracker.ack("C", "orders-1", 1).await.expect("ack should succeed");

        let named = Consistency::Subscribers(vec!["C".to_string()]);
        assert!(tracker.handled_by_all("orders-1", 1, &named, &[]).await);
    }

    #[tokio::test]
    async fn acks_are_monotonic_per_key() {
        let tracker = tracker();
        tracker.ack("A", "orders-1", 5).await.expect("ack should succeed");
        // A stale lower ack must not regress the record.
        tracker.ack("A", "orders-1", 3).await.expect("ack should succeed");

        let named = Consistency::Subscribers(vec!["A".to_string()]);
        assert!(tracker.handled_by_all("orders-1", 5, &named, &[]).await);
    }

    #[tokio::test]
    async fn acks_are_independent_across_streams() {
        let tracker = tracker();
        tracker.ack("A", "orders-1", 7).await.expect("ack should succeed");

        let named = Consistency::Subscribers(vec!["A".to_string()]);
        assert!(!tracker.handled_by_all("orders-2", 1, &named, &[]).await);
    }

    // --- wait_for ---

    #[tokio::test]
    async fn wait_for_eventual_returns_immediately() {
        let tracker = tracker();
        let opts = WaitOptions {
            consistency: Consistency::Eventual,
            exclude: Vec::new(),
        };
        tracker
            .wait_for("orders-1", 99, opts, Some(Duration::from_millis(1)))
            .await
            .expect("eventual wait should resolve immediately");
    }

    #[tokio::test]
    async fn wait_for_already_satisfied_resolves_without_pending_waiter() {
        let tracker = tracker();
        tracker
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");
        tracker.ack("A", "orders-1", 3).await.expect("ack should succeed");

        tracker
            .wait_for("orders-1", 3, WaitOptions::default(), None)
            .await
            .expect("satisfied wait should resolve immediately");
        assert_eq!(tracker.pending_waiters().await, 0);
    }

    #[tokio::test]
    async fn wait_for_resolves_when_last_subscriber_acks() {
        let tracker = tracker();
        tracker
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");
        tracker
            .register("B", Consistency::Strong)
            .await
            .expect("register should succeed");
        tracker.ack("A", "orders-1", 3).await.expect("ack should succeed");

        let waiting = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker
                    .wait_for("orders-1", 3, WaitOptions::default(), Some(Duration::from_secs(5)))
                    .await
            })
        };

        // Give the waiter time to register as pending.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tracker.pending_waiters().await, 1);

        tracker.ack("B", "orders-1", 3).await.expect("ack should succeed");

        let result = waiting.await.expect("wait task should not panic");
        assert_eq!(result, Ok(()), "wait should resolve at the moment B acks");
        assert_eq!(tracker.pending_waiters().await, 0);
    }

    #[tokio::test]
    async fn wait_for_times_out_and_removes_waiter() {
        let tracker = tracker();
        tracker
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");

        let result = tracker
            .wait_for(
                "orders-1",
                3,
                WaitOptions::default(),
                Some(Duration::from_millis(50)),
            )
            .await;
        assert_eq!(result, Err(WaitError::Timeout));
        assert_eq!(
            tracker.pending_waiters().await,
            0,
            "timed-out waiter must be removed from the pending set"
        );

        // Repeated waits must not grow the pending set.
        for _ in 0..3 {
            let _ = tracker
                .wait_for(
                    "orders-1",
                    3,
                    WaitOptions::default(),
                    Some(Duration::from_millis(10)),
                )
                .await;
        }
        assert_eq!(tracker.pending_waiters().await, 0);
    }

    #[tokio::test]
    async fn wait_for_ignores_acks_below_target_version() {
        let tracker = tracker();
        tracker
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");

        let waiting = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker
                    .wait_for(
                        "orders-1",
                        3,
                        WaitOptions::default(),
                        Some(Duration::from_millis(200)),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        tracker.ack("A", "orders-1", 2).await.expect("ack should succeed");
        assert_eq!(
            tracker.pending_waiters().await,
            1,
            "an ack below the target version must not resolve the waiter"
        );

        let result = waiting.await.expect("wait task should not panic");
        assert_eq!(result, Err(WaitError::Timeout));
    }

    #[tokio::test]
    async fn abandoned_waiters_are_swept() {
        let tracker = tracker();
        tracker
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");

        // A caller that gives up (task aborted) leaves a closed reply
        // channel behind.
        let abandoned = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let _ = tracker
                    .wait_for("orders-1", 3, WaitOptions::default(), Some(Duration::from_secs(60)))
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tracker.pending_waiters().await, 1);
        abandoned.abort();
        let _ = abandoned.await;

        // Either an ack pass or a purge pass detects the closed channel.
        tracker.purge(DEFAULT_ACK_TTL).await;
        assert_eq!(tracker.pending_waiters().await, 0);
    }

    // --- purge / reset ---

    #[tokio::test(start_paused = true)]
    async fn purge_expires_records_older_than_ttl() {
        let tracker = tracker();
        tracker
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");
        tracker.ack("A", "orders-1", 3).await.expect("ack should succeed");

        // Not yet expired.
        tokio::time::advance(Duration::from_millis(1_800_000)).await;
        tracker.purge(DEFAULT_ACK_TTL).await;
        assert!(
            tracker
                .handled_by_all("orders-1", 3, &Consistency::Strong, &[])
                .await
        );

        // Now past the ttl.
        tokio::time::advance(Duration::from_millis(2_000_000)).await;
        tracker.purge(DEFAULT_ACK_TTL).await;
        assert!(
            !tracker
                .handled_by_all("orders-1", 3, &Consistency::Strong, &[])
                .await,
            "after purge the subscriber counts as never having acked"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_ack_refreshes_purge_timestamp() {
        let tracker = tracker();
        tracker.ack("A", "orders-1", 1).await.expect("ack should succeed");

        tokio::time::advance(Duration::from_millis(3_000_000)).await;
        tracker.ack("A", "orders-1", 2).await.expect("ack should succeed");

        // First ack is 3000s old but the record was refreshed at 3000s.
        tokio::time::advance(Duration::from_millis(1_000_000)).await;
        tracker.purge(DEFAULT_ACK_TTL).await;

        let named = Consistency::Subscribers(vec!["A".to_string()]);
        assert!(
            tracker.handled_by_all("orders-1", 2, &named, &[]).await,
            "refreshed record should survive the purge"
        );
    }

    #[tokio::test]
    async fn reset_clears_ledger_and_waiters() {
        let tracker = tracker();
        tracker
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");
        tracker.ack("A", "orders-1", 3).await.expect("ack should succeed");

        let waiting = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker
                    .wait_for("orders-1", 9, WaitOptions::default(), Some(Duration::from_secs(60)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        tracker.reset().await;
        assert_eq!(tracker.pending_waiters().await, 0);
        assert!(
            !tracker
                .handled_by_all("orders-1", 3, &Consistency::Strong, &[])
                .await
        );

        let result = waiting.await.expect("wait task should not panic");
        assert_eq!(result, Err(WaitError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn own_broadcast_echo_does_not_refresh_purge_timestamp() {
        let tracker = tracker();
        let _listener = tracker
            .start_listener()
            .await
            .expect("listener should start");
        tracker
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");
        tracker.ack("A", "orders-1", 3).await.expect("ack should succeed");

        // Move past the ttl, then let the listener drain the broadcast
        // queue before purging. If the tracker re-applied its own echo
        // it would re-stamp the record now and the purge would keep it.
        tokio::time::advance(DEFAULT_ACK_TTL + Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        tracker.purge(DEFAULT_ACK_TTL).await;

        assert!(
            !tracker
                .handled_by_all("orders-1", 3, &Consistency::Strong, &[])
                .await,
            "an expired record must not survive via the tracker's own echo"
        );
    }

    // --- cross-tracker propagation ---

    #[tokio::test]
    async fn remote_acks_propagate_through_broadcast() {
        let registration: Arc<LocalRegistration> = Arc::new(LocalRegistration::new());
        let local = Subscriptions::new(registration.clone());
        let remote = Subscriptions::new(registration);

        let _listener = local
            .start_listener()
            .await
            .expect("listener should start");

        local
            .register("A", Consistency::Strong)
            .await
            .expect("register should succeed");

        let waiting = {
            let local = local.clone();
            tokio::spawn(async move {
                local
                    .wait_for("orders-1", 3, WaitOptions::default(), Some(Duration::from_secs(5)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The ack lands on a different tracker instance sharing the
        // registration backend.
        remote.ack("A", "orders-1", 3).await.expect("ack should succeed");

        let result = waiting.await.expect("wait task should not panic");
        assert_eq!(result, Ok(()), "broadcast ack should resolve the local waiter");
    }
}
