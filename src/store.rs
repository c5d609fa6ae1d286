//! Event store seam: append and read streams of recorded events.
//!
//! The runtime persists through the [`EventStore`] trait so that the
//! backend (embedded, networked, clustered) is a deployment decision.
//! [`InMemoryEventStore`] is the bundled implementation used by tests
//! and local single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::event::{ProposedEvent, RecordedEvent};

/// Expected stream version for optimistic concurrency on append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Accept any current stream version (no concurrency check).
    Any,
    /// The stream must not exist yet (first write).
    NoStream,
    /// The stream must currently hold exactly this many events.
    Exact(u64),
}

/// Persistent event storage consumed by the runtime.
///
/// The worker appends the events a command produces and reads a stream
/// back when rehydrating state after spawn, hibernation, or a crash.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Append events to a stream, enforcing the expected version.
    ///
    /// Returns the recorded events, in order, with their assigned stream
    /// versions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the stream's current version
    /// does not match `expected`, or [`StoreError::Backend`] for any
    /// backend-specific failure.
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> Result<Vec<RecordedEvent>, StoreError>;

    /// Read a stream's full ordered event history.
    ///
    /// An unknown stream reads as empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] for any backend-specific failure.
    async fn read(&self, stream_id: &str) -> Result<Vec<RecordedEvent>, StoreError>;
}

/// In-memory [`EventStore`] backed by a `HashMap` of streams.
///
/// `Clone` is cheap -- the stream map is `Arc`-wrapped and shared.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<String, Vec<RecordedEvent>>>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events currently recorded in a stream.
    pub async fn stream_len(&self, stream_id: &str) -> u64 {
        let streams = self.streams.read().await;
        streams.get(stream_id).map_or(0, |s| s.len() as u64)
    }
}

/// Current wall-clock time as Unix epoch milliseconds.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> Result<Vec<RecordedEvent>, StoreError> {
        let mut streams = self.streams.write().await;
        let current = streams.get(stream_id).map_or(0, |s| s.len() as u64);

        let conflict = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::NoStream if current == 0 => None,
            ExpectedVersion::NoStream => Some(0),
            ExpectedVersion::Exact(v) if v == current => None,
            ExpectedVersion::Exact(v) => Some(v),
        };
        if let Some(expected) = conflict {
            return Err(StoreError::Conflict {
                stream_id: stream_id.to_string(),
                expected,
                actual: current,
            });
        }

        let recorded_at = now_millis();
        let mut recorded = Vec::with_capacity(events.len());
        for (offset, proposed) in events.into_iter().enumerate() {
            let metadata = serde_json::to_value(&proposed.metadata)
                .map_err(|e| StoreError::Backend(format!("metadata serialization: {e}")))?;
            recorded.push(RecordedEvent {
                event_id: proposed.event_id,
                stream_id: stream_id.to_string(),
                stream_version: current + offset as u64,
                event_type: proposed.event_type,
                payload: proposed.payload,
                metadata,
                recorded_at,
            });
        }
        streams
            .entry(stream_id.to_string())
            .or_default()
            .extend(recorded.iter().cloned());

        tracing::trace!(stream_id, count = recorded.len(), "events appended");
        Ok(recorded)
    }

    async fn read(&self, stream_id: &str) -> Result<Vec<RecordedEvent>, StoreError> {
        let streams = self.streams.read().await;
        Ok(streams.get(stream_id).cloned().unwrap_or_default())
    }
}
