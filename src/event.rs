//! Event encoding, decoding, and shared types for the event store seam.
//!
//! This module provides the foundational data types and pure functions that
//! the worker, registry, and subscriptions modules all depend on. No I/O
//! occurs here.

use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::command::CommandContext;

/// Derive the stream ID for an aggregate identity.
///
/// Streams are addressed by `"{aggregate_type}-{identity}"`, so the same
/// aggregate identity always maps to the same stream regardless of which
/// process performs the mapping.
///
/// # Examples
///
/// ```
/// use aggregate_runtime::stream_id;
/// assert_eq!(stream_id("order", "o-1"), "order-o-1");
/// ```
pub fn stream_id(aggregate_type: &str, identity: &str) -> String {
    format!("{aggregate_type}-{identity}")
}

/// Infrastructure metadata stamped on every event written by the runtime.
///
/// The `aggregate_type` and `identity` fields make each event
/// self-describing, so downstream consumers can recover the aggregate
/// identity without an external directory.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EventMetadata {
    /// Aggregate type name (e.g., "counter").
    pub aggregate_type: String,
    /// Aggregate identity (e.g., "c-1").
    pub identity: String,
    /// Actor identity from the command context, if provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Correlation ID from the command context, if provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// An event proposed for appending to a stream.
///
/// Produced by [`encode_domain_event`] before the event is handed to the
/// store. Contains typed fields so callers can inspect or transform the
/// event before persisting.
#[derive(Debug, Clone)]
pub struct ProposedEvent {
    /// Newly generated UUID v4 event ID.
    pub event_id: Uuid,
    /// Event type tag extracted from the adjacently-tagged domain event.
    pub event_type: String,
    /// JSON payload (the `"data"` portion of the adjacently-tagged enum).
    pub payload: serde_json::Value,
    /// Infrastructure metadata to stamp on the event.
    pub metadata: EventMetadata,
}

/// An event as recorded in a stream.
///
/// Carries its position within the stream (`stream_version`, zero-based)
/// and the wall-clock time the store recorded it.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    /// Client-assigned event ID.
    pub event_id: Uuid,
    /// Stream the event belongs to.
    pub stream_id: String,
    /// Zero-based version within the stream.
    pub stream_version: u64,
    /// Event type tag (e.g., "Incremented").
    pub event_type: String,
    /// JSON payload (the domain event data).
    pub payload: serde_json::Value,
    /// JSON metadata (actor, correlation_id, etc.).
    pub metadata: serde_json::Value,
    /// Store-assigned timestamp (Unix epoch milliseconds).
    pub recorded_at: u64,
}

/// Encode a domain event into a [`ProposedEvent`] ready for the store.
///
/// Serializes the adjacently-tagged domain event (`#[serde(tag = "type", content = "data")]`),
/// extracts the `"type"` and `"data"` fields, builds [`EventMetadata`] from the
/// command context and aggregate identity, and generates a fresh UUID v4 event ID.
///
/// # Errors
///
/// Returns `serde_json::Error` if the domain event cannot be serialized,
/// or does not serialize to a tagged JSON object.
pub fn encode_domain_event<A: Aggregate>(
    event: &A::DomainEvent,
    ctx: &CommandContext,
    identity: &str,
) -> serde_json::Result<ProposedEvent> {
    use serde::ser::Error as _;

    // Serialize the adjacently-tagged domain event. This produces JSON like:
    //   {"type": "Incremented"}           (unit variant)
    //   {"type": "Added", "data": {...}}  (variant with fields)
    let value = serde_json::to_value(event)?;
    let obj = value.as_object().ok_or_else(|| {
        serde_json::Error::custom("domain event must serialize to a tagged JSON object")
    })?;

    let event_type = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| serde_json::Error::custom("domain event must have a string 'type' tag"))?
        .to_string();

    // The "data" field is absent for unit variants.
    let payload = obj.get("data").cloned().unwrap_or(serde_json::Value::Null);

    let metadata = EventMetadata {
        aggregate_type: A::AGGREGATE_TYPE.to_string(),
        identity: identity.to_string(),
        actor: ctx.actor.clone(),
        correlation_id: ctx.correlation_id.clone(),
    };

    Ok(ProposedEvent {
        event_id: Uuid::new_v4(),
        event_type,
        payload,
        metadata,
    })
}

/// Decode a [`RecordedEvent`] back into a domain event.
///
/// Reconstructs the adjacently-tagged JSON object from the stored
/// `event_type` and `payload`, then deserializes it into `A::DomainEvent`.
/// Returns `None` for unknown or malformed events so that folds skip them
/// for forward compatibility.
pub fn decode_domain_event<A: Aggregate>(recorded: &RecordedEvent) -> Option<A::DomainEvent> {
    let tagged = if recorded.payload.is_null() {
        serde_json::json!({ "type": recorded.event_type })
    } else {
        serde_json::json!({
            "type": recorded.event_type,
            "data": recorded.payload,
        })
    };
    serde_json::from_value::<A::DomainEvent>(tagged).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::{Counter, CounterEvent};

    #[test]
    fn stream_id_is_deterministic() {
        assert_eq!(stream_id("counter", "c-1"), stream_id("counter", "c-1"));
    }

    #[test]
    fn stream_id_differs_by_identity_and_type() {
        assert_ne!(stream_id("counter", "c-1"), stream_id("counter", "c-2"));
        assert_ne!(stream_id("counter", "c-1"), stream_id("order", "c-1"));
    }

    #[test]
    fn encode_fieldless_variant_has_null_payload() {
        let proposed = encode_domain_event::<Counter>(
            &CounterEvent::Incremented,
            &CommandContext::default(),
            "c-1",
        )
        .expect("encode should succeed");

        assert_eq!(proposed.event_type, "Incremented");
        assert!(proposed.payload.is_null());
        assert_eq!(proposed.metadata.aggregate_type, "counter");
        assert_eq!(proposed.metadata.identity, "c-1");
        assert_eq!(
            proposed.event_id.get_version(),
            Some(uuid::Version::Random),
            "event_id should be UUID v4"
        );
    }

    #[test]
    fn encode_variant_with_data_includes_payload() {
        let proposed = encode_domain_event::<Counter>(
            &CounterEvent::Added { amount: 42 },
            &CommandContext::default(),
            "c-1",
        )
        .expect("encode should succeed");

        assert_eq!(proposed.event_type, "Added");
        assert_eq!(proposed.payload["amount"], 42);
    }

    #[test]
    fn encode_propagates_context_fields() {
        let ctx = CommandContext::default()
            .with_actor("u1")
            .with_correlation_id("corr-1");
        let proposed = encode_domain_event::<Counter>(&CounterEvent::Incremented, &ctx, "c-1")
            .expect("encode should succeed");

        assert_eq!(proposed.metadata.actor.as_deref(), Some("u1"));
        assert_eq!(proposed.metadata.correlation_id.as_deref(), Some("corr-1"));
    }

    #[test]
    fn metadata_skips_none_fields_in_serialization() {
        let meta = EventMetadata {
            aggregate_type: "counter".to_string(),
            identity: "c-1".to_string(),
            actor: None,
            correlation_id: None,
        };
        let json = serde_json::to_string(&meta).expect("serialize should succeed");
        assert!(!json.contains("actor"), "actor should be omitted when None");
        assert!(
            !json.contains("correlation_id"),
            "correlation_id should be omitted when None"
        );
    }

    fn recorded(event_type: &str, payload: serde_json::Value) -> RecordedEvent {
        RecordedEvent {
            event_id: Uuid::new_v4(),
            stream_id: stream_id("counter", "c-1"),
            stream_version: 0,
            event_type: event_type.to_string(),
            payload,
            metadata: serde_json::Value::Null,
            recorded_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn decode_roundtrips_encoded_event() {
        let proposed = encode_domain_event::<Counter>(
            &CounterEvent::Added { amount: 5 },
            &CommandContext::default(),
            "c-1",
        )
        .expect("encode should succeed");

        let stored = recorded(&proposed.event_type, proposed.payload);
        let decoded = decode_domain_event::<Counter>(&stored).expect("decode should succeed");
        assert_eq!(decoded, CounterEvent::Added { amount: 5 });
    }

    #[test]
    fn decode_unknown_event_type_returns_none() {
        let stored = recorded("UnknownType", serde_json::json!({}));
        assert!(decode_domain_event::<Counter>(&stored).is_none());
    }
}
