//! Registration seam: membership directory and ack broadcast transport.
//!
//! The consistency tracker advertises strong subscribers and propagates
//! acknowledgements through this trait so that local-only and
//! cluster-wide deployments are interchangeable. [`LocalRegistration`]
//! is the bundled in-process implementation; a clustered backend plugs
//! in behind the same trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use crate::error::RegistrationError;

/// Broadcast channel capacity per topic.
const TOPIC_CAPACITY: usize = 256;

/// Membership tracking and broadcast transport.
///
/// Messages are opaque bytes; callers own the serialization format.
#[async_trait]
pub trait Registration: Send + Sync + 'static {
    /// Advertise `name` as a member of `topic`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Backend`] if the transport fails.
    async fn track(&self, topic: &str, name: &str) -> Result<(), RegistrationError>;

    /// List the current members of `topic`, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Backend`] if the transport fails.
    async fn list(&self, topic: &str) -> Result<Vec<String>, RegistrationError>;

    /// Subscribe to messages broadcast on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Backend`] if the transport fails.
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<broadcast::Receiver<Vec<u8>>, RegistrationError>;

    /// Broadcast `message` to every subscriber of `topic`.
    ///
    /// A topic with no subscribers is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Backend`] if the transport fails.
    async fn broadcast(&self, topic: &str, message: Vec<u8>) -> Result<(), RegistrationError>;
}

/// Per-topic state: ordered membership plus the broadcast channel.
struct Topic {
    members: Vec<String>,
    channel: broadcast::Sender<Vec<u8>>,
}

impl Default for Topic {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            channel: broadcast::channel(TOPIC_CAPACITY).0,
        }
    }
}

/// In-process [`Registration`] backed by tokio broadcast channels.
///
/// Suitable for single-node deployments and tests. `Clone` is cheap --
/// the topic map is `Arc`-wrapped and shared.
#[derive(Clone, Default)]
pub struct LocalRegistration {
    topics: Arc<RwLock<HashMap<String, Topic>>>,
}

impl LocalRegistration {
    /// Create an empty registration backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for LocalRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRegistration").finish()
    }
}

#[async_trait]
impl Registration for LocalRegistration {
    async fn track(&self, topic: &str, name: &str) -> Result<(), RegistrationError> {
        let mut topics = self.topics.write().await;
        let topic = topics.entry(topic.to_string()).or_default();
        if !topic.members.iter().any(|m| m == name) {
            topic.members.push(name.to_string());
        }
        Ok(())
    }

    async fn list(&self, topic: &str) -> Result<Vec<String>, RegistrationError> {
        let topics = self.topics.read().await;
        Ok(topics.get(topic).map(|t| t.members.clone()).unwrap_or_default())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<broadcast::Receiver<Vec<u8>>, RegistrationError> {
        let mut topics = self.topics.write().await;
        Ok(topics.entry(topic.to_string()).or_default().channel.subscribe())
    }

    async fn broadcast(&self, topic: &str, message: Vec<u8>) -> Result<(), RegistrationError> {
        let topics = self.topics.read().await;
        if let Some(topic) = topics.get(topic) {
            // A send error only means there are no receivers right now.
            let _ = topic.channel.send(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn track_is_idempotent_and_ordered() {
        let reg = LocalRegistration::new();
        reg.track("subscribers", "a").await.expect("track should succeed");
        reg.track("subscribers", "b").await.expect("track should succeed");
        reg.track("subscribers", "a").await.expect("track should succeed");

        let members = reg.list("subscribers").await.expect("list should succeed");
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn list_unknown_topic_is_empty() {
        let reg = LocalRegistration::new();
        let members = reg.list("missing").await.expect("list should succeed");
        assert!(members.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let reg = LocalRegistration::new();
        let mut rx = reg.subscribe("acks").await.expect("subscribe should succeed");

        reg.broadcast("acks", b"hello".to_vec())
            .await
            .expect("broadcast should succeed");

        let msg = rx.recv().await.expect("recv should succeed");
        assert_eq!(msg, b"hello".to_vec());
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_not_an_error() {
        let reg = LocalRegistration::new();
        reg.broadcast("acks", b"nobody home".to_vec())
            .await
            .expect("broadcast to empty topic should succeed");
    }
}
