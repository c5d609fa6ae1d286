//! Command context passed alongside every command.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cross-cutting metadata travelling with a single command execution.
///
/// Nothing here influences validation -- the aggregate's handler never
/// sees it. The fields are stamped into the metadata of every event the
/// command produces, giving downstream consumers an audit and
/// correlation trail without widening the `Command` types themselves.
///
/// # Examples
///
/// ```
/// use aggregate_runtime::CommandContext;
/// use serde_json::json;
///
/// let ctx = CommandContext::default()
///     .with_actor("user-42")
///     .with_correlation_id("req-abc-123")
///     .with_metadata(json!({"source": "api"}));
///
/// assert_eq!(ctx.actor.as_deref(), Some("user-42"));
/// assert_eq!(ctx.correlation_id.as_deref(), Some("req-abc-123"));
/// assert!(ctx.metadata.is_some());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandContext {
    /// Identity of the actor issuing the command (e.g. a user ID).
    pub actor: Option<String>,
    /// Correlation ID for tracing a request across aggregates.
    pub correlation_id: Option<String>,
    /// Arbitrary metadata forwarded onto produced events.
    pub metadata: Option<Value>,
}

impl CommandContext {
    /// Set who issued the command (a user id, a service name).
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the id correlating this command with the wider request that
    /// triggered it.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Attach free-form metadata to forward onto produced events.
    pub fn with_metadata(mut self, meta: Value) -> Self {
        self.metadata = Some(meta);
        self
    }
}
