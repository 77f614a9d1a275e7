use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Pipeline component that produced an [`AgentMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validator,
    Analyzer,
    Retriever,
    Researcher,
    Writer,
    Reviewer,
    Orchestrator,
    Followup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validator => "Input Validator",
            Stage::Analyzer => "Query Analyzer",
            Stage::Retriever => "Retriever",
            Stage::Researcher => "Researcher",
            Stage::Writer => "Writer",
            Stage::Reviewer => "Reviewer",
            Stage::Orchestrator => "Orchestrator",
            Stage::Followup => "Follow-up",
        };
        f.write_str(name)
    }
}

/// Outcome class of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Partial,
    Failed,
}

/// Uniform result envelope passed between pipeline stages.
///
/// A message only counts as successful when its status is
/// [`Status::Success`] *and* it carries a payload; read the payload through
/// [`AgentMessage::data`] which enforces that rule.
///
/// ```
/// use localeats::message::{AgentMessage, Stage, Status};
/// let ok = AgentMessage::success(Stage::Validator, "pizza".to_string(), 0.95);
/// assert!(ok.is_successful());
/// let failed: AgentMessage<String> = AgentMessage::failed(Stage::Validator);
/// assert!(failed.data().is_none());
/// assert_eq!(failed.status, Status::Failed);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct AgentMessage<T> {
    pub source: Stage,
    pub status: Status,
    pub payload: Option<T>,
    /// Heuristic strength of the result in `[0, 1]`.
    pub confidence: f32,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl<T> AgentMessage<T> {
    pub fn new(source: Stage, status: Status, payload: Option<T>, confidence: f32) -> Self {
        Self {
            source,
            status,
            payload,
            confidence: confidence.clamp(0.0, 1.0),
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn success(source: Stage, payload: T, confidence: f32) -> Self {
        Self::new(source, Status::Success, Some(payload), confidence)
    }

    pub fn failed(source: Stage) -> Self {
        Self::new(source, Status::Failed, None, 0.0)
    }

    /// Attach a diagnostic key to the message.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_successful(&self) -> bool {
        self.status == Status::Success && self.payload.is_some()
    }

    /// Payload of a successful message, `None` otherwise.
    pub fn data(&self) -> Option<&T> {
        if self.status == Status::Success {
            self.payload.as_ref()
        } else {
            None
        }
    }

    /// Metadata value as a string slice, if present and textual.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn meta_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_with_payload_is_not_successful() {
        let msg = AgentMessage::new(Stage::Reviewer, Status::Partial, Some(3), 0.7);
        assert!(!msg.is_successful());
        assert!(msg.data().is_none());
    }

    #[test]
    fn success_without_payload_is_not_successful() {
        let msg: AgentMessage<u8> = AgentMessage::new(Stage::Writer, Status::Success, None, 0.9);
        assert!(!msg.is_successful());
    }

    #[test]
    fn confidence_is_clamped() {
        let msg = AgentMessage::success(Stage::Retriever, (), 3.0);
        assert_eq!(msg.confidence, 1.0);
    }

    #[test]
    fn metadata_helpers() {
        let msg: AgentMessage<()> = AgentMessage::failed(Stage::Researcher)
            .with("filters_too_strict", true)
            .with("reason", "no_rows");
        assert!(msg.meta_flag("filters_too_strict"));
        assert_eq!(msg.meta_str("reason"), Some("no_rows"));
        assert!(!msg.meta_flag("missing"));
    }
}
