//! # Task Results
//!
//! The unit of protocol exchange: one record per executed stage.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::stage::PipelineStage;

/// Skip reasons emitted by the coordinator
pub mod skip {
    pub const NO_SUBJECT: &str = "no-subject";
    pub const NO_ARTIFACT: &str = "no-artifact";
    pub const PLATFORM_UNSUPPORTED: &str = "platform-unsupported";
}

/// What a stage produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Completed; `None` means "ran, found nothing"
    Ok(Option<String>),
    /// Not applicable to this session
    Skipped(String),
    /// Internal error caught at the stage boundary
    Failed(String),
}

impl Outcome {
    pub fn skipped(reason: &str) -> Self {
        Outcome::Skipped(reason.to_string())
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Ok(_) => OutcomeKind::Ok,
            Outcome::Skipped(_) => OutcomeKind::Skipped,
            Outcome::Failed(_) => OutcomeKind::Failed,
        }
    }

    pub fn payload(&self) -> Option<&str> {
        match self {
            Outcome::Ok(payload) => payload.as_deref(),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Skipped(reason) | Outcome::Failed(reason) => Some(reason),
            Outcome::Ok(_) => None,
        }
    }

    /// `Ok` with a payload
    pub fn has_payload(&self) -> bool {
        self.payload().is_some()
    }
}

/// Wire tag of an [`Outcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Ok,
    Skipped,
    Failed,
}

/// One stage record, numbered within its session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireTaskResult", from = "WireTaskResult")]
pub struct TaskResult {
    pub stage: PipelineStage,
    pub outcome: Outcome,
    /// Position in the session's result stream, starting at 0
    pub seq: u64,
    /// Session the record belongs to
    pub session: Option<String>,
}

impl TaskResult {
    pub fn new(stage: PipelineStage, outcome: Outcome, seq: u64) -> Self {
        Self {
            stage,
            outcome,
            seq,
            session: None,
        }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Ok(Some(payload)) => write!(f, "[{}] {}: {}", self.seq, self.stage, payload),
            Outcome::Ok(None) => write!(f, "[{}] {}: no result", self.seq, self.stage),
            Outcome::Skipped(reason) => write!(f, "[{}] {}: skipped ({})", self.seq, self.stage, reason),
            Outcome::Failed(reason) => write!(f, "[{}] {}: failed ({})", self.seq, self.stage, reason),
        }
    }
}

/// Flat JSON shape: `{stage, outcome, payload, reason?, seq, session?}`
#[derive(Serialize, Deserialize)]
struct WireTaskResult {
    stage: PipelineStage,
    outcome: OutcomeKind,
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session: Option<String>,
}

impl From<TaskResult> for WireTaskResult {
    fn from(result: TaskResult) -> Self {
        let (outcome, payload, reason) = match result.outcome {
            Outcome::Ok(payload) => (OutcomeKind::Ok, payload, None),
            Outcome::Skipped(reason) => (OutcomeKind::Skipped, None, Some(reason)),
            Outcome::Failed(reason) => (OutcomeKind::Failed, None, Some(reason)),
        };
        Self {
            stage: result.stage,
            outcome,
            payload,
            reason,
            seq: result.seq,
            session: result.session,
        }
    }
}

impl From<WireTaskResult> for TaskResult {
    fn from(wire: WireTaskResult) -> Self {
        let reason = || wire.reason.clone().unwrap_or_else(|| "unspecified".to_string());
        let outcome = match wire.outcome {
            OutcomeKind::Ok => Outcome::Ok(wire.payload.clone()),
            OutcomeKind::Skipped => Outcome::Skipped(reason()),
            OutcomeKind::Failed => Outcome::Failed(reason()),
        };
        Self {
            stage: wire.stage,
            outcome,
            seq: wire.seq,
            session: wire.session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_null_payload_is_explicit() {
        let result = TaskResult::new(PipelineStage::Probe, Outcome::Ok(None), 2);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({ "stage": "probe", "outcome": "ok", "payload": null, "seq": 2 })
        );
    }

    #[test]
    fn test_skipped_carries_reason() {
        let result = TaskResult::new(
            PipelineStage::Probe,
            Outcome::skipped(skip::PLATFORM_UNSUPPORTED),
            1,
        )
        .with_session("s-1");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["outcome"], "skipped");
        assert_eq!(value["reason"], "platform-unsupported");
        assert_eq!(value["payload"], serde_json::Value::Null);
        assert_eq!(value["session"], "s-1");
    }

    #[test]
    fn test_parse_from_peer_json() {
        let result: TaskResult = serde_json::from_value(json!({
            "stage": "synthesize",
            "outcome": "ok",
            "payload": "sha256:abc",
            "seq": 3
        }))
        .unwrap();
        assert_eq!(result.stage, PipelineStage::Synthesize);
        assert_eq!(result.outcome.payload(), Some("sha256:abc"));
        assert_eq!(result.session, None);
    }

    #[test]
    fn test_unknown_outcome_rejected() {
        let parsed: Result<TaskResult, _> = serde_json::from_value(json!({
            "stage": "probe", "outcome": "maybe", "payload": null, "seq": 0
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_display() {
        let result = TaskResult::new(
            PipelineStage::Inspect,
            Outcome::Failed("read error".to_string()),
            1,
        );
        assert_eq!(result.to_string(), "[1] inspect: failed (read error)");
    }
}
