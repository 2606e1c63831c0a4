//! # Wire Messages
//!
//! JSON records exchanged between the server and peer roles. Each record
//! travels in its own length-delimited frame (see [`super::codec`]).

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::pipeline::TaskResult;

/// Asks the server to run one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StartRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary_input_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_source_ref: Option<String>,
}

/// A peer's secondary judgment on a delivered result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AugmentedResult {
    pub original: TaskResult,
    pub note: String,
}

/// Session-level failure reported instead of results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorNotice {
    pub error: String,
}

impl ErrorNotice {
    pub const RETRIEVAL_FAILED: &'static str = "retrieval-failed";
    pub const ARTIFACT_UNAVAILABLE: &'static str = "artifact-unavailable";
    pub const MALFORMED_REQUEST: &'static str = "malformed-request";
    pub const SESSION_BUSY: &'static str = "session-busy";

    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

/// Records a peer may send to the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PeerMessage {
    Augmented(AugmentedResult),
    Start(StartRequest),
}

/// Records the server sends to a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Result(TaskResult),
    Notice(ErrorNotice),
}

/// Every record is a JSON object; arrays and scalars are rejected up front
fn object(frame: &[u8]) -> Result<serde_json::Value, ProtocolError> {
    let value: serde_json::Value = serde_json::from_slice(frame)?;
    if !value.is_object() {
        return Err(ProtocolError::Malformed(serde::de::Error::custom(
            "expected a JSON object",
        )));
    }
    Ok(value)
}

impl PeerMessage {
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_value(object(frame)?)?)
    }
}

impl ServerMessage {
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_value(object(frame)?)?)
    }
}
