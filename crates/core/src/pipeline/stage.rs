//! # Pipeline Stages
//!
//! Defines the stages of the inspection pipeline and the state machine that
//! moves a session through them.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::result::{skip, Outcome};

/// Stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    /// Reasoning about a human-supplied subject name
    Identify,
    /// Static inspection of the artifact
    Inspect,
    /// Bounded dynamic probing
    Probe,
    /// Payload document synthesis and publication
    Synthesize,
}

impl PipelineStage {
    /// Fixed execution order
    pub const ORDER: [PipelineStage; 4] = [
        PipelineStage::Identify,
        PipelineStage::Inspect,
        PipelineStage::Probe,
        PipelineStage::Synthesize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Identify => "identify",
            PipelineStage::Inspect => "inspect",
            PipelineStage::Probe => "probe",
            PipelineStage::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pipeline state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Identify,
    Inspect,
    Probe,
    Synthesize,
    Terminated,
}

impl PipelineState {
    /// Stage executed in this state, `None` once terminated
    pub fn stage(self) -> Option<PipelineStage> {
        match self {
            PipelineState::Identify => Some(PipelineStage::Identify),
            PipelineState::Inspect => Some(PipelineStage::Inspect),
            PipelineState::Probe => Some(PipelineStage::Probe),
            PipelineState::Synthesize => Some(PipelineStage::Synthesize),
            PipelineState::Terminated => None,
        }
    }

    /// Transition after the current stage produced `last`.
    ///
    /// - Synthesize is always the last step: a non-null payload ends the
    ///   pipeline, and so does a skip, failure or null result since nothing
    ///   follows it.
    /// - A `no-artifact` skip ends the pipeline; the remaining stages are unreachable.
    pub fn next(self, last: &Outcome) -> PipelineState {
        match (self, last) {
            (PipelineState::Terminated, _) | (PipelineState::Synthesize, _) => {
                PipelineState::Terminated
            }
            (_, Outcome::Skipped(reason)) if reason == skip::NO_ARTIFACT => {
                PipelineState::Terminated
            }
            (PipelineState::Identify, _) => PipelineState::Inspect,
            (PipelineState::Inspect, _) => PipelineState::Probe,
            (PipelineState::Probe, _) => PipelineState::Synthesize,
        }
    }

    /// Transition past a stage that is disabled and produced nothing
    pub fn pass(self) -> PipelineState {
        match self {
            PipelineState::Identify => PipelineState::Inspect,
            PipelineState::Inspect => PipelineState::Probe,
            PipelineState::Probe => PipelineState::Synthesize,
            PipelineState::Synthesize | PipelineState::Terminated => PipelineState::Terminated,
        }
    }

    pub fn is_terminated(self) -> bool {
        self == PipelineState::Terminated
    }
}
