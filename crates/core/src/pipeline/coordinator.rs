//! # Pipeline Coordinator
//!
//! Drives one session through `Identify → Inspect → Probe → Synthesize`.
//!
//! - Applicability gates turn inapplicable stages into `Skipped` records
//!   without calling the executor.
//! - Each executor runs in its own task. Errors and panics become `Failed`
//!   records; nothing a stage does can abort the loop.
//! - Records are sent to the sink as soon as they exist, in order.
//! - The artifact is released on every exit path before the session is
//!   marked terminated.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::result::{skip, Outcome, TaskResult};
use super::session::Session;
use super::stage::{PipelineStage, PipelineState};
use crate::artifact::{Artifact, Classification};
use crate::config::{StageToggles, StagehandConfig};
use crate::services::Services;
use crate::stages::{StageInput, StageSet};

/// Per-session inputs that do not come from the artifact
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub subject_name: Option<String>,
    pub auxiliary_ref: Option<String>,
}

#[derive(Clone)]
pub struct Coordinator {
    stages: StageSet,
    toggles: StageToggles,
}

impl Coordinator {
    pub fn new(stages: StageSet, toggles: StageToggles) -> Self {
        Self { stages, toggles }
    }

    pub fn from_config(config: &StagehandConfig, services: &Services) -> Self {
        Self::new(StageSet::from_config(config, services), config.stages)
    }

    /// Run a fresh session to completion.
    ///
    /// Returns once the session is terminated: either the pipeline finished, or
    /// `cancel` fired, or `sink` was closed. In every case the artifact has
    /// been released and any running stage has been torn down.
    pub async fn run(
        &self,
        request: SessionRequest,
        artifact: Option<Artifact>,
        sink: mpsc::Sender<TaskResult>,
        cancel: CancellationToken,
    ) -> Session {
        let session = Session::new();
        let span = tracing::info_span!("session", id = %session.id());
        self.drive(session, request, artifact, sink, cancel)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        mut session: Session,
        request: SessionRequest,
        artifact: Option<Artifact>,
        sink: mpsc::Sender<TaskResult>,
        cancel: CancellationToken,
    ) -> Session {
        let classification = match &artifact {
            Some(artifact) => Some(artifact.resolve_classification().await),
            None => None,
        };
        match classification {
            Some(Classification::Unknown) => {
                tracing::warn!("Artifact classification indeterminate, platform stages gated out")
            }
            Some(c) => tracing::info!(classification = %c, "Session started"),
            None => tracing::info!("Session started without artifact"),
        }

        let mut state = PipelineState::default();
        while let Some(stage) = state.stage() {
            if cancel.is_cancelled() {
                session.mark_cancelled();
                break;
            }
            if !self.toggles.is_enabled(stage) {
                tracing::debug!(%stage, "Stage disabled");
                state = state.pass();
                continue;
            }

            let outcome = match self.gate(stage, &request, classification) {
                Some(reason) => Outcome::skipped(reason),
                None => {
                    let input = StageInput {
                        session_id: session.id().to_string(),
                        subject_name: request.subject_name.clone(),
                        auxiliary_ref: request.auxiliary_ref.clone(),
                        artifact_path: artifact.as_ref().map(|a| a.path().to_path_buf()),
                        origin: artifact.as_ref().map(|a| a.origin().to_string()),
                        classification,
                        prior: session.results().to_vec(),
                    };
                    match self.execute(stage, input, &cancel).await {
                        Some(outcome) => outcome,
                        None => {
                            tracing::info!(%stage, "Session cancelled during stage");
                            session.mark_cancelled();
                            break;
                        }
                    }
                }
            };

            let result = session.record(stage, outcome);
            tracing::info!(%stage, seq = result.seq, outcome = ?result.outcome.kind(), "Stage finished");
            state = state.next(&result.outcome);

            let delivered = tokio::select! {
                sent = sink.send(result) => sent.is_ok(),
                _ = cancel.cancelled() => false,
            };
            if !delivered {
                tracing::info!("Result sink closed, cancelling session");
                session.mark_cancelled();
                break;
            }
        }

        if let Some(artifact) = artifact {
            if let Err(e) = artifact.release() {
                tracing::warn!(error = %e, "Failed to release artifact storage");
            }
        }
        session.terminate();
        tracing::info!(
            records = session.results().len(),
            cancelled = session.is_cancelled(),
            "Session terminated"
        );
        session
    }

    /// Skip reason when `stage` does not apply to this session
    fn gate(
        &self,
        stage: PipelineStage,
        request: &SessionRequest,
        classification: Option<Classification>,
    ) -> Option<&'static str> {
        if stage == PipelineStage::Identify {
            let has_subject = request
                .subject_name
                .as_deref()
                .is_some_and(|name| !name.trim().is_empty());
            return (!has_subject).then_some(skip::NO_SUBJECT);
        }

        let Some(classification) = classification else {
            return Some(skip::NO_ARTIFACT);
        };
        let applicable = match stage {
            PipelineStage::Probe => {
                classification.is_native() && self.stages.probe.host_capable()
            }
            PipelineStage::Synthesize => classification != Classification::Unknown,
            _ => true,
        };
        (!applicable).then_some(skip::PLATFORM_UNSUPPORTED)
    }

    /// Run one executor in its own task. `None` means the session was cancelled
    /// and the task has been aborted and dropped.
    async fn execute(
        &self,
        stage: PipelineStage,
        input: StageInput,
        cancel: &CancellationToken,
    ) -> Option<Outcome> {
        let executor = Arc::clone(self.stages.get(stage));
        let mut handle = tokio::spawn(async move { executor.execute(input).await }.in_current_span());

        tokio::select! {
            joined = &mut handle => Some(match joined {
                Ok(Ok(payload)) => Outcome::Ok(payload),
                Ok(Err(e)) => {
                    let reason = format!("{:#}", e);
                    tracing::warn!(%stage, error = %reason, "Stage failed");
                    Outcome::Failed(reason)
                }
                Err(e) if e.is_panic() => {
                    tracing::warn!(%stage, "Stage panicked");
                    Outcome::Failed("stage panicked".to_string())
                }
                Err(_) => Outcome::Failed("stage aborted".to_string()),
            }),
            _ = cancel.cancelled() => {
                handle.abort();
                // resolves only after the stage future has been dropped
                let _ = handle.await;
                None
            }
        }
    }
}
