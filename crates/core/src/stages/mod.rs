//! # Stage Executors
//!
//! The four pluggable pipeline steps. Executors are stateless: they receive an
//! owned [`StageInput`] and return a payload, and keep no reference to the
//! session that invoked them. Errors are plain `anyhow` errors; the coordinator
//! turns them into `Failed` records.

pub mod identify;
pub mod inspect;
pub mod probe;
pub mod synthesize;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::Classification;
use crate::config::StagehandConfig;
use crate::pipeline::{PipelineStage, TaskResult};
use crate::services::Services;

pub use identify::IdentifyStage;
pub use inspect::{scan_patterns, Finding, InspectStage};
pub use probe::FuzzProbe;
pub use synthesize::{SynthesizeStage, LOCAL_ONLY};

/// Everything a stage may look at
#[derive(Debug, Clone, Default)]
pub struct StageInput {
    pub session_id: String,
    /// Human-supplied software name
    pub subject_name: Option<String>,
    /// Auxiliary input, e.g. an image reference
    pub auxiliary_ref: Option<String>,
    pub artifact_path: Option<PathBuf>,
    /// Where the artifact was retrieved from
    pub origin: Option<String>,
    pub classification: Option<Classification>,
    /// Records already emitted in this session
    pub prior: Vec<TaskResult>,
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run the stage. `Ok(None)` means the stage ran and found nothing.
    async fn execute(&self, input: StageInput) -> anyhow::Result<Option<String>>;

    /// Whether this host can run the stage at all
    fn host_capable(&self) -> bool {
        true
    }
}

/// One executor per pipeline stage
#[derive(Clone)]
pub struct StageSet {
    pub identify: Arc<dyn StageExecutor>,
    pub inspect: Arc<dyn StageExecutor>,
    pub probe: Arc<dyn StageExecutor>,
    pub synthesize: Arc<dyn StageExecutor>,
}

impl StageSet {
    pub fn get(&self, stage: PipelineStage) -> &Arc<dyn StageExecutor> {
        match stage {
            PipelineStage::Identify => &self.identify,
            PipelineStage::Inspect => &self.inspect,
            PipelineStage::Probe => &self.probe,
            PipelineStage::Synthesize => &self.synthesize,
        }
    }

    /// The production executors wired to the given collaborators
    pub fn from_config(config: &StagehandConfig, services: &Services) -> Self {
        Self {
            identify: Arc::new(IdentifyStage::new(
                services.enricher.clone(),
                services.rotator.clone(),
            )),
            inspect: Arc::new(InspectStage::new(services.enricher.clone())),
            probe: Arc::new(FuzzProbe::new(config.probe.clone())),
            synthesize: Arc::new(SynthesizeStage::new(config.synthesis.clone(), services.clone())),
        }
    }
}
