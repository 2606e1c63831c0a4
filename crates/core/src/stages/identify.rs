//! # Identify
//!
//! Reasons about the human-supplied software name (and optional auxiliary
//! image reference), never about the artifact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::{StageExecutor, StageInput};
use crate::services::{rotate_best_effort, Enricher, Enrichment, IdentityRotator};

pub struct IdentifyStage {
    enricher: Arc<dyn Enricher>,
    rotator: Arc<dyn IdentityRotator>,
}

impl IdentifyStage {
    pub fn new(enricher: Arc<dyn Enricher>, rotator: Arc<dyn IdentityRotator>) -> Self {
        Self { enricher, rotator }
    }
}

/// Collapse whitespace so the heuristic output is stable
fn normalize(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn heuristic(name: &str, auxiliary: Option<&str>) -> String {
    match auxiliary {
        Some(aux) => format!("identified '{}' (heuristic, auxiliary: {})", name, aux),
        None => format!("identified '{}' (heuristic)", name),
    }
}

#[async_trait]
impl StageExecutor for IdentifyStage {
    async fn execute(&self, input: StageInput) -> Result<Option<String>> {
        let name = input
            .subject_name
            .as_deref()
            .map(normalize)
            .filter(|n| !n.is_empty())
            .context("Identify requires a subject name")?;

        rotate_best_effort(self.rotator.as_ref(), "identify").await;

        let mut prompt = format!(
            "Identify the software product named '{}': vendor, category and typical platform.",
            name
        );
        if let Some(aux) = &input.auxiliary_ref {
            prompt.push_str(&format!(" A reference image is available at {}.", aux));
        }

        let text = match self.enricher.enrich(&prompt).await {
            Enrichment::Available(answer) => format!("identified '{}': {}", name, answer),
            Enrichment::Unavailable => heuristic(&name, input.auxiliary_ref.as_deref()),
        };
        Ok(Some(text))
    }
}
