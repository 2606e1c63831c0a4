//! # Synthesize
//!
//! Produces the session's deliverable document and hands it to the
//! publication collaborator. Native artifacts go through the operator's
//! configured tool when there is one; everything else gets a textual
//! findings report.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{StageExecutor, StageInput};
use crate::artifact::Classification;
use crate::config::SynthesisConfig;
use crate::pipeline::{Outcome, PipelineStage};
use crate::services::{content_digest, rotate_best_effort, Enrichment, Services};

/// Payload used when the document was built but could not be published
pub const LOCAL_ONLY: &str = "<local-only, no ref>";

pub struct SynthesizeStage {
    config: SynthesisConfig,
    services: Services,
}

impl SynthesizeStage {
    pub fn new(config: SynthesisConfig, services: Services) -> Self {
        Self { config, services }
    }

    /// Run the configured external tool; its stdout is the payload
    async fn run_tool(
        &self,
        argv: &[String],
        artifact: &Path,
        classification: Classification,
    ) -> Result<Vec<u8>> {
        let artifact = artifact.to_string_lossy();
        let mut argv = argv.iter().map(|arg| {
            arg.replace("{artifact}", &artifact)
                .replace("{platform}", classification.as_str())
        });
        let program = argv.next().context("Synthesis command is empty")?;

        let output = Command::new(&program)
            .args(argv)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", program))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }

    async fn report(&self, input: &StageInput, classification: Classification, bytes: &[u8]) -> String {
        let mut report = format!(
            "stagehand findings report\n\
             session: {}\n\
             origin: {}\n\
             classification: {}\n\
             sha256: {}\n\
             size: {} bytes\n",
            input.session_id,
            input.origin.as_deref().unwrap_or("unknown"),
            classification,
            content_digest(bytes),
            bytes.len(),
        );

        report.push_str("\nprior stages:\n");
        if input.prior.is_empty() {
            report.push_str("  (none)\n");
        }
        for result in &input.prior {
            report.push_str(&format!("  {}\n", result));
        }

        let prompt = format!(
            "Summarize the risk of this artifact for a defender in plain language.\n{}",
            report
        );
        report.push_str("\nassessment:\n");
        match self.services.enricher.enrich(&prompt).await {
            Enrichment::Available(text) => report.push_str(&text),
            Enrichment::Unavailable => report.push_str(&static_assessment(input)),
        }
        report.push('\n');
        report
    }
}

/// Deterministic verdict from the earlier stage records
fn static_assessment(input: &StageInput) -> String {
    let flagged = input
        .prior
        .iter()
        .filter(|r| matches!(r.stage, PipelineStage::Inspect | PipelineStage::Probe))
        .filter(|r| matches!(r.outcome, Outcome::Ok(Some(_))))
        .count();
    match flagged {
        0 => "no findings reported by earlier stages".to_string(),
        n => format!("{} stage(s) reported findings; manual review recommended", n),
    }
}

#[async_trait]
impl StageExecutor for SynthesizeStage {
    async fn execute(&self, input: StageInput) -> Result<Option<String>> {
        let path = input
            .artifact_path
            .clone()
            .context("Synthesize requires an artifact")?;
        let classification = input.classification.unwrap_or(Classification::Unknown);
        if classification == Classification::Unknown {
            bail!("no synthesis route for unclassified artifacts");
        }

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let payload = match (&self.config.command, classification.is_native()) {
            (Some(argv), true) => self.run_tool(argv, &path, classification).await?,
            _ => self.report(&input, classification, &bytes).await.into_bytes(),
        };
        if payload.is_empty() {
            tracing::info!("Synthesis produced no payload");
            return Ok(None);
        }

        rotate_best_effort(self.services.rotator.as_ref(), "publish").await;
        match self.services.publisher.publish(&payload).await {
            Ok(reference) => Ok(Some(reference.to_string())),
            Err(e) => {
                tracing::warn!(error = %e, "Publication failed, keeping payload local");
                Ok(Some(LOCAL_ONLY.to_string()))
            }
        }
    }
}
