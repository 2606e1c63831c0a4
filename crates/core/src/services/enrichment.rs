//! # Enrichment
//!
//! Optional language-model reasoning. Every call site handles both
//! `Available` and `Unavailable`; a failing backend degrades to `Unavailable`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EnrichmentConfig;

/// Result of asking the enrichment collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrichment {
    Available(String),
    Unavailable,
}

#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, prompt: &str) -> Enrichment;
}

/// Always unavailable; the deterministic fallbacks take over
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnrichment;

#[async_trait]
impl Enricher for NoEnrichment {
    async fn enrich(&self, _prompt: &str) -> Enrichment {
        Enrichment::Unavailable
    }
}

/// Request payload for the Ollama generate endpoint
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    system: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

const SYSTEM_PROMPT: &str = "You assist a software inspection pipeline. \
Answer in at most three short sentences. Do not produce code.";

/// Non-streaming client for an Ollama-compatible `/api/generate`
#[derive(Debug, Clone)]
pub struct OllamaEnricher {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaEnricher {
    pub fn new(config: &EnrichmentConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    async fn generate(&self, prompt: &str) -> Result<String, reqwest::Error> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            system: SYSTEM_PROMPT,
        };
        let response: GenerateResponse = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.response)
    }
}

#[async_trait]
impl Enricher for OllamaEnricher {
    async fn enrich(&self, prompt: &str) -> Enrichment {
        match self.generate(prompt).await {
            Ok(text) if !text.trim().is_empty() => Enrichment::Available(text.trim().to_string()),
            Ok(_) => Enrichment::Unavailable,
            Err(e) => {
                tracing::debug!(error = %e, "Enrichment unavailable");
                Enrichment::Unavailable
            }
        }
    }
}

/// Enricher selected by configuration
pub fn enricher_from_config(config: &EnrichmentConfig) -> Arc<dyn Enricher> {
    if !config.enabled {
        return Arc::new(NoEnrichment);
    }
    match OllamaEnricher::new(config) {
        Ok(enricher) => Arc::new(enricher),
        Err(e) => {
            tracing::warn!(error = %e, "Enrichment client unavailable, using fallbacks");
            Arc::new(NoEnrichment)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_enrichment_is_unavailable() {
        assert_eq!(NoEnrichment.enrich("anything").await, Enrichment::Unavailable);
    }

    #[tokio::test]
    async fn test_unreachable_backend_degrades() {
        let config = EnrichmentConfig {
            enabled: true,
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..EnrichmentConfig::default()
        };
        let enricher = enricher_from_config(&config);
        assert_eq!(enricher.enrich("hello").await, Enrichment::Unavailable);
    }
}
