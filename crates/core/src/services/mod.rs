//! # External Collaborators
//!
//! Narrow capabilities the stages call out to: enrichment, publication and
//! identity rotation. Each is a trait object so deployments and tests can swap
//! implementations.

pub mod enrichment;
pub mod identity;
pub mod publication;

use std::sync::Arc;

use crate::config::StagehandConfig;

pub use enrichment::{enricher_from_config, Enricher, Enrichment, NoEnrichment, OllamaEnricher};
pub use identity::{rotate_best_effort, IdentityRotator, NoopRotator};
pub use publication::{content_digest, LocalPublisher, PublicationRef, Publisher};

/// Collaborator handles shared by every session
#[derive(Clone)]
pub struct Services {
    pub enricher: Arc<dyn Enricher>,
    pub publisher: Arc<dyn Publisher>,
    pub rotator: Arc<dyn IdentityRotator>,
}

impl Services {
    pub fn from_config(config: &StagehandConfig) -> Self {
        Self {
            enricher: enricher_from_config(&config.enrichment),
            publisher: Arc::new(LocalPublisher::new(config.publication.dir.clone())),
            rotator: Arc::new(NoopRotator),
        }
    }
}
