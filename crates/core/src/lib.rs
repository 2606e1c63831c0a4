//! # Stagehand Core
//!
//! Inspection pipeline coordination: retrieves an artifact, drives it through
//! `Identify → Inspect → Probe → Synthesize`, and streams each stage result to
//! connected peers over TLS.
//!
//! ## Architecture
//!
//! - `artifact/` - Retrieval, per-session storage and platform classification
//! - `stages/` - The four pluggable stage executors
//! - `pipeline/` - State machine, result records, sessions and the coordinator
//! - `protocol/` - Wire records, framing, TLS, server and peer roles
//! - `services/` - Enrichment, publication and identity-rotation collaborators
//! - `config` - The single configuration value built at startup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stagehand_core::pipeline::{Coordinator, SessionRequest};
//!
//! let services = Services::from_config(&config);
//! let coordinator = Coordinator::from_config(&config, &services);
//! let session = coordinator.run(request, Some(artifact), tx, cancel).await;
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod services;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use config::StagehandConfig;
