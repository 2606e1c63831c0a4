//! # Artifacts
//!
//! Retrieval, per-session storage and platform classification of the file
//! under inspection.

pub mod classify;
pub mod source;
pub mod store;

pub use classify::{classify, Classification};
pub use source::{ArtifactSource, HttpSource, LocalSource, SourceRouter};
pub use store::{Artifact, ArtifactStore};
