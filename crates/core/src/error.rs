//! # Error Taxonomy
//!
//! Typed errors for the failure classes that cross component boundaries.
//! Stage-local failures are plain `anyhow` errors and never leave the
//! coordinator; everything here is either peer-visible or fatal.

use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::wire::ErrorNotice;

/// The artifact could not be obtained. Fatal to the session before it starts.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("invalid source reference: {0}")]
    InvalidReference(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("no matching content at {0}")]
    NoMatchingContent(String),

    #[error("artifact exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("artifact could not be opened: {0}")]
    Unavailable(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetrievalError {
    /// Wire notice sent to the requesting peer
    pub fn notice(&self) -> ErrorNotice {
        match self {
            RetrievalError::Unavailable(_) => ErrorNotice::new(ErrorNotice::ARTIFACT_UNAVAILABLE),
            _ => ErrorNotice::new(ErrorNotice::RETRIEVAL_FAILED),
        }
    }
}

/// Connection-level failures. Abort the in-flight session only.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Record-level protocol violations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("out-of-order result: expected seq {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("duplicate result: seq {seq} already delivered")]
    Duplicate { seq: u64 },
}

/// Publication collaborator failures. Degrade the synthesize payload, never fail it.
#[derive(Error, Debug)]
pub enum PublicationError {
    #[error("publication rejected: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Aborts process startup
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("missing credential: {0} is not configured")]
    MissingCredential(&'static str),

    #[error("invalid credential {path}: {reason}")]
    Credential { path: PathBuf, reason: String },

    #[error("TLS configuration rejected: {0}")]
    Tls(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid listen address '{0}'")]
    InvalidListenAddress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
