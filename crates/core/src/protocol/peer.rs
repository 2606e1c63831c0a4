//! # Peer Role
//!
//! Long-lived subscription to a server: receive one record, check its
//! ordering, add a second opinion, optionally relay it back, repeat. The loop
//! ends when the server closes the connection or the caller cancels.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tokio_util::sync::CancellationToken;

use super::codec::{encode, framed};
use super::sequence::SequenceTracker;
use super::wire::{AugmentedResult, ServerMessage, StartRequest};
use crate::error::TransportError;
use crate::pipeline::{Outcome, PipelineStage, TaskResult};
use crate::services::{Enricher, Enrichment};

/// Local secondary judgment on a delivered result
#[async_trait]
pub trait Augmenter: Send + Sync {
    async fn augment(&self, result: &TaskResult) -> String;
}

/// Verdict derived from the outcome, with a model's second opinion on
/// findings when enrichment is available
pub struct VerdictAugmenter {
    enricher: Arc<dyn Enricher>,
}

impl VerdictAugmenter {
    pub fn new(enricher: Arc<dyn Enricher>) -> Self {
        Self { enricher }
    }
}

fn verdict(result: &TaskResult) -> String {
    let stage = result.stage;
    match &result.outcome {
        Outcome::Ok(Some(payload))
            if stage == PipelineStage::Probe && payload.starts_with("crash-detected") =>
        {
            "confirmed: probe produced crash inputs".to_string()
        }
        Outcome::Ok(Some(_)) => format!("noted: {} reported findings", stage),
        Outcome::Ok(None) => format!("clear: {} found nothing", stage),
        Outcome::Skipped(reason) => format!("n/a: {} skipped ({})", stage, reason),
        Outcome::Failed(reason) => format!("attention: {} failed ({})", stage, reason),
    }
}

#[async_trait]
impl Augmenter for VerdictAugmenter {
    async fn augment(&self, result: &TaskResult) -> String {
        let base = verdict(result);
        if !result.outcome.has_payload() {
            return base;
        }
        let prompt = format!(
            "Give a one-sentence second opinion on this pipeline result:\n{}",
            result
        );
        match self.enricher.enrich(&prompt).await {
            Enrichment::Available(opinion) => format!("{}; second opinion: {}", base, opinion),
            Enrichment::Unavailable => base,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PeerOptions {
    /// Write augmented results back to the server
    pub relay: bool,
    /// Request sent once right after connecting
    pub start: Option<StartRequest>,
}

/// Counters for one subscription
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSummary {
    pub received: usize,
    /// Duplicated or out-of-order records
    pub rejected: usize,
    pub relayed: usize,
    pub notices: usize,
}

/// Open the TCP connection and complete the TLS handshake
pub async fn connect(
    connector: &TlsConnector,
    server_name: ServerName<'static>,
    addr: &str,
) -> Result<TlsStream<TcpStream>, TransportError> {
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", addr, e)))?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| TransportError::Tls(e.to_string()))
}

/// Run the receive loop over an established connection
pub async fn run_peer<S>(
    io: S,
    augmenter: &dyn Augmenter,
    options: PeerOptions,
    cancel: CancellationToken,
) -> Result<PeerSummary, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = framed(io).split();
    let mut tracker = SequenceTracker::default();
    let mut summary = PeerSummary::default();

    if let Some(start) = &options.start {
        sink.send(encode(start)?).await?;
        tracing::info!("Start request sent");
    }

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => match frame {
                Some(frame) => frame?,
                None => {
                    tracing::info!("Server closed the connection");
                    break;
                }
            },
        };

        let result = match ServerMessage::from_frame(&frame) {
            Ok(ServerMessage::Result(result)) => result,
            Ok(ServerMessage::Notice(notice)) => {
                summary.notices += 1;
                tracing::warn!(error = %notice.error, "Server notice");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable server record");
                continue;
            }
        };

        summary.received += 1;
        if let Err(e) = tracker.accept(&result) {
            summary.rejected += 1;
            tracing::warn!(error = %e, "Rejected result");
            continue;
        }
        tracing::info!(session = ?result.session, "{}", result);

        let note = augmenter.augment(&result).await;
        if options.relay {
            let augmented = AugmentedResult {
                original: result,
                note,
            };
            sink.send(encode(&augmented)?).await?;
            summary.relayed += 1;
        }
    }

    Ok(summary)
}
