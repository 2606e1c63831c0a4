//! # Server Role
//!
//! Accepts TLS connections and runs at most one pipeline session per
//! connection at a time, streaming each `TaskResult` as soon as the
//! coordinator produces it.
//!
//! While a session runs the connection keeps reading, so a second
//! `StartRequest` is answered with `session-busy` and a dropped connection
//! cancels the session immediately.

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::codec::{encode, framed};
use super::wire::{ErrorNotice, PeerMessage, ServerMessage, StartRequest};
use crate::artifact::{ArtifactStore, SourceRouter};
use crate::config::StagehandConfig;
use crate::error::{StartupError, TransportError};
use crate::pipeline::{Coordinator, Session, SessionRequest, TaskResult};
use crate::services::Services;

/// Shared by every connection
pub struct ServerContext {
    pub config: Arc<StagehandConfig>,
    pub store: ArtifactStore,
    pub coordinator: Coordinator,
}

impl ServerContext {
    pub fn new(config: Arc<StagehandConfig>, store: ArtifactStore, coordinator: Coordinator) -> Self {
        Self {
            config,
            store,
            coordinator,
        }
    }

    /// Production wiring: HTTP/local retrieval, configured stages and collaborators
    pub fn from_config(config: Arc<StagehandConfig>) -> Result<Self, StartupError> {
        let source =
            SourceRouter::new(&config.fetch).map_err(|e| StartupError::Config(e.to_string()))?;
        let store = ArtifactStore::open(
            config.storage.root.clone(),
            Arc::new(source),
            config.storage.max_artifact_bytes,
        )?;
        let services = Services::from_config(&config);
        let coordinator = Coordinator::from_config(&config, &services);
        Ok(Self::new(config, store, coordinator))
    }
}

pub struct Server {
    context: Arc<ServerContext>,
    acceptor: TlsAcceptor,
}

impl Server {
    pub fn new(context: Arc<ServerContext>, acceptor: TlsAcceptor) -> Self {
        Self { context, acceptor }
    }

    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, StartupError> {
        Ok(TcpListener::bind(addr).await?)
    }

    /// Accept until `shutdown` fires. Per-connection failures never end the loop.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "Listening");
        }

        loop {
            let (tcp, addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            let acceptor = self.acceptor.clone();
            let context = self.context.clone();
            let shutdown = shutdown.child_token();
            tokio::spawn(
                async move {
                    let tls = match acceptor.accept(tcp).await {
                        Ok(tls) => tls,
                        Err(e) => {
                            tracing::warn!(error = %e, "TLS handshake failed");
                            return;
                        }
                    };
                    tracing::info!("Peer connected");
                    match serve_connection(tls, context, shutdown).await {
                        Ok(()) => tracing::info!("Peer disconnected"),
                        Err(e) => tracing::warn!(error = %e, "Connection ended with error"),
                    }
                }
                .instrument(tracing::info_span!("connection", %addr)),
            );
        }
        tracing::info!("Server stopped");
    }
}

struct ActiveSession {
    results: mpsc::Receiver<TaskResult>,
    cancel: CancellationToken,
    handle: JoinHandle<Session>,
}

type FrameSink<S> = SplitSink<Framed<S, LengthDelimitedCodec>, Bytes>;
type FrameStream<S> = SplitStream<Framed<S, LengthDelimitedCodec>>;

struct Connection<S> {
    sink: FrameSink<S>,
    stream: FrameStream<S>,
    context: Arc<ServerContext>,
    active: Option<ActiveSession>,
}

/// Serve one connection until the peer leaves, the transport fails or `shutdown` fires.
///
/// Any session still running at that point is cancelled and awaited, so its
/// artifact is gone by the time this returns.
pub async fn serve_connection<S>(
    io: S,
    context: Arc<ServerContext>,
    shutdown: CancellationToken,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = framed(io).split();
    let mut connection = Connection {
        sink,
        stream,
        context,
        active: None,
    };
    let outcome = connection.run(&shutdown).await;
    connection.teardown().await;
    outcome
}

/// Next record of the running session; pending forever when idle
async fn next_result(active: &mut Option<ActiveSession>) -> Option<TaskResult> {
    match active {
        Some(session) => session.results.recv().await,
        None => std::future::pending().await,
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(&mut self, shutdown: &CancellationToken) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                frame = self.stream.next() => match frame {
                    Some(Ok(frame)) => self.handle_frame(&frame).await?,
                    Some(Err(e)) => return Err(TransportError::Io(e)),
                    None => return Ok(()),
                },
                result = next_result(&mut self.active) => match result {
                    Some(result) => self.send(&ServerMessage::Result(result)).await?,
                    None => self.finish().await,
                },
            }
        }
    }

    async fn handle_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        match PeerMessage::from_frame(frame) {
            Ok(PeerMessage::Start(_)) if self.active.is_some() => {
                tracing::debug!("Start request while busy");
                self.notice(ErrorNotice::SESSION_BUSY).await
            }
            Ok(PeerMessage::Start(request)) => self.start(request).await,
            Ok(PeerMessage::Augmented(augmented)) => {
                tracing::info!(
                    stage = %augmented.original.stage,
                    seq = augmented.original.seq,
                    note = %augmented.note,
                    "Peer augmentation"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed request");
                self.notice(ErrorNotice::MALFORMED_REQUEST).await
            }
        }
    }

    /// Resolve the artifact and launch the coordinator. Retrieval failure
    /// answers with a notice and creates no session.
    async fn start(&mut self, request: StartRequest) -> Result<(), TransportError> {
        let artifact = match request.artifact_source_ref.as_deref() {
            Some(source_ref) => match self.context.store.acquire(source_ref).await {
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    tracing::warn!(source_ref, error = %e, "Artifact retrieval failed");
                    return self.send(&ServerMessage::Notice(e.notice())).await;
                }
            },
            None => None,
        };

        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let coordinator = self.context.coordinator.clone();
        let session_request = SessionRequest {
            subject_name: request.subject_name,
            auxiliary_ref: request.auxiliary_input_ref,
        };
        let token = cancel.clone();
        let handle = tokio::spawn(
            async move { coordinator.run(session_request, artifact, tx, token).await }
                .in_current_span(),
        );

        self.active = Some(ActiveSession {
            results: rx,
            cancel,
            handle,
        });
        Ok(())
    }

    /// The coordinator dropped its sender: collect the finished session
    async fn finish(&mut self) {
        if let Some(session) = self.active.take() {
            match session.handle.await {
                Ok(session) => tracing::info!(
                    session = %session.id(),
                    records = session.results().len(),
                    "Session complete"
                ),
                Err(e) => tracing::warn!(error = %e, "Session task failed"),
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(session) = self.active.take() {
            tracing::info!("Connection gone, cancelling session");
            session.cancel.cancel();
            if let Err(e) = session.handle.await {
                tracing::warn!(error = %e, "Session task failed");
            }
        }
        let _ = self.sink.close().await;
    }

    async fn notice(&mut self, error: &str) -> Result<(), TransportError> {
        self.send(&ServerMessage::Notice(ErrorNotice::new(error))).await
    }

    async fn send(&mut self, message: &ServerMessage) -> Result<(), TransportError> {
        let frame = encode(message)?;
        self.sink.send(frame).await.map_err(TransportError::Io)
    }
}
