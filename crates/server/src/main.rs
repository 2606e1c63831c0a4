//! # Stagehand
//!
//! Command-line entry point for both roles:
//!
//! - `serve` - accept peers over TLS and run one pipeline per request
//! - `join`  - subscribe to a server as an assisting peer
//! - `run`   - one local pipeline run printed to stdout, no network
//! - `check` - validate configuration and credentials

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use stagehand_core::pipeline::SessionRequest;
use stagehand_core::protocol::{
    self, PeerOptions, Server, ServerContext, StartRequest, VerdictAugmenter,
};
use stagehand_core::services::enricher_from_config;
use stagehand_core::StagehandConfig;

#[derive(Parser, Clone)]
#[command(author, version, about = "Stagehand - distributed inspection pipeline")]
struct Args {
    /// Configuration file (default: .stagehand/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Run the server role
    Serve {
        /// Listen address, overrides the configuration
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Connect to a server as an assisting peer
    Join {
        /// Server address, overrides the configuration
        #[arg(short, long)]
        server: Option<String>,
        /// Request a session for this software name
        #[arg(long)]
        subject: Option<String>,
        /// Auxiliary input reference (e.g. an image URL)
        #[arg(long)]
        aux: Option<String>,
        /// Artifact location (URL or local path)
        #[arg(long)]
        source: Option<String>,
        /// Do not write augmented results back
        #[arg(long)]
        no_relay: bool,
    },
    /// Run one pipeline locally and print the results
    Run {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        aux: Option<String>,
        /// Artifact location (URL or local path)
        #[arg(long)]
        source: Option<String>,
    },
    /// Validate configuration and credentials, then exit
    Check,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Cancelled on Ctrl-C
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        trigger.cancel();
    });
    token
}

async fn serve(mut config: StagehandConfig, listen: Option<String>) -> Result<()> {
    if let Some(listen) = listen {
        config.listen = listen;
    }
    let addr = config.listen_addr()?;
    let acceptor = protocol::server_acceptor(&config.tls)?;
    let context = Arc::new(ServerContext::from_config(Arc::new(config))?);

    let listener = Server::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    println!("🚀 Stagehand server listening on {}", addr);

    Server::new(context, acceptor)
        .run(listener, shutdown_on_ctrl_c())
        .await;
    Ok(())
}

async fn join(
    config: StagehandConfig,
    server: Option<String>,
    start: Option<StartRequest>,
    relay: bool,
) -> Result<()> {
    let addr = server.unwrap_or_else(|| config.peer.server.clone());
    let connector = protocol::peer_connector(&config.tls)?;
    let name = protocol::server_name(&config.tls)?;

    let stream = protocol::connect(&connector, name, &addr).await?;
    println!("🔗 Connected to {}", addr);

    let augmenter = VerdictAugmenter::new(enricher_from_config(&config.enrichment));
    let options = PeerOptions { relay, start };
    let summary = protocol::run_peer(stream, &augmenter, options, shutdown_on_ctrl_c()).await?;

    println!(
        "Received {} result(s), rejected {}, relayed {}, notices {}",
        summary.received, summary.rejected, summary.relayed, summary.notices
    );
    Ok(())
}

async fn run_local(mut config: StagehandConfig, request: StartRequest) -> Result<()> {
    // the operator is the only requester here
    config.fetch.allow_local_paths = true;
    let context = ServerContext::from_config(Arc::new(config))?;

    let artifact = match request.artifact_source_ref.as_deref() {
        Some(source) => match context.store.acquire(source).await {
            Ok(artifact) => {
                println!("📦 {} classified as {}", source, artifact.classification());
                Some(artifact)
            }
            Err(e) => anyhow::bail!("{}: {}", e.notice().error, e),
        },
        None => None,
    };

    let (tx, mut rx) = mpsc::channel(16);
    let session_request = SessionRequest {
        subject_name: request.subject_name,
        auxiliary_ref: request.auxiliary_input_ref,
    };
    let coordinator = context.coordinator.clone();
    let cancel = shutdown_on_ctrl_c();
    let session = tokio::spawn(async move {
        coordinator.run(session_request, artifact, tx, cancel).await
    });

    while let Some(result) = rx.recv().await {
        println!("{}", result);
    }
    let session = session.await.context("Session task failed")?;
    if session.is_cancelled() {
        println!("Session {} cancelled", session.id());
    } else {
        println!("✅ Session {} finished", session.id());
    }
    Ok(())
}

fn check(config: &StagehandConfig) -> Result<()> {
    config.listen_addr()?;
    match protocol::server_acceptor(&config.tls) {
        Ok(_) => println!("✅ Server credentials usable"),
        Err(e) => println!("⚠️ Server role unavailable: {}", e),
    }
    match protocol::peer_connector(&config.tls) {
        Ok(_) => println!("✅ Peer credentials usable"),
        Err(e) => println!("⚠️ Peer role unavailable: {}", e),
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = StagehandConfig::load(args.config.as_deref())?;

    match args.command {
        CliCommand::Serve { listen } => serve(config, listen).await,
        CliCommand::Join {
            server,
            subject,
            aux,
            source,
            no_relay,
        } => {
            let start = (subject.is_some() || source.is_some()).then(|| StartRequest {
                subject_name: subject,
                auxiliary_input_ref: aux,
                artifact_source_ref: source,
            });
            let relay = !no_relay && config.peer.relay;
            join(config, server, start, relay).await
        }
        CliCommand::Run {
            subject,
            aux,
            source,
        } => {
            let request = StartRequest {
                subject_name: subject,
                auxiliary_input_ref: aux,
                artifact_source_ref: source,
            };
            run_local(config, request).await
        }
        CliCommand::Check => check(&config),
    }
}
