//! # Session Protocol
//!
//! Length-delimited JSON records over TLS, with a server role that runs
//! pipelines and a peer role that subscribes to their results.

pub mod codec;
pub mod peer;
pub mod sequence;
pub mod server;
pub mod tls;
pub mod wire;

pub use peer::{connect, run_peer, Augmenter, PeerOptions, PeerSummary, VerdictAugmenter};
pub use sequence::SequenceTracker;
pub use server::{serve_connection, Server, ServerContext};
pub use tls::{peer_connector, server_acceptor, server_name};
pub use wire::{AugmentedResult, ErrorNotice, PeerMessage, ServerMessage, StartRequest};
