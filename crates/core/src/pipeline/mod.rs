//! # Pipeline
//!
//! Stage identifiers, the state machine, result records, sessions and the
//! coordinator that ties them together.

pub mod coordinator;
pub mod result;
pub mod session;
pub mod stage;

pub use coordinator::{Coordinator, SessionRequest};
pub use result::{skip, Outcome, OutcomeKind, TaskResult};
pub use session::Session;
pub use stage::{PipelineStage, PipelineState};
