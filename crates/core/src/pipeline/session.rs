//! # Session
//!
//! One end-to-end run of the pipeline. Only the coordinator mutates it.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::result::{Outcome, TaskResult};
use super::stage::PipelineStage;

#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    stages_executed: Vec<TaskResult>,
    next_seq: u64,
    terminated: bool,
    cancelled: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            stages_executed: Vec::new(),
            next_seq: 0,
            terminated: false,
            cancelled: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Results in emission order
    pub fn results(&self) -> &[TaskResult] {
        &self.stages_executed
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Ended by connection loss or shutdown rather than by the pipeline
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Number the outcome and append it to the stream
    pub(crate) fn record(&mut self, stage: PipelineStage, outcome: Outcome) -> TaskResult {
        let result =
            TaskResult::new(stage, outcome, self.next_seq).with_session(self.id.to_string());
        self.next_seq += 1;
        self.stages_executed.push(result.clone());
        result
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub(crate) fn terminate(&mut self) {
        self.terminated = true;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_numbers_from_zero() {
        let mut session = Session::new();
        let a = session.record(PipelineStage::Identify, Outcome::Ok(None));
        let b = session.record(PipelineStage::Inspect, Outcome::Ok(None));

        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
        assert_eq!(a.session.as_deref(), Some(session.id().to_string().as_str()));
        assert_eq!(session.results().len(), 2);
        assert!(!session.is_terminated());
    }

    #[test]
    fn test_terminate_stamps_finish() {
        let mut session = Session::new();
        assert!(session.finished_at().is_none());
        session.terminate();
        assert!(session.is_terminated());
        assert!(session.finished_at().unwrap() >= session.started_at());
    }
}
