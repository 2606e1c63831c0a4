//! Per-session ordering check on the peer side.

use crate::error::ProtocolError;
use crate::pipeline::TaskResult;

/// Accepts each session's records only in `seq` order starting at 0.
///
/// A record carrying a different session id starts a new stream.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    session: Option<String>,
    expected: u64,
}

impl SequenceTracker {
    pub fn accept(&mut self, result: &TaskResult) -> Result<(), ProtocolError> {
        if result.session != self.session {
            if result.seq != 0 {
                return Err(ProtocolError::OutOfOrder {
                    expected: 0,
                    got: result.seq,
                });
            }
            self.session = result.session.clone();
            self.expected = 0;
        }

        match result.seq {
            seq if seq == self.expected => {
                self.expected += 1;
                Ok(())
            }
            seq if seq < self.expected => Err(ProtocolError::Duplicate { seq }),
            got => Err(ProtocolError::OutOfOrder {
                expected: self.expected,
                got,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Outcome, PipelineStage};
    use tokio_test::assert_ok;

    fn record(session: &str, seq: u64) -> TaskResult {
        TaskResult::new(PipelineStage::Inspect, Outcome::Ok(None), seq).with_session(session)
    }

    #[test]
    fn test_in_order_stream() {
        let mut tracker = SequenceTracker::default();
        for seq in 0..4 {
            assert_ok!(tracker.accept(&record("a", seq)));
        }
        // next session restarts at zero
        assert_ok!(tracker.accept(&record("b", 0)));
        assert_ok!(tracker.accept(&record("b", 1)));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut tracker = SequenceTracker::default();
        tracker.accept(&record("a", 0)).unwrap();
        tracker.accept(&record("a", 1)).unwrap();
        assert!(matches!(
            tracker.accept(&record("a", 1)),
            Err(ProtocolError::Duplicate { seq: 1 })
        ));
        // state unchanged by the rejection
        tracker.accept(&record("a", 2)).unwrap();
    }

    #[test]
    fn test_gap_rejected() {
        let mut tracker = SequenceTracker::default();
        tracker.accept(&record("a", 0)).unwrap();
        assert!(matches!(
            tracker.accept(&record("a", 2)),
            Err(ProtocolError::OutOfOrder { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn test_new_session_must_start_at_zero() {
        let mut tracker = SequenceTracker::default();
        tracker.accept(&record("a", 0)).unwrap();
        assert!(matches!(
            tracker.accept(&record("b", 3)),
            Err(ProtocolError::OutOfOrder { expected: 0, got: 3 })
        ));
        // still tracking "a"
        tracker.accept(&record("a", 1)).unwrap();
    }

    #[test]
    fn test_records_without_session_id() {
        let mut tracker = SequenceTracker::default();
        let plain = |seq| TaskResult::new(PipelineStage::Probe, Outcome::Ok(None), seq);
        tracker.accept(&plain(0)).unwrap();
        tracker.accept(&plain(1)).unwrap();
        assert!(tracker.accept(&plain(0)).is_err());
    }
}
