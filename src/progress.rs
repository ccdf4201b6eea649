//! Progress reporting seam between the pipelines and their caller.
//!
//! The pipelines emit coarse, structured events through a caller-supplied
//! sink. Reporting is observational only: sinks are synchronous, infallible,
//! and never affect control flow.

use crate::lead::LeadId;
use crate::outcome::AttemptStatus;

/// Coarse progress signals emitted while a pipeline runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A batch is about to start.
    BatchStarted {
        batch_index: usize,
        batch_count: usize,
        batch_size: usize,
    },
    /// One attempt of one item finished (success, failure, or timeout).
    AttemptFinished {
        lead_id: LeadId,
        attempt_number: u32,
        status: AttemptStatus,
        /// Human-readable detail for failed attempts
        detail: Option<String>,
    },
    /// One item reached its terminal state.
    ItemCompleted {
        lead_id: LeadId,
        status: AttemptStatus,
        completed: usize,
        total: usize,
        successes: usize,
        failures: usize,
    },
    /// A batch finished; all of its items are accounted for.
    BatchCompleted {
        batch_index: usize,
        batch_count: usize,
        percent_complete: f64,
        successes: usize,
        failures: usize,
    },
}

/// Caller-supplied sink for progress events.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Discards all events. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards events over an unbounded channel, e.g. to a UI task. Events are
/// silently dropped once the receiver is gone.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn report(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        sink.report(ProgressEvent::BatchStarted {
            batch_index: 0,
            batch_count: 2,
            batch_size: 5,
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            ProgressEvent::BatchStarted {
                batch_index: 0,
                batch_count: 2,
                batch_size: 5,
            }
        );
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.report(ProgressEvent::BatchCompleted {
            batch_index: 0,
            batch_count: 1,
            percent_complete: 100.0,
            successes: 1,
            failures: 0,
        });
    }
}
