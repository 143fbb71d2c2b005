use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::CheckpointClient;
use crate::continuity::{ContinuityResult, ContinuityTracker, OffsetLedger};
use crate::message::ConsumedMessage;
use crate::metrics::{CONTINUITY_GAPS, MESSAGES_PROCESSED, PROCESSING_DURATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Consuming from an open message stream.
    Running,
    /// The stream has been closed; handling whatever was already delivered.
    Draining,
    /// The stream is exhausted. Terminal.
    Stopped,
}

/// Totals reported once consumption ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub event_count: u64,
    pub ledger: OffsetLedger,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} events, offsets {{", self.event_count)?;
        for (i, (key, offset)) in self.ledger.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, offset)?;
        }
        write!(f, "}}")
    }
}

/// Handles messages one at a time: check continuity, do the work, commit.
pub struct CheckpointConsumer {
    client: Arc<dyn CheckpointClient>,
    tracker: ContinuityTracker,
    processing_delay: Duration,
    event_count: u64,
    state: LoopState,
}

impl CheckpointConsumer {
    pub fn new(client: Arc<dyn CheckpointClient>, processing_delay: Duration) -> Self {
        Self {
            client,
            tracker: ContinuityTracker::new(),
            processing_delay,
            event_count: 0,
            state: LoopState::Running,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Consume `messages` until the stream is closed and empty.
    ///
    /// Messages already buffered when the stream closes are still processed
    /// and committed.
    pub async fn run(&mut self, messages: &mut mpsc::Receiver<ConsumedMessage>) -> RunSummary {
        info!("starting consumption");

        while let Some(message) = messages.recv().await {
            if self.state == LoopState::Running && messages.is_closed() {
                info!("message stream closed, draining buffered messages");
                self.state = LoopState::Draining;
            }

            self.handle(message).await;
        }

        if self.state == LoopState::Running {
            self.state = LoopState::Draining;
        }
        self.state = LoopState::Stopped;

        let summary = self.summary();
        info!(events = summary.event_count, "message stream exhausted");
        summary
    }

    /// Process a single message and request its commit.
    pub async fn handle(&mut self, message: ConsumedMessage) -> ContinuityResult {
        let key = message.key();
        let continuity = self.tracker.observe(&key, message.offset);

        if let ContinuityResult::Gap { expected, found } = continuity {
            metrics::counter!(CONTINUITY_GAPS).increment(1);
            warn!(
                topic = key.topic.as_str(),
                partition = key.partition,
                expected,
                found,
                "unexpected offset on {}: expected {}, found {}",
                key,
                expected,
                found
            );
        }

        self.event_count += 1;

        debug!(
            topic = message.topic.as_str(),
            partition = message.partition,
            offset = message.offset,
            value = %message.value_lossy(),
            "processing message"
        );

        let start = Instant::now();
        tokio::time::sleep(self.processing_delay).await;
        metrics::histogram!(PROCESSING_DURATION).record(start.elapsed().as_secs_f64());

        self.client.commit(&message);
        metrics::counter!(MESSAGES_PROCESSED).increment(1);

        continuity
    }

    /// Snapshot of the totals so far. Calling this repeatedly without
    /// handling messages in between returns the same summary.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            event_count: self.event_count,
            ledger: self.tracker.ledger().clone(),
        }
    }
}
