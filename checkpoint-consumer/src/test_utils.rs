use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use tokio::sync::mpsc;

use crate::client::{CheckpointClient, ClientError, ClientStreams};
use crate::continuity::OffsetLedger;
use crate::message::{ConsumedMessage, PartitionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseBehaviour {
    /// Drop the message sender, ending the message stream once it is drained.
    Close,
    /// Return an error and leave the streams open.
    Fail,
    /// Never complete.
    Hang,
}

/// An in-memory stand-in for a group consumer. Tests push messages and errors
/// through it and inspect the commits and close requests it received.
pub struct MockClient {
    messages: Mutex<Option<mpsc::Sender<ConsumedMessage>>>,
    errors: Mutex<Option<mpsc::UnboundedSender<ClientError>>>,
    commits: Mutex<Vec<(PartitionKey, i64)>>,
    finalized: Mutex<Option<OffsetLedger>>,
    close_calls: AtomicUsize,
    close_behaviour: CloseBehaviour,
    fail_commits: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockClient {
    pub fn new(buffer_size: usize) -> (Arc<Self>, ClientStreams) {
        Self::with_close_behaviour(buffer_size, CloseBehaviour::Close)
    }

    pub fn with_close_behaviour(
        buffer_size: usize,
        close_behaviour: CloseBehaviour,
    ) -> (Arc<Self>, ClientStreams) {
        let (messages_tx, messages_rx) = mpsc::channel(buffer_size);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let client = Self {
            messages: Mutex::new(Some(messages_tx)),
            errors: Mutex::new(Some(errors_tx)),
            commits: Mutex::new(Vec::new()),
            finalized: Mutex::new(None),
            close_calls: AtomicUsize::new(0),
            close_behaviour,
            fail_commits: AtomicBool::new(false),
        };
        let streams = ClientStreams {
            messages: messages_rx,
            errors: errors_rx,
        };

        (Arc::new(client), streams)
    }

    /// Deliver a message, waiting for buffer space. Returns false once the
    /// message stream has been closed.
    pub async fn deliver(&self, message: ConsumedMessage) -> bool {
        let sender = lock(&self.messages).clone();
        match sender {
            Some(sender) => sender.send(message).await.is_ok(),
            None => false,
        }
    }

    pub fn report_error(&self, err: ClientError) -> bool {
        match lock(&self.errors).as_ref() {
            Some(errors) => errors.send(err).is_ok(),
            None => false,
        }
    }

    /// End the message stream, as the client does on its own after a fatal
    /// error. The error stream stays open until `finalize`.
    pub fn finish(&self) {
        lock(&self.messages).take();
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn commits(&self) -> Vec<(PartitionKey, i64)> {
        lock(&self.commits).clone()
    }

    /// The ledger passed to `finalize`, if it has been called.
    pub fn finalized(&self) -> Option<OffsetLedger> {
        lock(&self.finalized).clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointClient for MockClient {
    fn commit(&self, message: &ConsumedMessage) {
        if self.fail_commits.load(Ordering::SeqCst) {
            self.report_error(ClientError::Commit {
                key: message.key(),
                offset: message.offset,
                source: KafkaError::Canceled,
            });
            return;
        }

        lock(&self.commits).push((message.key(), message.offset));
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);

        match self.close_behaviour {
            CloseBehaviour::Close => {
                self.finish();
                Ok(())
            }
            CloseBehaviour::Fail => Err(ClientError::Kafka(KafkaError::Canceled)),
            CloseBehaviour::Hang => std::future::pending().await,
        }
    }

    fn finalize(&self, ledger: &OffsetLedger) -> Result<(), ClientError> {
        lock(&self.messages).take();
        lock(&self.errors).take();
        *lock(&self.finalized) = Some(ledger.clone());

        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(ClientError::FinalCommit {
                offsets: ledger
                    .iter()
                    .map(|(key, offset)| format!("{key}@{}", offset.saturating_add(1)))
                    .collect::<Vec<_>>()
                    .join(", "),
                source: KafkaError::Canceled,
            });
        }

        Ok(())
    }
}
