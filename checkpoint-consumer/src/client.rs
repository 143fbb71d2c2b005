use async_trait::async_trait;
use rdkafka::error::KafkaError;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::continuity::OffsetLedger;
use crate::message::{ConsumedMessage, PartitionKey};

/// Enumeration of errors reported by, or returned from, a consumer client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to join consumer group {group}: {source}")]
    Join {
        group: String,
        #[source]
        source: KafkaError,
    },
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("kafka client error ({reason}): {source}")]
    Client {
        reason: String,
        #[source]
        source: KafkaError,
    },
    #[error("failed to commit offset {offset} for {key}: {source}")]
    Commit {
        key: PartitionKey,
        offset: i64,
        #[source]
        source: KafkaError,
    },
    #[error("failed to commit offsets [{offsets}]: {source}")]
    CommitCallback {
        offsets: String,
        #[source]
        source: KafkaError,
    },
    #[error("failed to commit final offsets [{offsets}]: {source}")]
    FinalCommit {
        offsets: String,
        #[source]
        source: KafkaError,
    },
    #[error("the consumer is already closed")]
    AlreadyClosed,
}

/// The receiving halves a client hands to the rest of the process.
///
/// The message stream ends once the client stops delivering, either on
/// request or because it hit an error it cannot recover from. The error
/// stream stays open until the client is finalized.
pub struct ClientStreams {
    pub messages: mpsc::Receiver<ConsumedMessage>,
    pub errors: mpsc::UnboundedReceiver<ClientError>,
}

/// The operations the consumption loop and the shutdown path need from the
/// underlying log client. Group membership, assignment and commit storage all
/// live behind this trait.
#[async_trait]
pub trait CheckpointClient: Send + Sync {
    /// Request that `message` and everything before it on its partition be
    /// marked as processed. Failures are reported on the error stream.
    fn commit(&self, message: &ConsumedMessage);

    /// Stop delivering messages, ending the message stream. Commits keep
    /// working, and failures keep being reported, until `finalize`.
    async fn close(&self) -> Result<(), ClientError>;

    /// Called once the loop has stopped: commit the last processed offset of
    /// every partition in `ledger`, leave the group and end the error stream.
    ///
    /// The error stream is ended even when the final commit fails.
    fn finalize(&self, ledger: &OffsetLedger) -> Result<(), ClientError>;
}
