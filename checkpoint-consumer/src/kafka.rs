use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, ClientContext, Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{CheckpointClient, ClientError, ClientStreams};
use crate::config::KafkaConfig;
use crate::continuity::OffsetLedger;
use crate::message::ConsumedMessage;

/// Routes errors raised inside librdkafka's callbacks onto our error stream.
pub struct CheckpointContext {
    errors: Mutex<Option<mpsc::UnboundedSender<ClientError>>>,
}

impl CheckpointContext {
    fn new(errors: mpsc::UnboundedSender<ClientError>) -> Self {
        Self {
            errors: Mutex::new(Some(errors)),
        }
    }

    fn report(&self, err: ClientError) {
        let guard = match self.errors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match guard.as_ref() {
            Some(errors) => {
                if let Err(mpsc::error::SendError(err)) = errors.send(err) {
                    warn!(error = %err, "error stream receiver is gone");
                }
            }
            None => warn!(error = %err, "client error after the error stream was closed"),
        }
    }

    /// Drop our sender so the error stream ends.
    fn detach(&self) {
        let mut guard = match self.errors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }
}

impl ClientContext for CheckpointContext {
    fn error(&self, error: KafkaError, reason: &str) {
        self.report(ClientError::Client {
            reason: reason.to_owned(),
            source: error,
        });
    }
}

impl ConsumerContext for CheckpointContext {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(_) => debug!("committed offsets for {} partitions", offsets.count()),
            Err(e) => self.report(ClientError::CommitCallback {
                offsets: describe_offsets(offsets),
                source: e,
            }),
        }
    }
}

fn describe_offsets(offsets: &TopicPartitionList) -> String {
    offsets
        .elements()
        .iter()
        .map(|elem| format!("{}:{}@{:?}", elem.topic(), elem.partition(), elem.offset()))
        .collect::<Vec<_>>()
        .join(", ")
}

type CheckpointStreamConsumer = StreamConsumer<CheckpointContext>;

/// A group member over librdkafka that commits one message at a time.
pub struct KafkaCheckpointClient {
    consumer: Arc<CheckpointStreamConsumer>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl KafkaCheckpointClient {
    /// Join the consumer group, subscribe to the configured topics and start
    /// pumping messages into a channel of `buffer_size` slots.
    ///
    /// Must be called from within a tokio runtime. Any failure here is fatal:
    /// there is nothing useful to do if we cannot reach the cluster.
    pub fn join(
        config: &KafkaConfig,
        buffer_size: usize,
    ) -> Result<(Self, ClientStreams), ClientError> {
        let group = config.kafka_consumer_group.as_str().to_owned();
        let join_err = |source: KafkaError| ClientError::Join {
            group: group.clone(),
            source,
        };

        let timeout_ms = config.kafka_processing_timeout_ms.as_millis_string();
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.kafka_hosts.joined())
            .set("group.id", config.kafka_consumer_group.as_str())
            .set(
                "auto.offset.reset",
                config.kafka_consumer_offset_reset.as_str(),
            )
            // We commit explicitly after each message
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", &timeout_ms)
            .set("max.poll.interval.ms", &timeout_ms);

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let consumer: CheckpointStreamConsumer = client_config
            .create_with_context(CheckpointContext::new(errors_tx))
            .map_err(join_err)?;

        let topics: Vec<&str> = config
            .kafka_consumer_topics
            .as_slice()
            .iter()
            .map(String::as_str)
            .collect();
        consumer.subscribe(&topics).map_err(join_err)?;

        // Make sure we can reach the brokers before reporting a successful join
        consumer
            .fetch_metadata(None, Timeout::After(config.kafka_processing_timeout_ms.0))
            .map_err(join_err)?;

        info!(
            group = group.as_str(),
            topics = ?topics,
            offset_reset = config.kafka_consumer_offset_reset.as_str(),
            "joined consumer group"
        );

        let consumer = Arc::new(consumer);
        let shutdown = CancellationToken::new();
        let (messages_tx, messages_rx) = mpsc::channel(buffer_size.max(1));
        tokio::spawn(pump_messages(
            consumer.clone(),
            messages_tx,
            shutdown.clone(),
        ));

        let client = Self {
            consumer,
            shutdown,
            closed: AtomicBool::new(false),
        };
        let streams = ClientStreams {
            messages: messages_rx,
            errors: errors_rx,
        };

        Ok((client, streams))
    }
}

#[async_trait]
impl CheckpointClient for KafkaCheckpointClient {
    fn commit(&self, message: &ConsumedMessage) {
        // Kafka commits name the next offset to read, not the last one processed
        let next = message.offset.saturating_add(1);
        let mut offsets = TopicPartitionList::new();

        let committed = offsets
            .add_partition_offset(&message.topic, message.partition, Offset::Offset(next))
            .and_then(|_| self.consumer.commit(&offsets, CommitMode::Async));

        if let Err(e) = committed {
            self.consumer.context().report(ClientError::Commit {
                key: message.key(),
                offset: message.offset,
                source: e,
            });
        }
    }

    async fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyClosed);
        }

        // Only stop delivery here. We stay in the group, and keep reporting
        // errors, until finalize() has committed what the loop drained.
        info!("closing kafka consumer");
        self.shutdown.cancel();

        Ok(())
    }

    fn finalize(&self, ledger: &OffsetLedger) -> Result<(), ClientError> {
        self.shutdown.cancel();

        let committed = final_offsets(ledger).and_then(|offsets| {
            if offsets.count() == 0 {
                return Ok(());
            }
            self.consumer
                .commit(&offsets, CommitMode::Sync)
                .map_err(|source| ClientError::FinalCommit {
                    offsets: describe_offsets(&offsets),
                    source,
                })
        });

        self.consumer.unsubscribe();
        self.consumer.context().detach();
        info!("left consumer group");

        committed
    }
}

/// The next offset to read for every partition in the ledger.
fn final_offsets(ledger: &OffsetLedger) -> Result<TopicPartitionList, ClientError> {
    let mut offsets = TopicPartitionList::new();
    for (key, offset) in ledger {
        offsets.add_partition_offset(
            &key.topic,
            key.partition,
            Offset::Offset(offset.saturating_add(1)),
        )?;
    }
    Ok(offsets)
}

/// Copy messages out of the consumer into the message channel until we are
/// cancelled, the receiver goes away, or the consumer hits a fatal error.
/// Dropping the sender on the way out ends the message stream; the error
/// stream stays open until finalize().
async fn pump_messages(
    consumer: Arc<CheckpointStreamConsumer>,
    messages: mpsc::Sender<ConsumedMessage>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = consumer.recv() => received,
        };

        let message = match received {
            Ok(borrowed) => ConsumedMessage::from_kafka(&borrowed),
            Err(KafkaError::MessageConsumptionFatal(code)) => {
                error!("fatal consumer error, closing message stream: {}", code);
                consumer
                    .context()
                    .report(ClientError::Kafka(KafkaError::MessageConsumptionFatal(code)));
                break;
            }
            Err(e) => {
                consumer.context().report(ClientError::Kafka(e));
                continue;
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            sent = messages.send(message) => {
                if sent.is_err() {
                    debug!("message stream receiver dropped");
                    break;
                }
            }
        }
    }

    info!("kafka message pump stopped");
}
