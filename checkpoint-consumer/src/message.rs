use std::borrow::Cow;
use std::fmt;

use rdkafka::Message;

/// Identifies one ordered offset sequence: a single partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub topic: String,
    pub partition: i32,
}

impl PartitionKey {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

/// An owned copy of a message handed to us by the consumer client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub value: Vec<u8>,
}

impl ConsumedMessage {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, value: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            value: value.to_vec(),
        }
    }

    /// Copy a message out of librdkafka's buffers. Tombstones become an empty value.
    pub fn from_kafka<M: Message>(message: &M) -> Self {
        Self::new(
            message.topic(),
            message.partition(),
            message.offset(),
            message.payload().unwrap_or_default(),
        )
    }

    pub fn key(&self) -> PartitionKey {
        PartitionKey::new(self.topic.as_str(), self.partition)
    }

    pub fn value_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_key_display() {
        assert_eq!(PartitionKey::new("events", 3).to_string(), "events:3");
    }

    #[test]
    fn test_partition_keys_order_by_topic_then_partition() {
        let mut keys = vec![
            PartitionKey::new("views", 0),
            PartitionKey::new("clicks", 2),
            PartitionKey::new("clicks", 1),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                PartitionKey::new("clicks", 1),
                PartitionKey::new("clicks", 2),
                PartitionKey::new("views", 0),
            ]
        );
    }

    #[test]
    fn test_value_lossy_replaces_invalid_utf8() {
        let message = ConsumedMessage::new("events", 0, 7, &[b'o', b'k', 0xff]);

        assert_eq!(message.key(), PartitionKey::new("events", 0));
        assert_eq!(message.value_lossy(), "ok\u{fffd}");
    }
}
