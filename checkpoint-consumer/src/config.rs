use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    // Simulated per-message work, applied after the continuity check and before the commit
    #[envconfig(from = "PROCESSING_DELAY_MS", default = "10")]
    pub processing_delay: EnvMsDuration,

    // Capacity of the channel between the kafka pump and the processing loop
    #[envconfig(from = "MESSAGE_BUFFER_SIZE", default = "100")]
    pub message_buffer_size: usize,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: CommaSeparated,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "checkpoint-consumer")]
    pub kafka_consumer_group: NonEmptyString,

    #[envconfig(default = "test_topic")]
    pub kafka_consumer_topics: CommaSeparated,

    // Where to start when the group has no committed offset for a partition
    #[envconfig(default = "latest")]
    pub kafka_consumer_offset_reset: OffsetReset,

    // Passed to librdkafka as the session timeout and max poll interval, and
    // bounds how long a close request may take before we give up on it
    #[envconfig(default = "10000")]
    pub kafka_processing_timeout_ms: EnvMsDuration,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

impl EnvMsDuration {
    /// Milliseconds as a string, the form librdkafka wants its timeouts in.
    pub fn as_millis_string(&self) -> String {
        self.0.as_millis().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// A comma-separated list of non-empty, trimmed entries, such as broker
/// addresses or topic names. At least one entry is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommaSeparated(pub Vec<String>);

impl CommaSeparated {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn joined(&self) -> String {
        self.0.join(",")
    }
}

impl FromStr for CommaSeparated {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entries: Vec<String> = s
            .split(',')
            .map(|entry| entry.trim())
            .filter(|entry| !entry.is_empty())
            .map(|entry| entry.to_owned())
            .collect();

        if entries.is_empty() {
            return Err(StringIsEmptyError);
        }

        Ok(CommaSeparated(entries))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidOffsetResetError(pub String);

impl FromStr for OffsetReset {
    type Err = InvalidOffsetResetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" | "oldest" => Ok(OffsetReset::Earliest),
            "latest" | "newest" => Ok(OffsetReset::Latest),
            _ => Err(InvalidOffsetResetError(s.to_owned())),
        }
    }
}
