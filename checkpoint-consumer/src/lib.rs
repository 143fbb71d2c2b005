//! Consume a set of topics as part of a consumer group, checking that each
//! partition's offsets arrive without gaps and committing after every message.
pub mod client;
pub mod config;
pub mod consumer;
pub mod continuity;
pub mod error_sink;
pub mod kafka;
pub mod message;
pub mod metrics;
pub mod shutdown;
pub mod test_utils;
