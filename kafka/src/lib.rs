//! # lrpc-queue-kafka
//!
//! Kafka backend for `lrpc-queue`. A Topic maps to a single Kafka topic;
//! each Channel attached to it is an independent consumer group reading
//! that same topic, so Kafka's own replication-per-group behavior provides
//! fan-out instead of this crate looping over Channels at publish time the
//! way the memory and Redis backends do.
//!
//! Delivery is at-least-once via manual offset commits: a record is only
//! committed once a handler has run to completion (or retries are
//! exhausted); otherwise the broker redelivers the same record after the
//! consumer's session timeout elapses.

pub mod channel;
pub mod topic;

pub use channel::KafkaChannel;
pub use topic::KafkaTopic;
