//! # lrpc-queue-core
//!
//! Core traits and types for `lrpc-queue`, a generic multi-tenant pub/sub
//! message queue with pluggable storage backends.
//!
//! ## Core Concepts
//!
//! - [`Message<T>`](message::Message) — the envelope a published payload
//!   travels in: id, body, timestamps, expiry, attempt count, owning
//!   Channel.
//! - [`Topic<T>`](topic::Topic) — a named fan-out point; every attached
//!   Channel gets an independent copy of each publish.
//! - [`Channel<T>`](channel::Channel) — a per-subscriber, at-least-once
//!   delivery queue with in-flight tracking, acks/nacks, retries, and a
//!   concurrency cap.
//! - [`Error`](error::Error) — the stable `{code, msg}` error envelope, with
//!   an (out-of-scope) [`Localizer`](error::Localizer) boundary for
//!   translating codes into strings.
//! - [`HandlerRunner`](handler::HandlerRunner) — invokes a consumer
//!   callback and traps panics into ordinary error outcomes.
//!
//! This crate defines the contracts only. Concrete backends live in sibling
//! crates: `lrpc-queue-memory` (in-process), `lrpc-queue-redis` (Redis
//! Streams + consumer groups), `lrpc-queue-kafka` (Kafka consumer groups).
//! The `lrpc-queue` crate is the facade that selects a backend from a
//! [`QueueConfig`](config::QueueConfig) and returns a `Topic` of the chosen
//! kind.

pub mod channel;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod topic;

pub use channel::Channel;
pub use config::{ChannelConfig, KafkaConfig, QueueConfig, RedisConfig, StorageType, TopicConfig};
pub use error::Error;
pub use handler::{Handler, HandlerRunner, ProcessResult};
pub use message::Message;
pub use topic::{BoxFuture, Topic};
