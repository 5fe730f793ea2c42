//! # lrpc-queue-redis
//!
//! Redis Streams backend for `lrpc-queue`: durable, at-least-once delivery
//! built on XADD/XREADGROUP/XACK and one consumer group per Channel.
//!
//! Connections go through [`redis::aio::ConnectionManager`], which
//! multiplexes commands over a single connection and reconnects
//! transparently — the same async-first posture the rest of this workspace
//! takes, rather than the blocking `redis::Client::get_connection` style.

pub mod channel;
pub mod topic;

pub use channel::RedisChannel;
pub use topic::RedisTopic;
