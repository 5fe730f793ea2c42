//! # lrpc-queue-memory
//!
//! In-process, non-persistent backend for `lrpc-queue`.
//!
//! Everything lives in memory and dies with the process: no wire encoding,
//! no external broker round-trip. `Publish` walks the Topic's Channel map
//! directly; `Next`/`TryNext` block on a `tokio::sync::Notify` standing in
//! for the condvar a synchronous implementation would reach for.
//!
//! This backend is the one most implementations reach for in tests and
//! local development — it trades durability and cross-process fan-out for
//! zero setup cost.

pub mod channel;
pub mod topic;

pub use channel::MemoryChannel;
pub use topic::MemoryTopic;
