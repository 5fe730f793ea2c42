//! The Kafka [`Channel`] implementation.
//!
//! Unlike the memory and Redis backends, a Kafka Channel does not own its
//! own copy of the data: every Channel attached to a Topic is just a
//! distinct consumer group reading the *same* underlying Kafka topic, so
//! fan-out is Kafka's native consumer-group replication rather than
//! anything this crate does explicitly (contrast [`crate::topic::KafkaTopic`],
//! which publishes a record exactly once per call).
//!
//! `Ack`/`Nack` are no-ops: Kafka addresses delivery by partition + offset,
//! not by message id, so the real commit-on-success logic lives entirely
//! inside the `Subscribe` consume loop. A bare `Next` caller has no way to
//! commit at all — this is a known limitation of consuming a Kafka-backed
//! Channel outside of `Subscribe`.
//!
//! Redelivery reuses the same uncommitted broker record rather than
//! republishing a bumped copy, so there is no wire-level `attempts` to read
//! back; this Channel tracks retry counts itself, keyed by message id, for
//! as long as the message remains in flight.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lrpc_queue_core::config::ChannelConfig;
use lrpc_queue_core::error::Error;
use lrpc_queue_core::handler::{Handler, HandlerRunner, ProcessResult};
use lrpc_queue_core::message::Message;
use lrpc_queue_core::topic::BoxFuture;
use lrpc_queue_core::channel::Channel;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Message as KafkaMessage, OwnedMessage};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

fn decode_message<T: DeserializeOwned>(msg: &OwnedMessage) -> Result<Message<T>, Error> {
    let payload = msg
        .payload()
        .ok_or_else(|| Error::backend("kafka message has no payload"))?;
    let body: T = serde_json::from_slice(payload).map_err(Error::backend)?;
    let id = msg
        .key()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .unwrap_or_default();

    let mut timestamp = 0u64;
    let mut expires_at = 0u64;
    let mut channel = String::new();
    if let Some(headers) = msg.headers() {
        for header in headers.iter() {
            let value = header
                .value
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default();
            match header.key {
                "timestamp" => timestamp = value.parse().unwrap_or(0),
                "expires_at" => expires_at = value.parse().unwrap_or(0),
                "channel" => channel = value,
                _ => {}
            }
        }
    }

    Ok(Message {
        id,
        body,
        timestamp,
        expires_at,
        attempts: 0, // filled in by the caller from the process-local retry map
        channel,
    })
}

struct ChannelCore<T> {
    consumer: StreamConsumer,
    topic: String,
    group_id: String,
    cfg: ChannelConfig,
    closed: AtomicBool,
    subscribed: AtomicBool,
    retry_counts: Mutex<HashMap<String, u32>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ChannelCore<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn attempts_for(&self, id: &str) -> u32 {
        *self.retry_counts.lock().await.get(id).unwrap_or(&0)
    }

    async fn record_redelivery(&self, id: &str) {
        let mut counts = self.retry_counts.lock().await;
        counts
            .entry(id.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(1);
    }

    async fn forget(&self, id: &str) {
        self.retry_counts.lock().await.remove(id);
    }

    /// Poll once, bounded by `timeout`. `Ok(None)` means nothing arrived
    /// (elapsed, or the only candidate was expired and got committed
    /// without being handed to a handler).
    async fn poll_one(&self, timeout: Duration) -> Result<Option<(Message<T>, OwnedMessage)>, Error> {
        let outcome = tokio::time::timeout(timeout, self.consumer.recv()).await;
        let borrowed = match outcome {
            Err(_elapsed) => return Ok(None),
            Ok(Err(err)) => return Err(Error::backend(err)),
            Ok(Ok(borrowed)) => borrowed,
        };
        let owned = borrowed.detach();
        let mut msg: Message<T> = decode_message(&owned)?;

        if msg.is_expired() {
            if let Err(err) = self.consumer.commit_message(&owned, CommitMode::Async) {
                tracing::warn!(topic = %self.topic, error = %err, "failed to commit expired message");
            }
            return Ok(None);
        }

        msg.attempts = self.attempts_for(&msg.id).await;
        Ok(Some((msg, owned)))
    }

    async fn next_raw(&self) -> Result<(Message<T>, OwnedMessage), Error> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::channel_closed());
            }
            if let Some(pair) = self.poll_one(self.cfg.ack_timeout).await? {
                return Ok(pair);
            }
        }
    }

    async fn try_next_raw(&self, timeout: Duration) -> Result<(Message<T>, OwnedMessage), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::channel_closed());
        }
        if timeout.is_zero() {
            return match self.poll_one(Duration::ZERO).await? {
                Some(pair) => Ok(pair),
                None => Err(Error::no_message()),
            };
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::channel_closed());
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::no_message());
            }
            let bound = remaining.min(self.cfg.ack_timeout);
            if let Some(pair) = self.poll_one(bound).await? {
                return Ok(pair);
            }
        }
    }

    async fn dispatch_outcome(self: &Arc<Self>, msg: Message<T>, owned: OwnedMessage, result: ProcessResult) {
        let should_commit = if !result.retry {
            true
        } else if msg.attempts >= self.cfg.max_retries {
            tracing::warn!(
                topic = %self.topic,
                id = %msg.id,
                attempts = msg.attempts,
                "max retries exceeded, dropping message"
            );
            true
        } else {
            false
        };

        if should_commit {
            self.forget(&msg.id).await;
            if let Err(err) = self.consumer.commit_message(&owned, CommitMode::Async) {
                tracing::warn!(topic = %self.topic, error = %err, "failed to commit offset");
            }
        } else {
            self.record_redelivery(&msg.id).await;
            tokio::time::sleep(self.cfg.retry_delay).await;
            // Deliberately uncommitted: the broker redelivers this record
            // once the consumer's session/rebalance timeout elapses.
        }
    }
}

/// Kafka-backed [`Channel`] implementation: one consumer group per Channel,
/// reading the Topic's shared Kafka topic.
pub struct KafkaChannel<T> {
    core: Arc<ChannelCore<T>>,
}

impl<T> Clone for KafkaChannel<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> KafkaChannel<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Build a Channel bound to consumer group `group_id`, consuming
    /// `topic`.
    pub fn new(
        brokers: &str,
        topic: impl Into<String>,
        group_id: impl Into<String>,
        session_timeout: Duration,
        cfg: ChannelConfig,
    ) -> Result<Self, Error> {
        let topic = topic.into();
        let group_id = group_id.into();

        let consumer: StreamConsumer = rdkafka::ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false")
            .create()
            .map_err(Error::backend)?;
        Consumer::subscribe(&consumer, &[topic.as_str()]).map_err(Error::backend)?;

        Ok(Self {
            core: Arc::new(ChannelCore {
                consumer,
                topic,
                group_id,
                cfg: cfg.normalized(),
                closed: AtomicBool::new(false),
                subscribed: AtomicBool::new(false),
                retry_counts: Mutex::new(HashMap::new()),
                _marker: PhantomData,
            }),
        })
    }

    /// The consumer group backing this Channel.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.core.group_id
    }
}

impl<T> Channel<T> for KafkaChannel<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.core.group_id
    }

    fn next(&self) -> BoxFuture<'_, Result<Message<T>, Error>> {
        Box::pin(async move { self.core.next_raw().await.map(|(msg, _)| msg) })
    }

    fn try_next(&self, timeout: Duration) -> BoxFuture<'_, Result<Message<T>, Error>> {
        Box::pin(async move { self.core.try_next_raw(timeout).await.map(|(msg, _)| msg) })
    }

    fn subscribe(&self, handler: Handler<T>) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            if self.core.subscribed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }

            let semaphore = Arc::new(tokio::sync::Semaphore::new(self.core.cfg.max_in_flight));
            let core = Arc::clone(&self.core);

            tokio::spawn(async move {
                loop {
                    let (msg, owned) = match core.next_raw().await {
                        Ok(pair) => pair,
                        Err(_closed) => break,
                    };

                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                        break;
                    };
                    let handler = Arc::clone(&handler);
                    let core = Arc::clone(&core);

                    tokio::spawn(async move {
                        let _permit = permit;
                        let (result, err) = HandlerRunner::run(&handler, msg.clone()).await;
                        if let Some(err) = &err {
                            tracing::debug!(
                                topic = %core.topic,
                                id = %msg.id,
                                error = %err,
                                "handler returned an error"
                            );
                        }
                        core.dispatch_outcome(msg, owned, result).await;
                    });
                }
                tracing::debug!(topic = %core.topic, "subscribe loop exiting: channel closed");
            });

            Ok(())
        })
    }

    fn ack(&self, _id: &str) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            if self.core.closed.load(Ordering::SeqCst) {
                return Err(Error::channel_closed());
            }
            Ok(())
        })
    }

    fn nack(&self, _id: &str) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            if self.core.closed.load(Ordering::SeqCst) {
                return Err(Error::channel_closed());
            }
            Ok(())
        })
    }

    fn depth(&self) -> BoxFuture<'_, i64> {
        Box::pin(async move { -1 })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            if self.core.closed.swap(true, Ordering::SeqCst) {
                return Err(Error::channel_closed());
            }
            Ok(())
        })
    }

    fn is_closed(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.core.closed.load(Ordering::SeqCst) })
    }
}
