//! The Redis Streams [`Channel`] implementation.
//!
//! Each Channel owns one stream key and one consumer group, created
//! (idempotently) at construction. Delivery goes through XREADGROUP, acks
//! through XACK; Nack re-publishes a fresh entry with `attempts + 1` and
//! acks the original, since Redis Streams has no "put it back" primitive.
//!
//! `message.id` (a UUIDv7 string) is not a valid Redis stream entry id, so it
//! travels as an ordinary field; the stream assigns its own entry id via
//! `XADD ... *`, and that entry id — not `message.id` — is what gets XACK'd,
//! XCLAIM'd, and XRANGE'd. A Channel therefore keeps a small in-flight map
//! from `message.id` to the Redis entry id it came from, since the public
//! [`Channel::ack`]/[`Channel::nack`] contract addresses messages by
//! `message.id`.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use lrpc_queue_core::config::ChannelConfig;
use lrpc_queue_core::error::Error;
use lrpc_queue_core::handler::{Handler, HandlerRunner, ProcessResult};
use lrpc_queue_core::message::{new_message_id, Message};
use lrpc_queue_core::topic::BoxFuture;
use lrpc_queue_core::channel::Channel;
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

/// Upper bound on a single XREADGROUP's `BLOCK`, so a channel-wide close is
/// never more than this far from waking a blocked reader.
const MAX_BLOCK: Duration = Duration::from_secs(60);

fn new_consumer_name() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("consumer-{nanos}-{seq}")
}

fn encode_fields<T: Serialize>(msg: &Message<T>) -> Result<Vec<(&'static str, String)>, Error> {
    let body = serde_json::to_string(&msg.body).map_err(Error::backend)?;
    Ok(vec![
        ("id", msg.id.clone()),
        ("body", body),
        ("timestamp", msg.timestamp.to_string()),
        ("channel", msg.channel.clone()),
        ("expires_at", msg.expires_at.to_string()),
        ("attempts", msg.attempts.to_string()),
    ])
}

fn decode_entry<T: DeserializeOwned>(
    entry: &redis::streams::StreamId,
) -> Result<Message<T>, Error> {
    let id: String = entry
        .get("id")
        .ok_or_else(|| Error::backend("stream entry missing id field"))?;
    let body_json: String = entry
        .get("body")
        .ok_or_else(|| Error::backend("stream entry missing body field"))?;
    let body: T = serde_json::from_str(&body_json).map_err(Error::backend)?;
    let timestamp: u64 = entry.get("timestamp").unwrap_or(0);
    let channel: String = entry.get("channel").unwrap_or_default();
    let expires_at: u64 = entry.get("expires_at").unwrap_or(0);
    let attempts: u32 = entry.get("attempts").unwrap_or(0);
    Ok(Message {
        id,
        body,
        timestamp,
        expires_at,
        attempts,
        channel,
    })
}

struct InFlight {
    waiting: Mutex<HashMap<String, String>>,
}

struct ChannelCore<T> {
    manager: ConnectionManager,
    stream_key: String,
    group_name: String,
    max_msg_size: usize,
    cfg: ChannelConfig,
    closed: AtomicBool,
    subscribed: AtomicBool,
    in_flight: InFlight,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ChannelCore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn ensure_group(&self) -> Result<(), Error> {
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<String> = conn
            .xgroup_create_mkstream(&self.stream_key, &self.group_name, "0")
            .await;
        if let Err(err) = result {
            if !err.to_string().contains("BUSYGROUP") {
                return Err(Error::backend(err));
            }
        }
        Ok(())
    }

    async fn publish(&self, msg: Message<T>) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::channel_closed());
        }
        let fields = encode_fields(&msg)?;
        let mut conn = self.manager.clone();
        let _entry_id: String = conn
            .xadd_maxlen(
                &self.stream_key,
                StreamMaxlen::Approx(self.max_msg_size),
                "*",
                &fields,
            )
            .await
            .map_err(Error::backend)?;
        Ok(())
    }

    /// Read at most one entry, blocking up to `block_ms` (`None` ⇒ no
    /// `BLOCK` clause at all, the one-shot `TryNext(0)` case). Returns `Ok(None)`
    /// when nothing arrived (timeout, or the only candidate was expired and
    /// got silently acked).
    async fn read_one(&self, block_ms: Option<u64>) -> Result<Option<Message<T>>, Error> {
        let mut conn = self.manager.clone();
        let consumer = new_consumer_name();
        let mut opts = StreamReadOptions::default()
            .group(&self.group_name, &consumer)
            .count(1);
        if let Some(ms) = block_ms {
            opts = opts.block(ms as usize);
        }
        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[self.stream_key.as_str()], &[">"], &opts)
            .await
            .map_err(Error::backend)?;

        let Some(stream) = reply.keys.into_iter().find(|k| k.key == self.stream_key) else {
            return Ok(None);
        };
        let Some(entry) = stream.ids.into_iter().next() else {
            return Ok(None);
        };

        let msg: Message<T> = decode_entry(&entry)?;
        if msg.is_expired() {
            let _: redis::RedisResult<i64> = conn
                .xack(&self.stream_key, &self.group_name, &[entry.id.as_str()])
                .await;
            return Ok(None);
        }

        self.in_flight
            .waiting
            .lock()
            .await
            .insert(msg.id.clone(), entry.id.clone());
        Ok(Some(msg))
    }

    async fn next(&self) -> Result<Message<T>, Error> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::channel_closed());
            }
            let block_ms = self.cfg.ack_timeout.min(MAX_BLOCK).as_millis() as u64;
            if let Some(msg) = self.read_one(Some(block_ms)).await? {
                return Ok(msg);
            }
        }
    }

    async fn try_next(&self, timeout: Duration) -> Result<Message<T>, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::channel_closed());
        }
        if timeout.is_zero() {
            return match self.read_one(None).await? {
                Some(msg) => Ok(msg),
                None => Err(Error::no_message()),
            };
        }
        let deadline = Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::channel_closed());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::no_message());
            }
            let block_ms = remaining.min(self.cfg.ack_timeout.min(MAX_BLOCK)).as_millis() as u64;
            if let Some(msg) = self.read_one(Some(block_ms)).await? {
                return Ok(msg);
            }
        }
    }

    async fn ack(&self, id: &str) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::channel_closed());
        }
        let entry_id = self.in_flight.waiting.lock().await.remove(id);
        let Some(entry_id) = entry_id else {
            return Ok(()); // unknown/already-acked id: benign, as XACK itself is
        };
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .xack(&self.stream_key, &self.group_name, &[entry_id.as_str()])
            .await
            .map_err(Error::backend)?;
        Ok(())
    }

    /// Shared by the public `Nack` (always bumps `attempts`) and the
    /// `Subscribe` loop's `skip_attempts` path (republishes unchanged).
    async fn requeue(&self, id: &str, bump_attempts: bool) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::channel_closed());
        }
        let entry_id = self.in_flight.waiting.lock().await.remove(id);
        let Some(entry_id) = entry_id else {
            return Ok(());
        };

        let mut conn = self.manager.clone();
        let range: redis::streams::StreamRangeReply = conn
            .xrange(&self.stream_key, entry_id.as_str(), entry_id.as_str())
            .await
            .map_err(Error::backend)?;
        let Some(entry) = range.ids.into_iter().next() else {
            // Already gone (race with a concurrent claim); nothing to redeliver.
            return Ok(());
        };

        let original: Message<T> = decode_entry(&entry)?;
        let redelivered = if bump_attempts {
            Message {
                id: new_message_id(),
                attempts: original.attempts + 1,
                ..original
            }
        } else {
            Message {
                id: new_message_id(),
                ..original
            }
        };
        self.publish(redelivered).await?;

        let _: i64 = conn
            .xack(&self.stream_key, &self.group_name, &[entry_id.as_str()])
            .await
            .map_err(Error::backend)?;
        Ok(())
    }

    async fn depth(&self) -> i64 {
        let mut conn = self.manager.clone();
        let len: i64 = conn.xlen(&self.stream_key).await.unwrap_or(0);
        let pending: redis::RedisResult<(i64, Option<String>, Option<String>, Option<Vec<(String, String)>>)> =
            redis::cmd("XPENDING")
                .arg(&self.stream_key)
                .arg(&self.group_name)
                .query_async(&mut conn)
                .await;
        let pending_count = pending.map(|(count, ..)| count).unwrap_or(0);
        len + pending_count
    }

    /// Second close returns `ChannelClosed`, unlike the memory backend's
    /// tolerant double-close.
    async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::channel_closed());
        }
        Ok(())
    }

    async fn dispatch_outcome(self: &Arc<Self>, msg: Message<T>, result: ProcessResult) {
        if !result.retry {
            let _ = self.ack(&msg.id).await;
            return;
        }
        if msg.attempts >= self.cfg.max_retries {
            tracing::warn!(
                stream = %self.stream_key,
                id = %msg.id,
                attempts = msg.attempts,
                "max retries exceeded, dropping message"
            );
            let _ = self.ack(&msg.id).await;
            return;
        }
        if let Err(err) = self.requeue(&msg.id, !result.skip_attempts).await {
            tracing::warn!(stream = %self.stream_key, error = %err, "failed to redeliver message");
        }
    }
}

/// Redis Streams-backed [`Channel`] implementation.
pub struct RedisChannel<T> {
    core: Arc<ChannelCore<T>>,
}

impl<T> Clone for RedisChannel<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> RedisChannel<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Construct a Channel bound to `stream_key`/`group_name`, creating the
    /// consumer group if it doesn't already exist (`BUSYGROUP` is ignored).
    pub async fn new(
        manager: ConnectionManager,
        stream_key: impl Into<String>,
        group_name: impl Into<String>,
        max_msg_size: usize,
        cfg: ChannelConfig,
    ) -> Result<Self, Error> {
        let core = Arc::new(ChannelCore {
            manager,
            stream_key: stream_key.into(),
            group_name: group_name.into(),
            max_msg_size,
            cfg: cfg.normalized(),
            closed: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            in_flight: InFlight {
                waiting: Mutex::new(HashMap::new()),
            },
            _marker: PhantomData,
        });
        core.ensure_group().await?;
        Ok(Self { core })
    }

    /// Fan-out entry point used by the owning Topic.
    pub async fn publish_internal(&self, msg: Message<T>) -> Result<(), Error> {
        self.core.publish(msg).await
    }
}

impl<T> Channel<T> for RedisChannel<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.core.stream_key
    }

    fn next(&self) -> BoxFuture<'_, Result<Message<T>, Error>> {
        Box::pin(self.core.next())
    }

    fn try_next(&self, timeout: Duration) -> BoxFuture<'_, Result<Message<T>, Error>> {
        Box::pin(self.core.try_next(timeout))
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
                    let msg = match core.next().await {
                        Ok(msg) => msg,
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
                                stream = %core.stream_key,
                                id = %msg.id,
                                error = %err,
                                "handler returned an error"
                            );
                        }
                        core.dispatch_outcome(msg, result).await;
                    });
                }
                tracing::debug!(stream = %core.stream_key, "subscribe loop exiting: channel closed");
            });

            Ok(())
        })
    }

    fn ack(&self, id: &str) -> BoxFuture<'_, Result<(), Error>> {
        let id = id.to_string();
        Box::pin(async move { self.core.ack(&id).await })
    }

    fn nack(&self, id: &str) -> BoxFuture<'_, Result<(), Error>> {
        let id = id.to_string();
        Box::pin(async move { self.core.requeue(&id, true).await })
    }

    fn depth(&self) -> BoxFuture<'_, i64> {
        Box::pin(self.core.depth())
    }

    fn close(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(self.core.close())
    }

    fn is_closed(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.core.closed.load(Ordering::SeqCst) })
    }
}
