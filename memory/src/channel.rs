//! The in-process [`Channel`] implementation.
//!
//! Per-Channel state is a `queue: VecDeque<Message<T>>` plus a `waiting: HashSet<String>`
//! of in-flight ids, guarded by a single `tokio::sync::Mutex` with a
//! `tokio::sync::Notify` standing in for a condvar: `Notify::notified()` is
//! created *while still holding the lock*, so a publish that lands between
//! the emptiness check and the `.await` is never missed (the same hazard a
//! condvar's "wait atomically releases the mutex" guarantee exists to
//! avoid).

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use lrpc_queue_core::config::ChannelConfig;
use lrpc_queue_core::error::Error;
use lrpc_queue_core::handler::{Handler, HandlerRunner, ProcessResult};
use lrpc_queue_core::message::{new_message_id, Message};
use lrpc_queue_core::topic::BoxFuture;
use lrpc_queue_core::channel::Channel;
use tokio::sync::{Mutex, Notify, Semaphore};

struct Inner<T> {
    queue: VecDeque<Message<T>>,
    waiting: HashSet<String>,
    closed: bool,
    subscribed: bool,
}

struct ChannelCore<T> {
    name: String,
    cfg: ChannelConfig,
    state: Mutex<Inner<T>>,
    notify: Notify,
}

impl<T> ChannelCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Append `msg` to the tail of the queue and wake one waiter. Rejects
    /// with [`Error::channel_closed`] if the Channel is closed.
    async fn enqueue(&self, msg: Message<T>) -> Result<(), Error> {
        let mut inner = self.state.lock().await;
        if inner.closed {
            return Err(Error::channel_closed());
        }
        inner.queue.push_back(msg);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    async fn next(&self) -> Result<Message<T>, Error> {
        loop {
            let notified = {
                let mut inner = self.state.lock().await;
                // Drain expired entries silently; they're never handed to a
                // handler. A run of several expired messages in a row is
                // just skipped in the same lock acquisition.
                while let Some(msg) = inner.queue.pop_front() {
                    if msg.is_expired() {
                        continue;
                    }
                    inner.waiting.insert(msg.id.clone());
                    return Ok(msg);
                }
                if inner.closed {
                    return Err(Error::channel_closed());
                }
                // Register interest before releasing the lock: any enqueue
                // or close that happens after this point (even before we
                // `.await` below) is guaranteed to wake us.
                self.notify.notified()
            };
            notified.await;
        }
    }

    async fn try_next(&self, timeout: Duration) -> Result<Message<T>, Error> {
        if timeout.is_zero() {
            let mut inner = self.state.lock().await;
            if inner.closed {
                return Err(Error::channel_closed());
            }
            while let Some(msg) = inner.queue.pop_front() {
                if msg.is_expired() {
                    continue;
                }
                inner.waiting.insert(msg.id.clone());
                return Ok(msg);
            }
            return Err(Error::no_message());
        }
        match tokio::time::timeout(timeout, self.next()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(Error::no_message()),
        }
    }

    async fn ack(&self, id: &str) -> Result<(), Error> {
        let mut inner = self.state.lock().await;
        if inner.closed {
            return Err(Error::channel_closed());
        }
        inner.waiting.remove(id);
        Ok(())
    }

    /// Nack just drops the in-flight entry. No re-enqueue happens here;
    /// redelivery is the Subscribe loop's job.
    async fn nack(&self, id: &str) -> Result<(), Error> {
        let mut inner = self.state.lock().await;
        if inner.closed {
            return Err(Error::channel_closed());
        }
        inner.waiting.remove(id);
        Ok(())
    }

    async fn depth(&self) -> i64 {
        let inner = self.state.lock().await;
        (inner.queue.len() + inner.waiting.len()) as i64
    }

    /// Memory channels tolerate a second close: it's just a no-op.
    async fn close(&self) {
        let mut inner = self.state.lock().await;
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Apply a handler's [`ProcessResult`] to a delivered message: ack,
    /// drop-after-max-retries, or redeliver.
    async fn dispatch_outcome(self: &Arc<Self>, msg: Message<T>, result: ProcessResult) {
        if !result.retry {
            let _ = self.ack(&msg.id).await;
            return;
        }
        if msg.attempts >= self.cfg.max_retries {
            tracing::warn!(
                channel = %self.name,
                id = %msg.id,
                attempts = msg.attempts,
                "max retries exceeded, dropping message"
            );
            let _ = self.ack(&msg.id).await;
            return;
        }
        let _ = self.nack(&msg.id).await;
        let redelivered = if result.skip_attempts {
            let mut copy = msg.clone();
            copy.id = new_message_id();
            copy
        } else {
            msg.redelivered()
        };
        if let Err(err) = self.enqueue(redelivered).await {
            tracing::warn!(channel = %self.name, error = %err, "failed to redeliver message");
        }
    }
}

/// In-process [`Channel`] implementation.
///
/// Cheaply cloneable: internally just an `Arc` around the shared state, so
/// the `Subscribe` loop can hold its own handle without borrowing `&self`
/// across an `.await` boundary that outlives the call.
pub struct MemoryChannel<T> {
    core: Arc<ChannelCore<T>>,
}

impl<T> Clone for MemoryChannel<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> MemoryChannel<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new, empty Channel named `name` with a normalized config.
    #[must_use]
    pub fn new(name: impl Into<String>, cfg: ChannelConfig) -> Self {
        Self {
            core: Arc::new(ChannelCore {
                name: name.into(),
                cfg: cfg.normalized(),
                state: Mutex::new(Inner {
                    queue: VecDeque::new(),
                    waiting: HashSet::new(),
                    closed: false,
                    subscribed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Append a message, used by the owning Topic's fan-out. Not part of the
    /// public [`Channel`] trait: publishing only ever happens through a
    /// Topic.
    pub async fn publish_internal(&self, msg: Message<T>) -> Result<(), Error> {
        self.core.enqueue(msg).await
    }
}

impl<T> Channel<T> for MemoryChannel<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.core.name
    }

    fn next(&self) -> BoxFuture<'_, Result<Message<T>, Error>> {
        Box::pin(self.core.next())
    }

    fn try_next(&self, timeout: Duration) -> BoxFuture<'_, Result<Message<T>, Error>> {
        Box::pin(self.core.try_next(timeout))
    }

    fn subscribe(&self, handler: Handler<T>) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            {
                let mut inner = self.core.state.lock().await;
                if inner.subscribed {
                    return Ok(());
                }
                inner.subscribed = true;
            }

            let semaphore = Arc::new(Semaphore::new(self.core.cfg.max_in_flight));
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
                                channel = %core.name,
                                id = %msg.id,
                                error = %err,
                                "handler returned an error"
                            );
                        }
                        core.dispatch_outcome(msg, result).await;
                    });
                }
                tracing::debug!(channel = %core.name, "subscribe loop exiting: channel closed");
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
        Box::pin(async move { self.core.nack(&id).await })
    }

    fn depth(&self) -> BoxFuture<'_, i64> {
        Box::pin(self.core.depth())
    }

    fn close(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.core.close().await;
            Ok(())
        })
    }

    fn is_closed(&self) -> BoxFuture<'_, bool> {
        Box::pin(self.core.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn channel(max_in_flight: usize) -> MemoryChannel<i32> {
        MemoryChannel::new(
            "c",
            ChannelConfig {
                max_in_flight,
                ..ChannelConfig::default()
            },
        )
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn next_blocks_until_publish() {
        let ch = channel(10);
        let reader = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.publish_internal(Message::new(7)).await })
        };
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        let msg = ch.core.next().await.expect("message");
        assert_eq!(msg.body, 7);
        reader.await.expect("publish task").expect("publish ok");
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn next_silently_skips_expired_messages() {
        let ch = channel(10);
        let mut expired = Message::new(1);
        expired.expires_at = 1; // unix epoch + 1s, long past
        ch.publish_internal(expired).await.expect("pub expired");
        ch.publish_internal(Message::new(2)).await.expect("pub live");

        let msg = ch.core.next().await.expect("next");
        assert_eq!(msg.body, 2);
        assert_eq!(ch.core.depth().await, 1); // only the live message in-flight
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn try_next_zero_timeout_skips_expired_and_finds_no_message() {
        let ch = channel(10);
        let mut expired = Message::new(1);
        expired.expires_at = 1;
        ch.publish_internal(expired).await.expect("pub expired");

        let err = ch.core.try_next(Duration::ZERO).await.unwrap_err();
        assert_eq!(err, Error::no_message());
    }

    #[tokio::test]
    async fn try_next_zero_timeout_on_empty_queue_is_immediate() {
        let ch = channel(10);
        let err = ch.core.try_next(Duration::ZERO).await.unwrap_err();
        assert_eq!(err, Error::no_message());
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn try_next_returns_message_published_mid_wait() {
        let ch = channel(10);
        let ch2 = ch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            let _ = ch2.publish_internal(Message::new(1)).await;
        });
        let msg = ch
            .core
            .try_next(Duration::from_millis(200))
            .await
            .expect("message");
        assert_eq!(msg.body, 1);
    }

    #[tokio::test]
    async fn try_next_returns_channel_closed_when_closed_mid_wait() {
        let ch = channel(10);
        let ch2 = ch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            ch2.core.close().await;
        });
        let err = ch
            .core
            .try_next(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err, Error::channel_closed());
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn depth_counts_queued_and_in_flight() {
        let ch = channel(10);
        ch.publish_internal(Message::new(1)).await.expect("pub");
        ch.publish_internal(Message::new(2)).await.expect("pub");
        assert_eq!(ch.core.depth().await, 2);

        let msg = ch.core.next().await.expect("next");
        assert_eq!(ch.core.depth().await, 2); // one queued, one in-flight

        ch.core.ack(&msg.id).await.expect("ack");
        assert_eq!(ch.core.depth().await, 1);
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn ack_is_idempotent() {
        let ch = channel(10);
        ch.publish_internal(Message::new(1)).await.expect("pub");
        let msg = ch.core.next().await.expect("next");
        ch.core.ack(&msg.id).await.expect("ack once");
        ch.core.ack(&msg.id).await.expect("ack twice is a no-op");
    }

    #[tokio::test]
    async fn double_close_is_a_no_op_on_memory_backend() {
        let ch = channel(10);
        ch.core.close().await;
        ch.core.close().await; // must not panic or error
        assert!(ch.core.is_closed().await);
    }

    #[tokio::test]
    async fn closed_channel_rejects_next_and_ack() {
        let ch = channel(10);
        ch.core.close().await;
        assert_eq!(ch.core.next().await.unwrap_err(), Error::channel_closed());
        assert_eq!(
            ch.core.ack("missing").await.unwrap_err(),
            Error::channel_closed()
        );
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn subscribe_caps_concurrent_handlers() {
        let ch = channel(3);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let concurrent2 = Arc::clone(&concurrent);
        let max_seen2 = Arc::clone(&max_seen);
        let completed2 = Arc::clone(&completed);

        let handler: Handler<i32> = Arc::new(move |_msg| {
            let concurrent = Arc::clone(&concurrent2);
            let max_seen = Arc::clone(&max_seen2);
            let completed = Arc::clone(&completed2);
            Box::pin(async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(StdDuration::from_millis(50)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
                (ProcessResult::ack(), None)
            })
        });

        ch.subscribe(Arc::clone(&handler)).await.expect("subscribe");
        for i in 0..10 {
            ch.publish_internal(Message::new(i)).await.expect("pub");
        }

        tokio::time::sleep(StdDuration::from_millis(500)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 10);
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn retry_exhaustion_drops_after_max_retries() {
        let attempts_seen = Arc::new(Mutex::new(Vec::new()));
        let attempts_seen2 = Arc::clone(&attempts_seen);

        let handler: Handler<i32> = Arc::new(move |msg| {
            let attempts_seen = Arc::clone(&attempts_seen2);
            Box::pin(async move {
                attempts_seen.lock().await.push(msg.attempts);
                if msg.attempts < 2 {
                    (ProcessResult::retry(), None)
                } else {
                    (ProcessResult::ack(), None)
                }
            })
        });

        let cfg = ChannelConfig {
            max_retries: 3,
            max_in_flight: 1,
            ..ChannelConfig::default()
        };
        let ch = MemoryChannel::new("retry", cfg);
        ch.subscribe(Arc::clone(&handler)).await.expect("subscribe");
        ch.publish_internal(Message::new(1)).await.expect("pub");

        tokio::time::sleep(StdDuration::from_millis(300)).await;
        let seen = attempts_seen.lock().await.clone();
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(ch.core.depth().await, 0);
        let _ = ch; // keep alive through assertions
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    #[allow(clippy::panic)]
    async fn panicking_handler_does_not_kill_the_loop() {
        let ch = channel(1);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let handler: Handler<i32> = Arc::new(move |msg| {
            let seen = Arc::clone(&seen2);
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
                if msg.body == 1 {
                    panic!("boom");
                }
                (ProcessResult::ack(), None)
            })
        });

        ch.subscribe(Arc::clone(&handler)).await.expect("subscribe");
        ch.publish_internal(Message::new(1)).await.expect("pub");
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        ch.publish_internal(Message::new(2)).await.expect("pub");
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        assert!(seen.load(Ordering::SeqCst) >= 2);
    }
}
