//! The in-process [`Topic`] implementation.
//!
//! `MemoryTopic<T>` owns a name → Channel map behind a `tokio::sync::RwLock`:
//! readers (fan-out, lookup) take a shared lock, structural mutation
//! (`get_or_add_channel`, `close`) takes an exclusive one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lrpc_queue_core::channel::Channel;
use lrpc_queue_core::config::TopicConfig;
use lrpc_queue_core::error::Error;
use lrpc_queue_core::message::Message;
use lrpc_queue_core::topic::{BoxFuture, Topic};
use tokio::sync::RwLock;

use crate::channel::MemoryChannel;

/// In-process [`Topic`] implementation: fan-out is a plain loop over an
/// in-memory map of Channels, no broker round-trip involved.
pub struct MemoryTopic<T> {
    name: String,
    default_cfg: TopicConfig,
    channels: RwLock<HashMap<String, MemoryChannel<T>>>,
    closed: AtomicBool,
}

impl<T> MemoryTopic<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new, channel-less Topic named `name`. `default_cfg` is
    /// overlaid under every `get_or_add_channel` call that doesn't
    /// override a given field.
    #[must_use]
    pub fn new(name: impl Into<String>, default_cfg: TopicConfig) -> Self {
        Self {
            name: name.into(),
            default_cfg,
            channels: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl<T> Topic<T> for MemoryTopic<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn publish_msg(&self, msg: Message<T>) -> BoxFuture<'_, Result<(), Error>>
    where
        T: Clone + 'static,
    {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::topic_closed());
            }
            let msg = msg.normalize();
            let channels = self.channels.read().await;
            for (name, channel) in channels.iter() {
                let copy = msg.fanned_out_to(name);
                if let Err(err) = channel.publish_internal(copy).await {
                    tracing::warn!(
                        topic = %self.name,
                        channel = %name,
                        error = %err,
                        "failed to fan out message to channel"
                    );
                }
            }
            Ok(())
        })
    }

    fn publish_msg_batch(&self, msgs: Vec<Message<T>>) -> BoxFuture<'_, Result<(), Error>>
    where
        T: Clone + 'static,
    {
        Box::pin(async move {
            for msg in msgs {
                self.publish_msg(msg).await?;
            }
            Ok(())
        })
    }

    fn get_or_add_channel(
        &self,
        name: &str,
        cfg: TopicConfig,
    ) -> BoxFuture<'_, Result<Arc<dyn Channel<T>>, Error>>
    where
        T: Clone + 'static,
    {
        let name = name.to_string();
        Box::pin(async move {
            let mut channels = self.channels.write().await;
            if let Some(existing) = channels.get(&name) {
                return Ok(Arc::new(existing.clone()) as Arc<dyn Channel<T>>);
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::topic_closed());
            }
            let cfg = cfg.overlay(&self.default_cfg);
            let channel_cfg = lrpc_queue_core::config::ChannelConfig {
                max_retries: cfg.max_retries,
                retry_delay: cfg.retry_delay,
                message_ttl: cfg.message_ttl,
                max_in_flight: cfg.max_in_flight,
                ack_timeout: cfg.ack_timeout,
            };
            let channel = MemoryChannel::new(name.clone(), channel_cfg);
            channels.insert(name, channel.clone());
            Ok(Arc::new(channel) as Arc<dyn Channel<T>>)
        })
    }

    fn get_channel(&self, name: &str) -> BoxFuture<'_, Result<Arc<dyn Channel<T>>, Error>>
    where
        T: Clone + 'static,
    {
        let name = name.to_string();
        Box::pin(async move {
            let channels = self.channels.read().await;
            channels
                .get(&name)
                .map(|c| Arc::new(c.clone()) as Arc<dyn Channel<T>>)
                .ok_or_else(Error::channel_not_found)
        })
    }

    fn channel_list(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move { self.channels.read().await.keys().cloned().collect() })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            let channels = self.channels.read().await;
            for (name, channel) in channels.iter() {
                if let Err(err) = channel.close().await {
                    tracing::warn!(
                        topic = %self.name,
                        channel = %name,
                        error = %err,
                        "failed to close channel"
                    );
                }
            }
        })
    }

    fn is_closed(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.closed.load(Ordering::SeqCst) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn publish_fans_out_independent_copies_to_every_channel() {
        let topic = MemoryTopic::new("orders", TopicConfig::default());
        let a = topic
            .get_or_add_channel("a", TopicConfig::default())
            .await
            .expect("channel a");
        let b = topic
            .get_or_add_channel("b", TopicConfig::default())
            .await
            .expect("channel b");

        topic.publish(42).await.expect("publish");

        let msg_a = a.try_next(Duration::from_millis(100)).await.expect("a gets message");
        let msg_b = b.try_next(Duration::from_millis(100)).await.expect("b gets message");
        assert_eq!(msg_a.body, 42);
        assert_eq!(msg_b.body, 42);
        assert_ne!(msg_a.id, ""); // fan-out preserves id, doesn't regenerate per channel
        assert_eq!(msg_a.id, msg_b.id);
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn get_or_add_channel_is_idempotent() {
        let topic = MemoryTopic::new("t", TopicConfig::default());
        let first = topic
            .get_or_add_channel("c", TopicConfig::default())
            .await
            .expect("first");
        let second = topic
            .get_or_add_channel("c", TopicConfig::default())
            .await
            .expect("second");
        assert_eq!(first.name(), second.name());
        assert_eq!(topic.channel_list().await.len(), 1);
    }

    #[tokio::test]
    async fn get_channel_missing_is_not_found() {
        let topic: MemoryTopic<i32> = MemoryTopic::new("t", TopicConfig::default());
        let err = topic.get_channel("nope").await.unwrap_err();
        assert_eq!(err, Error::channel_not_found());
    }

    #[tokio::test]
    async fn publish_after_close_is_rejected() {
        let topic = MemoryTopic::new("t", TopicConfig::default());
        topic.close().await;
        let err = topic.publish(1).await.unwrap_err();
        assert_eq!(err, Error::topic_closed());
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn close_is_idempotent_and_closes_all_channels() {
        let topic = MemoryTopic::new("t", TopicConfig::default());
        let ch = topic
            .get_or_add_channel("c", TopicConfig::default())
            .await
            .expect("channel");
        topic.close().await;
        topic.close().await; // must not panic
        assert!(ch.is_closed().await);
        assert!(topic.is_closed().await);
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn get_or_add_channel_honours_max_in_flight_override() {
        let topic: MemoryTopic<i32> = MemoryTopic::new("t", TopicConfig::default());
        let cfg = TopicConfig {
            max_in_flight: 1,
            ack_timeout: Duration::from_millis(50),
            ..TopicConfig::default()
        };
        let channel = topic.get_or_add_channel("c", cfg).await.expect("channel");

        let concurrent = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let max_seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let concurrent2 = Arc::clone(&concurrent);
        let max_seen2 = Arc::clone(&max_seen);
        let handler: lrpc_queue_core::handler::Handler<i32> = Arc::new(move |_msg| {
            let concurrent = Arc::clone(&concurrent2);
            let max_seen = Arc::clone(&max_seen2);
            Box::pin(async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
                (lrpc_queue_core::handler::ProcessResult::ack(), None)
            })
        });

        channel.subscribe(handler).await.expect("subscribe");
        for i in 0..5 {
            topic.publish(i).await.expect("publish");
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(max_seen.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn get_or_add_channel_after_close_fails() {
        let topic: MemoryTopic<i32> = MemoryTopic::new("t", TopicConfig::default());
        topic.close().await;
        let err = topic
            .get_or_add_channel("new", TopicConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err, Error::topic_closed());
    }
}
