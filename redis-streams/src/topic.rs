//! The Redis Streams [`Topic`] implementation.
//!
//! A Topic itself has no Redis-side representation — only its Channels do,
//! each owning a stream key `"{prefix}{topic}:{channel}"`. Fan-out is a
//! plain loop issuing one XADD per attached Channel, same as the memory
//! backend; what differs is what each Channel does with its copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lrpc_queue_core::channel::Channel;
use lrpc_queue_core::config::TopicConfig;
use lrpc_queue_core::error::Error;
use lrpc_queue_core::message::Message;
use lrpc_queue_core::topic::{BoxFuture, Topic};
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::channel::RedisChannel;

/// Redis Streams-backed [`Topic`] implementation.
pub struct RedisTopic<T> {
    name: String,
    key_prefix: String,
    manager: ConnectionManager,
    default_cfg: TopicConfig,
    channels: RwLock<HashMap<String, RedisChannel<T>>>,
    closed: AtomicBool,
}

impl<T> RedisTopic<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a Topic named `name`, sharing `manager` across every Channel
    /// it creates. `default_cfg` is overlaid under every
    /// `get_or_add_channel` call that doesn't override a given field.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        key_prefix: impl Into<String>,
        manager: ConnectionManager,
        default_cfg: TopicConfig,
    ) -> Self {
        Self {
            name: name.into(),
            key_prefix: key_prefix.into(),
            manager,
            default_cfg,
            channels: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn stream_key(&self, channel: &str) -> String {
        format!("{}{}:{}", self.key_prefix, self.name, channel)
    }

    fn group_name(&self, channel: &str) -> String {
        format!("{}:{}", self.name, channel)
    }
}

impl<T> Topic<T> for RedisTopic<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
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
            {
                let channels = self.channels.read().await;
                if let Some(existing) = channels.get(&name) {
                    return Ok(Arc::new(existing.clone()) as Arc<dyn Channel<T>>);
                }
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
            let channel = RedisChannel::new(
                self.manager.clone(),
                self.stream_key(&name),
                self.group_name(&name),
                cfg.max_msg_size,
                channel_cfg,
            )
            .await?;

            let mut channels = self.channels.write().await;
            // Re-check under the write lock: a concurrent caller may have
            // created it between our read-unlock and this insert.
            let channel = channels.entry(name).or_insert(channel).clone();
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
