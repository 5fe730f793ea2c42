//! # lrpc-queue
//!
//! The Queue facade: selects a storage backend from a [`QueueConfig`], owns
//! (or reuses an injected) backend client, and hands back a
//! backend-specific [`Topic`] implementing the same contract regardless of
//! which backend built it.
//!
//! Construct a [`QueueBuilder`], optionally inject a pre-built Redis
//! client, then `.build()`.

use std::sync::Arc;

use lrpc_queue_core::config::{QueueConfig, StorageType, TopicConfig};
use lrpc_queue_core::error::Error;
use lrpc_queue_core::topic::Topic;
use lrpc_queue_kafka::KafkaTopic;
use lrpc_queue_memory::MemoryTopic;
use lrpc_queue_redis::RedisTopic;
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Builds a [`Queue`], optionally injecting a pre-built Redis client.
#[derive(Default)]
pub struct QueueBuilder {
    config: QueueConfig,
    redis_client: Option<ConnectionManager>,
}

impl QueueBuilder {
    /// Start from `config`, normalized eagerly.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config: config.normalized(),
            redis_client: None,
        }
    }

    /// Reuse an already-connected Redis client instead of constructing one
    /// from `RedisConfig`. The Queue will not own (and will not close) an
    /// injected client.
    #[must_use]
    pub fn redis_client(mut self, client: ConnectionManager) -> Self {
        self.redis_client = Some(client);
        self
    }

    /// Finish building the Queue.
    ///
    /// # Panics
    ///
    /// When `storage_type == Redis` and no client was injected, this
    /// constructs one from `RedisConfig` and pings it, panicking if that
    /// initial ping fails. This is a deliberate fail-fast boundary, not a
    /// recoverable error — a Queue that can't reach its configured Redis at
    /// startup has nothing useful to do.
    #[allow(clippy::panic)]
    pub async fn build(self) -> Queue {
        let (redis_client, owns_redis_client) = match self.config.storage_type {
            StorageType::Redis => match self.redis_client {
                Some(client) => (Some(client), false),
                None => {
                    let client = redis::Client::open(format!("redis://{}", self.config.redis.addr))
                        .unwrap_or_else(|err| panic!("invalid redis address: {err}"));
                    let mut manager = ConnectionManager::new(client)
                        .await
                        .unwrap_or_else(|err| panic!("failed to connect to redis: {err}"));
                    redis::cmd("PING")
                        .query_async::<_, String>(&mut manager)
                        .await
                        .unwrap_or_else(|err| panic!("redis ping failed: {err}"));
                    (Some(manager), true)
                }
            },
            StorageType::Memory | StorageType::Kafka => (None, false),
        };

        Queue {
            config: self.config,
            redis_client,
            owns_redis_client,
        }
    }
}

/// The storage-agnostic entry point: selects a backend and builds
/// [`Topic`]s on top of it.
pub struct Queue {
    config: QueueConfig,
    redis_client: Option<ConnectionManager>,
    owns_redis_client: bool,
}

impl Queue {
    /// Build a Queue directly from a normalized config, with no injected
    /// Redis client. Shorthand for `QueueBuilder::new(config).build()`.
    pub async fn new(config: QueueConfig) -> Self {
        QueueBuilder::new(config).build().await
    }

    /// Start a builder, for injecting a pre-built Redis client.
    #[must_use]
    pub fn builder(config: QueueConfig) -> QueueBuilder {
        QueueBuilder::new(config)
    }

    /// Build (or look up) a Topic named `name` on the Queue's configured
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the Redis or Kafka backend fails to
    /// initialize (e.g. unreachable broker on first Kafka topic creation).
    pub async fn new_topic<T>(
        &self,
        name: impl Into<String>,
        topic_cfg: TopicConfig,
    ) -> Result<Arc<dyn Topic<T>>, Error>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let name = name.into();
        let topic_cfg = topic_cfg.normalized(&self.config);

        match self.config.storage_type {
            StorageType::Memory => {
                Ok(Arc::new(MemoryTopic::<T>::new(name, topic_cfg)) as Arc<dyn Topic<T>>)
            }
            StorageType::Redis => {
                let manager = self
                    .redis_client
                    .clone()
                    .ok_or_else(|| Error::backend("redis client not initialized"))?;
                Ok(Arc::new(RedisTopic::<T>::new(
                    name,
                    self.config.redis.key_prefix.clone(),
                    manager,
                    topic_cfg,
                )) as Arc<dyn Topic<T>>)
            }
            StorageType::Kafka => {
                let kafka = &self.config.kafka;
                let topic = KafkaTopic::<T>::new(
                    name,
                    kafka.topic_prefix.clone(),
                    kafka.brokers_csv(),
                    kafka.session_timeout,
                    kafka.partitions,
                    kafka.replication_factor,
                    topic_cfg,
                )
                .await?;
                Ok(Arc::new(topic) as Arc<dyn Topic<T>>)
            }
        }
    }

    /// Close the Queue: drops its owned Redis client (never an injected
    /// one). Kafka has no Queue-level client to close — each Topic owns
    /// its own producer/consumers.
    pub async fn close(&mut self) {
        if self.owns_redis_client {
            self.redis_client = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrpc_queue_core::channel::Channel;
    use std::time::Duration;

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn memory_backend_round_trips_through_the_facade() {
        let queue = Queue::new(QueueConfig::default()).await;
        let topic: Arc<dyn Topic<i32>> = queue
            .new_topic("orders", TopicConfig::default())
            .await
            .expect("failed to create topic");
        let channel = topic
            .get_or_add_channel("workers", TopicConfig::default())
            .await
            .expect("failed to create channel");

        topic.publish(42).await.expect("publish");
        let msg = channel
            .try_next(Duration::from_millis(100))
            .await
            .expect("message delivered");
        assert_eq!(msg.body, 42);
    }

    #[tokio::test]
    async fn close_on_memory_backend_is_a_no_op() {
        let mut queue = Queue::new(QueueConfig::default()).await;
        queue.close().await;
        assert!(!queue.owns_redis_client);
    }
}
