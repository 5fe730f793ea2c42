//! The Kafka [`Topic`] implementation.
//!
//! A Topic here is a single underlying Kafka topic named `{prefix}{name}`.
//! Unlike the memory and Redis backends, `publish_msg` writes the record
//! exactly once — fan-out to every attached Channel is Kafka's own
//! consumer-group replication, not anything this crate loops over.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lrpc_queue_core::channel::Channel;
use lrpc_queue_core::config::{ChannelConfig, TopicConfig};
use lrpc_queue_core::error::Error;
use lrpc_queue_core::message::Message;
use lrpc_queue_core::topic::{BoxFuture, Topic};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::util::Timeout;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::channel::KafkaChannel;

fn encode_headers<T>(msg: &Message<T>) -> OwnedHeaders {
    OwnedHeaders::new()
        .insert(Header {
            key: "timestamp",
            value: Some(&msg.timestamp.to_string()),
        })
        .insert(Header {
            key: "expires_at",
            value: Some(&msg.expires_at.to_string()),
        })
        .insert(Header {
            key: "channel",
            value: Some(&msg.channel),
        })
}

/// Kafka-backed [`Topic`] implementation.
pub struct KafkaTopic<T> {
    name: String,
    topic_name: String,
    brokers: String,
    session_timeout: Duration,
    producer: FutureProducer,
    default_cfg: TopicConfig,
    channels: RwLock<HashMap<String, KafkaChannel<T>>>,
    closed: AtomicBool,
}

impl<T> KafkaTopic<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a Topic named `name`, backed by the Kafka topic
    /// `{prefix}{name}`. Attempts to create that topic if it doesn't exist
    /// yet; a `TopicAlreadyExists` response is treated as success.
    /// `default_cfg` is overlaid under every `get_or_add_channel` call that
    /// doesn't override a given field.
    pub async fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        brokers: impl Into<String>,
        session_timeout: Duration,
        partitions: i32,
        replication: i32,
        default_cfg: TopicConfig,
    ) -> Result<Self, Error> {
        let name = name.into();
        let brokers = brokers.into();
        let topic_name = format!("{}{}", prefix.into(), name);

        let producer: FutureProducer = rdkafka::ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(Error::backend)?;

        let admin: AdminClient<DefaultClientContext> = rdkafka::ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .create()
            .map_err(Error::backend)?;
        let new_topic = NewTopic::new(&topic_name, partitions, TopicReplication::Fixed(replication));
        if let Err(errs) = admin.create_topics(&[new_topic], &AdminOptions::new()).await {
            tracing::debug!(topic = %topic_name, error = %errs, "topic creation request failed");
        }

        Ok(Self {
            name,
            topic_name,
            brokers,
            session_timeout,
            producer,
            default_cfg,
            channels: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn group_id(&self, channel: &str) -> String {
        format!("{}-{}", self.topic_name, channel)
    }
}

impl<T> Topic<T> for KafkaTopic<T>
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
            let payload = serde_json::to_vec(&msg.body).map_err(Error::backend)?;
            let headers = encode_headers(&msg);
            let record = FutureRecord::to(&self.topic_name)
                .key(&msg.id)
                .payload(&payload)
                .headers(headers);

            self.producer
                .send(record, Timeout::After(Duration::from_secs(5)))
                .await
                .map_err(|(err, _owned)| Error::backend(err))?;
            Ok(())
        })
    }

    fn publish_msg_batch(&self, msgs: Vec<Message<T>>) -> BoxFuture<'_, Result<(), Error>>
    where
        T: Clone + 'static,
    {
        Box::pin(async move {
            let sends = msgs.into_iter().map(|msg| self.publish_msg(msg));
            for result in futures::future::join_all(sends).await {
                result?;
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
            let channel_cfg = ChannelConfig {
                max_retries: cfg.max_retries,
                retry_delay: cfg.retry_delay,
                message_ttl: cfg.message_ttl,
                max_in_flight: cfg.max_in_flight,
                ack_timeout: cfg.ack_timeout,
            };
            let channel = KafkaChannel::new(
                &self.brokers,
                self.topic_name.clone(),
                self.group_id(&name),
                self.session_timeout,
                channel_cfg,
            )?;

            let mut channels = self.channels.write().await;
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
