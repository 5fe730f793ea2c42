//! Queue/Topic/Channel configuration and the normalization pass.
//!
//! Every numeric field that defaults to zero (or is negative) is replaced by
//! a concrete default in [`QueueConfig::normalized`] /
//! [`TopicConfig::normalized`] / [`ChannelConfig::normalized`], a
//! builder-with-defaults pattern applied at three cascading layers: Queue
//! defaults, then Topic defaults, then Channel defaults.

use std::time::Duration;

/// Which backend a [`crate::topic::Topic`] is built on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageType {
    /// In-process, non-persistent.
    #[default]
    Memory,
    /// Redis Streams + consumer groups.
    Redis,
    /// Kafka (or a Kafka-protocol-compatible broker).
    Kafka,
}

/// Top-level configuration for a [`crate::topic::Topic`] factory — the Queue
/// facade.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Which backend to use.
    pub storage_type: StorageType,
    /// Default max delivery attempts for Topics/Channels created under this
    /// Queue, when they don't override it.
    pub max_retries: u32,
    /// Default delay between retries.
    pub retry_delay: Duration,
    /// Default message TTL.
    pub message_ttl: Duration,
    /// Maximum accepted body size in bytes.
    pub max_body_size: usize,
    /// Maximum size of a backend-level message/stream entry.
    pub max_msg_size: usize,
    /// Default upper bound on concurrently executing handlers for Channels
    /// created under this Queue, when they don't override it.
    pub channel_max_in_flight: usize,
    /// Default broker fetch-block duration for Channels created under this
    /// Queue, when they don't override it.
    pub channel_ack_timeout: Duration,
    /// Redis connection parameters (used when `storage_type == Redis`).
    pub redis: RedisConfig,
    /// Kafka connection parameters (used when `storage_type == Kafka`).
    pub kafka: KafkaConfig,
    /// Name of the `tracing` span wrapping Queue-facade operations.
    pub log_span_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            max_retries: 0,
            retry_delay: Duration::ZERO,
            message_ttl: Duration::ZERO,
            max_body_size: 0,
            max_msg_size: 0,
            channel_max_in_flight: 0,
            channel_ack_timeout: Duration::ZERO,
            redis: RedisConfig::default(),
            kafka: KafkaConfig::default(),
            log_span_name: String::new(),
        }
    }
}

impl QueueConfig {
    /// Apply the zero-or-negative-means-default normalization.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.max_retries == 0 {
            self.max_retries = 5;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = Duration::from_secs(1);
        }
        if self.message_ttl.is_zero() {
            self.message_ttl = Duration::from_secs(24 * 3600);
        }
        if self.max_body_size == 0 {
            self.max_body_size = 1_048_576;
        }
        if self.max_msg_size == 0 {
            self.max_msg_size = 1_000_000;
        }
        if self.channel_max_in_flight == 0 {
            self.channel_max_in_flight = 10;
        }
        if self.channel_ack_timeout.is_zero() {
            self.channel_ack_timeout = Duration::from_secs(30);
        }
        if self.log_span_name.is_empty() {
            self.log_span_name = "lrpc_queue".to_string();
        }
        self.redis = self.redis.normalized();
        self.kafka = self.kafka.normalized();
        self
    }
}

/// Per-Topic overrides, also used as the per-call config for
/// `get_or_add_channel`. Any field left at zero inherits the Queue's
/// normalized default when the Topic is constructed, or the Topic's own
/// stored default when overlaid for a Channel.
#[derive(Clone, Debug, Default)]
pub struct TopicConfig {
    /// Max delivery attempts; `0` inherits the Queue default.
    pub max_retries: u32,
    /// Retry delay; zero inherits the Queue default.
    pub retry_delay: Duration,
    /// Message TTL; zero inherits the Queue default.
    pub message_ttl: Duration,
    /// Max backend message/stream size; `0` inherits the Queue default.
    pub max_msg_size: usize,
    /// Upper bound on concurrently executing handlers; `0` inherits the
    /// Channel default.
    pub max_in_flight: usize,
    /// How long a broker backend blocks waiting for the next fetch; zero
    /// inherits the Channel default.
    pub ack_timeout: Duration,
}

impl TopicConfig {
    /// Fill any zero field in `self` from `default`'s already-normalized
    /// fields — the same zero-means-inherit rule [`Self::normalized`]
    /// applies against a `QueueConfig`, but against a Topic's own stored
    /// defaults. Used by `get_or_add_channel` callers to layer a per-call
    /// override on top of the config a Topic was created with.
    #[must_use]
    pub fn overlay(mut self, default: &Self) -> Self {
        if self.max_retries == 0 {
            self.max_retries = default.max_retries;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = default.retry_delay;
        }
        if self.message_ttl.is_zero() {
            self.message_ttl = default.message_ttl;
        }
        if self.max_msg_size == 0 {
            self.max_msg_size = default.max_msg_size;
        }
        if self.max_in_flight == 0 {
            self.max_in_flight = default.max_in_flight;
        }
        if self.ack_timeout.is_zero() {
            self.ack_timeout = default.ack_timeout;
        }
        self
    }

    /// Fill any zero field from `queue`'s already-normalized defaults.
    #[must_use]
    pub fn normalized(mut self, queue: &QueueConfig) -> Self {
        if self.max_retries == 0 {
            self.max_retries = queue.max_retries;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = queue.retry_delay;
        }
        if self.message_ttl.is_zero() {
            self.message_ttl = queue.message_ttl;
        }
        if self.max_msg_size == 0 {
            self.max_msg_size = queue.max_msg_size;
        }
        if self.max_in_flight == 0 {
            self.max_in_flight = queue.channel_max_in_flight;
        }
        if self.ack_timeout.is_zero() {
            self.ack_timeout = queue.channel_ack_timeout;
        }
        self
    }
}

/// Per-Channel configuration.
#[derive(Clone, Debug, Default)]
pub struct ChannelConfig {
    /// Max delivery attempts before a message is dropped after logging.
    pub max_retries: u32,
    /// Delay before the next fetch after a `retry=true` nack (broker
    /// backends only; the memory backend retries immediately).
    pub retry_delay: Duration,
    /// How long an unacked message may live before it's treated as expired.
    pub message_ttl: Duration,
    /// Upper bound on concurrently executing handlers.
    pub max_in_flight: usize,
    /// How long a broker backend will block waiting for the next fetch.
    pub ack_timeout: Duration,
}

impl ChannelConfig {
    /// Apply Channel defaults to any zero field.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.max_retries == 0 {
            self.max_retries = 5;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = Duration::from_secs(1);
        }
        if self.message_ttl.is_zero() {
            self.message_ttl = Duration::from_secs(24 * 3600);
        }
        if self.max_in_flight == 0 {
            self.max_in_flight = 10;
        }
        if self.ack_timeout.is_zero() {
            self.ack_timeout = Duration::from_secs(30);
        }
        self
    }
}

/// Redis connection + stream parameters.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// `host:port` address.
    pub addr: String,
    /// Prefix prepended to every stream key this crate creates.
    pub key_prefix: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// Minimum idle connections kept warm in the pool.
    pub min_idle_conns: u32,
    /// Client-side command retry count.
    pub max_retries: u32,
    /// Timeout for establishing a connection.
    pub dial_timeout: Duration,
    /// Timeout for a read.
    pub read_timeout: Duration,
    /// Timeout for a write.
    pub write_timeout: Duration,
    /// Timeout waiting for a free pooled connection.
    pub pool_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            key_prefix: String::new(),
            pool_size: 0,
            min_idle_conns: 0,
            max_retries: 0,
            dial_timeout: Duration::ZERO,
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            pool_timeout: Duration::ZERO,
        }
    }
}

impl RedisConfig {
    /// Apply Redis defaults to any zero/empty field.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.addr.is_empty() {
            self.addr = "localhost:6379".to_string();
        }
        if self.key_prefix.is_empty() {
            self.key_prefix = "lrpc:queue:".to_string();
        }
        if self.pool_size == 0 {
            self.pool_size = 10;
        }
        if self.min_idle_conns == 0 {
            self.min_idle_conns = 5;
        }
        if self.max_retries == 0 {
            self.max_retries = 3;
        }
        if self.dial_timeout.is_zero() {
            self.dial_timeout = Duration::from_secs(5);
        }
        if self.read_timeout.is_zero() {
            self.read_timeout = Duration::from_secs(3);
        }
        if self.write_timeout.is_zero() {
            self.write_timeout = Duration::from_secs(3);
        }
        if self.pool_timeout.is_zero() {
            self.pool_timeout = Duration::from_secs(4);
        }
        self
    }
}

/// Compression codec for Kafka producer records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KafkaCompression {
    /// No compression.
    #[default]
    None,
    /// gzip.
    Gzip,
    /// Snappy.
    Snappy,
    /// LZ4.
    Lz4,
    /// Zstandard.
    Zstd,
}

impl KafkaCompression {
    /// The `compression.type` value `rdkafka` expects.
    #[must_use]
    pub const fn as_rdkafka_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Snappy => "snappy",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

/// Kafka connection + topic parameters.
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Bootstrap broker addresses.
    pub brokers: Vec<String>,
    /// Prefix prepended to every Kafka topic this crate creates.
    pub topic_prefix: String,
    /// Number of partitions for auto-created topics.
    pub partitions: i32,
    /// Replication factor for auto-created topics.
    pub replication_factor: i32,
    /// Producer acks setting (`0`, `1`, or `-1`/"all"); `0` here means
    /// "not configured", normalized to `1`.
    pub required_acks: i16,
    /// Producer compression codec.
    pub compression_type: KafkaCompression,
    /// Consumer group session timeout.
    pub session_timeout: Duration,
    /// Producer max send attempts.
    pub max_attempts: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            topic_prefix: String::new(),
            partitions: 0,
            replication_factor: 0,
            required_acks: 0,
            compression_type: KafkaCompression::None,
            session_timeout: Duration::ZERO,
            max_attempts: 0,
        }
    }
}

impl KafkaConfig {
    /// Apply Kafka defaults to any zero/empty field.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.brokers.is_empty() {
            self.brokers = vec!["localhost:9092".to_string()];
        }
        if self.topic_prefix.is_empty() {
            self.topic_prefix = "lrpc-queue-".to_string();
        }
        if self.partitions == 0 {
            self.partitions = 1;
        }
        if self.replication_factor == 0 {
            self.replication_factor = 1;
        }
        if self.required_acks == 0 {
            self.required_acks = 1;
        }
        if self.session_timeout.is_zero() {
            self.session_timeout = Duration::from_secs(30);
        }
        if self.max_attempts == 0 {
            self.max_attempts = 5;
        }
        self
    }

    /// Comma-joined broker list, the form `rdkafka` expects for
    /// `bootstrap.servers`.
    #[must_use]
    pub fn brokers_csv(&self) -> String {
        self.brokers.join(",")
    }
}
