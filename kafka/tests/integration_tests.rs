//! Integration tests for [`KafkaTopic`]/[`KafkaChannel`] against a real Kafka
//! instance via testcontainers.
//!
//! # Panics
//!
//! These tests use `expect()` and `assert!()` for setup failures, which is
//! acceptable in test code.

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lrpc_queue_core::channel::Channel;
use lrpc_queue_core::config::TopicConfig;
use lrpc_queue_core::handler::{Handler, ProcessResult};
use lrpc_queue_core::message::Message;
use lrpc_queue_core::topic::Topic;
use lrpc_queue_kafka::KafkaTopic;
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers_modules::kafka::{Kafka, KAFKA_PORT};
use tokio::sync::Mutex;

async fn wait_for_kafka_ready(brokers: &str) {
    let max_attempts = 30;
    for attempt in 1..=max_attempts {
        let topic = KafkaTopic::<i32>::new(
            "ready-probe",
            "lrpc-queue-test-",
            brokers,
            Duration::from_secs(10),
            1,
            1,
            TopicConfig::default(),
        )
        .await;
        if let Ok(topic) = topic {
            if topic.publish_msg(Message::new(1)).await.is_ok() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
}

async fn start_kafka() -> (testcontainers::ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("failed to start Kafka container");
    let host = kafka.get_host().await.expect("failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("failed to get port");
    let brokers = format!("{host}:{port}");
    wait_for_kafka_ready(&brokers).await;
    (kafka, brokers)
}

fn collecting_handler(out: Arc<Mutex<Vec<i32>>>) -> Handler<i32> {
    Arc::new(move |msg: Message<i32>| {
        let out = Arc::clone(&out);
        Box::pin(async move {
            out.lock().await.push(msg.body);
            (ProcessResult::ack(), None)
        })
    })
}

#[tokio::test]
async fn publish_and_subscribe_round_trip() {
    let (_kafka, brokers) = start_kafka().await;

    let topic = KafkaTopic::<i32>::new(
        "round-trip",
        "lrpc-queue-test-",
        &brokers,
        Duration::from_secs(10),
        1,
        1,
        TopicConfig::default(),
    )
    .await
    .expect("failed to create topic");

    let channel = topic
        .get_or_add_channel("workers", TopicConfig::default())
        .await
        .expect("failed to create channel");

    let received = Arc::new(Mutex::new(Vec::new()));
    channel
        .subscribe(collecting_handler(Arc::clone(&received)))
        .await
        .expect("failed to subscribe");

    tokio::time::sleep(Duration::from_millis(500)).await;

    topic
        .publish_msg(Message::new(1))
        .await
        .expect("failed to publish message 1");
    topic
        .publish_msg(Message::new(2))
        .await
        .expect("failed to publish message 2");

    let deadline = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            if received.lock().await.len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });
    deadline.await.expect("timed out waiting for messages");

    let received = received.lock().await;
    assert_eq!(received.as_slice(), &[1, 2]);
}

#[tokio::test]
async fn two_consumer_groups_each_get_their_own_copy() {
    let (_kafka, brokers) = start_kafka().await;

    let topic = KafkaTopic::<i32>::new(
        "fan-out",
        "lrpc-queue-test-",
        &brokers,
        Duration::from_secs(10),
        1,
        1,
        TopicConfig::default(),
    )
    .await
    .expect("failed to create topic");

    let channel_a = topic
        .get_or_add_channel("group-a", TopicConfig::default())
        .await
        .expect("failed to create channel a");
    let channel_b = topic
        .get_or_add_channel("group-b", TopicConfig::default())
        .await
        .expect("failed to create channel b");

    let received_a = Arc::new(Mutex::new(Vec::new()));
    let received_b = Arc::new(Mutex::new(Vec::new()));
    channel_a
        .subscribe(collecting_handler(Arc::clone(&received_a)))
        .await
        .expect("failed to subscribe a");
    channel_b
        .subscribe(collecting_handler(Arc::clone(&received_b)))
        .await
        .expect("failed to subscribe b");

    tokio::time::sleep(Duration::from_millis(500)).await;

    topic
        .publish_msg(Message::new(42))
        .await
        .expect("failed to publish");

    let deadline = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            if !received_a.lock().await.is_empty() && !received_b.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });
    deadline.await.expect("timed out waiting for fan-out");

    assert_eq!(*received_a.lock().await, vec![42]);
    assert_eq!(*received_b.lock().await, vec![42]);
}

#[tokio::test]
async fn competing_consumers_in_the_same_group_split_the_work() {
    let (_kafka, brokers) = start_kafka().await;

    let topic = KafkaTopic::<i32>::new(
        "load-balance",
        "lrpc-queue-test-",
        &brokers,
        Duration::from_secs(10),
        3,
        1,
        TopicConfig::default(),
    )
    .await
    .expect("failed to create topic");

    let channel = topic
        .get_or_add_channel("shared", TopicConfig::default())
        .await
        .expect("failed to create channel");

    let seen = Arc::new(Mutex::new(HashSet::new()));
    let count = Arc::new(AtomicUsize::new(0));
    let handler: Handler<i32> = {
        let seen = Arc::clone(&seen);
        let count = Arc::clone(&count);
        Arc::new(move |msg: Message<i32>| {
            let seen = Arc::clone(&seen);
            let count = Arc::clone(&count);
            Box::pin(async move {
                seen.lock().await.insert(msg.body);
                count.fetch_add(1, Ordering::SeqCst);
                (ProcessResult::ack(), None)
            })
        })
    };
    channel
        .subscribe(handler)
        .await
        .expect("failed to subscribe");

    tokio::time::sleep(Duration::from_millis(500)).await;

    for i in 0..10 {
        topic
            .publish_msg(Message::new(i))
            .await
            .expect("failed to publish");
    }

    let deadline = tokio::time::timeout(Duration::from_secs(20), async {
        while count.load(Ordering::SeqCst) < 10 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });
    deadline.await.expect("timed out waiting for all messages");

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 10, "every published value should be seen exactly once");
}

#[tokio::test]
async fn depth_is_unsupported_and_reports_negative_one() {
    let (_kafka, brokers) = start_kafka().await;

    let topic = KafkaTopic::<i32>::new(
        "depth-probe",
        "lrpc-queue-test-",
        &brokers,
        Duration::from_secs(10),
        1,
        1,
        TopicConfig::default(),
    )
    .await
    .expect("failed to create topic");

    let channel = topic
        .get_or_add_channel("depth", TopicConfig::default())
        .await
        .expect("failed to create channel");

    assert_eq!(channel.depth().await, -1);
}

#[tokio::test]
async fn closing_a_channel_twice_reports_already_closed() {
    let (_kafka, brokers) = start_kafka().await;

    let topic = KafkaTopic::<i32>::new(
        "close-twice",
        "lrpc-queue-test-",
        &brokers,
        Duration::from_secs(10),
        1,
        1,
        TopicConfig::default(),
    )
    .await
    .expect("failed to create topic");

    let channel = topic
        .get_or_add_channel("closer", TopicConfig::default())
        .await
        .expect("failed to create channel");

    channel.close().await.expect("first close should succeed");
    assert!(channel.close().await.is_err());
}
