use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;

use super::engine::{Broker, BrokerStats, Consumed, TopicMap, sweep_each_topic};
use super::group::{GroupQueue, ReadOutcome, clamp_limit, clamp_wait};
use super::message::{Payload, to_canonical};
use super::topic::Topic;
use crate::config::BrokerSettings;
use crate::utils::error::BrokerError;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn settings_with_sweep(sweep_interval_ms: u64) -> BrokerSettings {
    BrokerSettings {
        sweep_interval_ms,
        ..BrokerSettings::default()
    }
}

/// Serializes as a string, or fails for `Broken`.
#[derive(Debug)]
enum Entry {
    Text(&'static str),
    Broken,
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Entry::Text(text) => serializer.serialize_str(text),
            Entry::Broken => Err(serde::ser::Error::custom("unserializable entry")),
        }
    }
}

async fn wait_for_readers(queue: &GroupQueue, expected: usize) {
    for _ in 0..200 {
        if queue.active_readers() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queue never reached {expected} active reader(s)");
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[test]
fn test_payload_deserializes_single_and_batch() {
    let single: Payload<serde_json::Value> = serde_json::from_str(r#"{"a":1}"#).unwrap();
    assert_eq!(single.len(), 1);

    let batch: Payload<serde_json::Value> = serde_json::from_str(r#"["x", 2, null]"#).unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(batch.into_vec()[1], serde_json::json!(2));

    let empty: Payload<serde_json::Value> = serde_json::from_str("[]").unwrap();
    assert!(empty.is_empty());
}

#[test]
fn test_canonical_form() {
    assert_eq!(to_canonical(&"hello"), Some("hello".to_string()));
    assert_eq!(
        to_canonical(&serde_json::json!({"a": 1})),
        Some(r#"{"a":1}"#.to_string())
    );
    assert_eq!(to_canonical(&42), Some("42".to_string()));
    assert_eq!(to_canonical(&Entry::Broken), None);
}

// ---------------------------------------------------------------------------
// Consumer-group queue
// ---------------------------------------------------------------------------

#[test]
fn test_clamping() {
    assert_eq!(clamp_limit(-1), 1);
    assert_eq!(clamp_limit(0), 1);
    assert_eq!(clamp_limit(7), 7);
    assert_eq!(clamp_wait(-5), Duration::ZERO);
    assert_eq!(clamp_wait(250), Duration::from_millis(250));
}

#[tokio::test]
async fn test_read_is_fifo() {
    let queue = GroupQueue::new("g");
    let token = CancellationToken::new();
    queue.write(&strings(&["m1", "m2"]));
    queue.write(&strings(&["m3"]));

    let outcome = queue.read(3, 0, &token).await.unwrap();
    assert_eq!(outcome, ReadOutcome::Ready(strings(&["m1", "m2", "m3"])));
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn test_partial_drain() {
    let queue = GroupQueue::new("g");
    let token = CancellationToken::new();
    queue.write(&strings(&["m1", "m2", "m3"]));

    assert_eq!(
        queue.read(1, 0, &token).await.unwrap(),
        ReadOutcome::Ready(strings(&["m1"]))
    );
    assert_eq!(
        queue.read(3, 0, &token).await.unwrap(),
        ReadOutcome::Ready(strings(&["m2", "m3"]))
    );
    assert_eq!(queue.read(3, 0, &token).await.unwrap(), ReadOutcome::Empty);
}

#[tokio::test]
async fn test_negative_parameters_behave_like_minimums() {
    let token = CancellationToken::new();
    let clamped = GroupQueue::new("clamped");
    let minimal = GroupQueue::new("minimal");

    assert_eq!(
        clamped.read(-1, -5, &token).await.unwrap(),
        minimal.read(1, 0, &token).await.unwrap()
    );

    clamped.write(&strings(&["a", "b"]));
    minimal.write(&strings(&["a", "b"]));
    assert_eq!(
        clamped.read(-1, -5, &token).await.unwrap(),
        minimal.read(1, 0, &token).await.unwrap()
    );
    assert_eq!(clamped.pending(), 1);
}

#[test]
fn test_grace_period_before_eviction() {
    let queue = GroupQueue::new("g");
    assert!(!queue.should_evict());
    assert_eq!(queue.idle_sweeps(), 1);
    assert!(queue.should_evict());
}

#[tokio::test]
async fn test_read_resets_idle_sweeps() {
    let queue = GroupQueue::new("g");
    let token = CancellationToken::new();

    assert!(!queue.should_evict());
    queue.read(1, 0, &token).await.unwrap();
    assert_eq!(queue.idle_sweeps(), 0);
    assert!(!queue.should_evict());
}

#[tokio::test]
async fn test_retired_queue_refuses_reads() {
    let queue = GroupQueue::new("g");
    let token = CancellationToken::new();
    queue.write(&strings(&["kept"]));

    assert!(!queue.should_evict());
    assert!(queue.should_evict());
    assert_eq!(queue.read(1, 0, &token).await.unwrap(), ReadOutcome::Retired);
    assert_eq!(queue.active_readers(), 0);
    assert_eq!(queue.pending(), 1);
}

#[tokio::test]
async fn test_active_reader_blocks_eviction() {
    let queue = Arc::new(GroupQueue::new("g"));
    let token = CancellationToken::new();

    let reader = {
        let queue = queue.clone();
        let token = token.clone();
        tokio::spawn(async move { queue.read(1, 10_000, &token).await })
    };
    wait_for_readers(&queue, 1).await;

    for _ in 0..3 {
        assert!(!queue.should_evict());
    }

    queue.write(&strings(&["wake"]));
    let outcome = reader.await.unwrap().unwrap();
    assert_eq!(outcome, ReadOutcome::Ready(strings(&["wake"])));
    assert_eq!(queue.active_readers(), 0);

    assert!(!queue.should_evict());
    assert!(queue.should_evict());
}

#[tokio::test]
async fn test_blocked_read_wakes_on_write() {
    let queue = Arc::new(GroupQueue::new("g"));
    let token = CancellationToken::new();

    let reader = {
        let queue = queue.clone();
        let token = token.clone();
        tokio::spawn(async move { queue.read(5, 5_000, &token).await })
    };
    wait_for_readers(&queue, 1).await;
    queue.write(&strings(&["a", "b"]));

    let outcome = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .expect("reader should wake promptly")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, ReadOutcome::Ready(strings(&["a", "b"])));
}

#[tokio::test]
async fn test_read_times_out_empty() {
    let queue = GroupQueue::new("g");
    let token = CancellationToken::new();
    assert_eq!(queue.read(1, 20, &token).await.unwrap(), ReadOutcome::Empty);
    assert_eq!(queue.active_readers(), 0);
}

#[tokio::test]
async fn test_cancelled_read_releases_reader() {
    let queue = Arc::new(GroupQueue::new("g"));
    let token = CancellationToken::new();

    let reader = {
        let queue = queue.clone();
        let token = token.clone();
        tokio::spawn(async move { queue.read(1, 10_000, &token).await })
    };
    wait_for_readers(&queue, 1).await;
    token.cancel();

    let result = reader.await.unwrap();
    assert!(matches!(result, Err(BrokerError::Cancelled)));
    assert_eq!(queue.active_readers(), 0);
}

#[tokio::test]
async fn test_dropped_read_releases_reader() {
    let queue = GroupQueue::new("g");
    let token = CancellationToken::new();
    assert!(!queue.should_evict());

    let result = tokio::time::timeout(Duration::from_millis(20), queue.read(1, 10_000, &token)).await;
    assert!(result.is_err());
    assert_eq!(queue.active_readers(), 0);
    assert_eq!(queue.idle_sweeps(), 0);
}

#[tokio::test]
async fn test_competing_readers_split_work() {
    let queue = Arc::new(GroupQueue::new("g"));
    let token = CancellationToken::new();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let queue = queue.clone();
            let token = token.clone();
            tokio::spawn(async move { queue.read(1, 5_000, &token).await })
        })
        .collect();
    wait_for_readers(&queue, 2).await;
    queue.write(&strings(&["m1", "m2"]));

    let mut received = Vec::new();
    for outcome in futures::future::join_all(readers).await {
        match outcome.unwrap().unwrap() {
            ReadOutcome::Ready(messages) => {
                assert_eq!(messages.len(), 1);
                received.extend(messages);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    received.sort();
    assert_eq!(received, strings(&["m1", "m2"]));
}

// ---------------------------------------------------------------------------
// Topic registry
// ---------------------------------------------------------------------------

#[test]
fn test_topic_new() {
    let topic = Topic::new("test_topic");
    assert_eq!(topic.name(), "test_topic");
    assert_eq!(topic.group_count(), 0);
}

#[test]
fn test_topic_write_without_groups() {
    let topic = Topic::new("t");
    assert_eq!(topic.write(&["a", "b"]), 2);
    assert_eq!(topic.group_count(), 0);
}

#[tokio::test]
async fn test_topic_groups_are_isolated() {
    let topic = Topic::new("t");
    let token = CancellationToken::new();
    assert!(topic.read("a", 1, 0, &token).await.unwrap().is_empty());
    assert!(topic.read("b", 1, 0, &token).await.unwrap().is_empty());

    assert_eq!(topic.write(&["x", "y"]), 2);

    assert_eq!(topic.read("a", 10, 0, &token).await.unwrap(), strings(&["x", "y"]));
    assert_eq!(topic.read("b", 10, 0, &token).await.unwrap(), strings(&["x", "y"]));
}

#[tokio::test]
async fn test_topic_write_drops_unconvertible_entries() {
    let topic = Topic::new("t");
    let token = CancellationToken::new();
    topic.read("g", 1, 0, &token).await.unwrap();

    let written = topic.write(&[Entry::Text("ok"), Entry::Broken, Entry::Text("also ok")]);
    assert_eq!(written, 2);
    assert_eq!(
        topic.read("g", 10, 0, &token).await.unwrap(),
        strings(&["ok", "also ok"])
    );
}

#[tokio::test]
async fn test_topic_evicts_only_after_two_idle_sweeps() {
    let topic = Topic::new("t");
    let token = CancellationToken::new();
    topic.read("g", 1, 0, &token).await.unwrap();

    assert!(topic.evict_idle_groups().is_empty());
    assert_eq!(topic.group_count(), 1);
    assert_eq!(topic.evict_idle_groups(), vec!["g".to_string()]);
    assert_eq!(topic.group_count(), 0);
}

#[tokio::test]
async fn test_read_after_eviction_uses_new_queue() {
    let topic = Topic::new("t");
    let token = CancellationToken::new();
    topic.read("g", 1, 0, &token).await.unwrap();
    let old = topic.group("g");

    topic.evict_idle_groups();
    topic.evict_idle_groups();
    assert_eq!(topic.group_count(), 0);

    assert!(topic.read("g", 1, 0, &token).await.unwrap().is_empty());
    assert_eq!(topic.group_count(), 1);
    let fresh = topic.group("g");
    assert!(!Arc::ptr_eq(&old, &fresh));
    assert_eq!(fresh.idle_sweeps(), 0);
}

#[tokio::test]
async fn test_read_replaces_retired_entry_still_in_map() {
    let topic = Topic::new("t");
    let token = CancellationToken::new();
    let stale = topic.group("g");
    assert!(!stale.should_evict());
    assert!(stale.should_evict());

    assert!(topic.read("g", 1, 0, &token).await.unwrap().is_empty());
    let current = topic.group("g");
    assert!(!Arc::ptr_eq(&stale, &current));

    topic.write(&["after"]);
    assert_eq!(topic.read("g", 1, 0, &token).await.unwrap(), strings(&["after"]));
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[test]
fn test_broker_new() {
    let broker = Broker::default();
    assert!(broker.active_topics().is_empty());
    assert_eq!(broker.stats(), BrokerStats::default());
    assert!(!broker.is_sweeping());
}

#[test]
fn test_list_topics_is_configured() {
    let broker = Broker::new(BrokerSettings {
        known_topics: strings(&["orders", "billing"]),
        ..BrokerSettings::default()
    });
    assert_eq!(broker.list_topics(), strings(&["orders", "billing"]));
}

#[tokio::test]
async fn test_publish_consume_scenario() {
    let broker = Broker::default();

    assert_eq!(broker.publish("T", Payload::Batch(vec!["hello", "world"])), 2);
    assert!(broker.topic("T").is_none());

    assert_eq!(
        broker.consume("T", "G", "id1", 1, 0).await,
        Consumed::Messages(Vec::new())
    );
    assert_eq!(broker.topic("T").unwrap().group_count(), 1);

    assert_eq!(broker.publish("T", Payload::Batch(vec!["foo"])), 1);
    assert_eq!(
        broker.consume("T", "G", "id1", 1, 1000).await,
        Consumed::Messages(strings(&["foo"]))
    );
}

#[tokio::test]
async fn test_publish_single_message() {
    let broker = Broker::default();
    broker.consume("t", "g", "c", 1, 0).await;

    assert_eq!(broker.publish("t", Payload::Single(serde_json::json!({"k": "v"}))), 1);
    assert_eq!(
        broker.consume("t", "g", "c", 5, 0).await,
        Consumed::Messages(strings(&[r#"{"k":"v"}"#]))
    );
}

#[tokio::test]
async fn test_publish_counts_converted_entries_for_known_topic() {
    let broker = Broker::default();
    broker.consume("t", "g", "c", 1, 0).await;

    let payload = Payload::from(vec![Entry::Text("a"), Entry::Broken]);
    assert_eq!(broker.publish("t", payload), 1);

    let payload = Payload::from(vec![Entry::Broken]);
    assert_eq!(broker.publish("unknown", payload), 1);
}

#[tokio::test]
async fn test_stats_and_manual_sweep() {
    let broker = Broker::default();
    broker.consume("t1", "g1", "c", 1, 0).await;
    broker.consume("t1", "g2", "c", 1, 0).await;
    broker.consume("t2", "g1", "c", 1, 0).await;
    broker.publish("t1", Payload::Single("m"));

    assert_eq!(
        broker.stats(),
        BrokerStats {
            topics: 2,
            groups: 3,
            pending: 2,
        }
    );
    assert_eq!(broker.active_topics(), strings(&["t1", "t2"]));

    assert_eq!(broker.sweep(), 0);
    assert_eq!(broker.sweep(), 3);
    assert_eq!(broker.stats().groups, 0);
    assert_eq!(broker.stats().topics, 2);
}

#[tokio::test]
async fn test_brokers_are_independent() {
    let first = Broker::default();
    let second = Broker::default();
    first.consume("t", "g", "c", 1, 0).await;
    second.consume("t", "g", "c", 1, 0).await;

    first.publish("t", Payload::Single("only-first"));
    assert_eq!(
        second.consume("t", "g", "c", 1, 0).await,
        Consumed::Messages(Vec::new())
    );
    assert_eq!(
        first.consume("t", "g", "c", 1, 0).await,
        Consumed::Messages(strings(&["only-first"]))
    );
}

#[tokio::test]
async fn test_shutdown_cancels_blocked_consume() {
    let broker = Arc::new(Broker::default());

    let consumer = {
        let broker = broker.clone();
        tokio::spawn(async move { broker.consume("t", "g", "c", 1, 10_000).await })
    };
    let queue = loop {
        if let Some(topic) = broker.topic("t") {
            if topic.group_count() == 1 {
                break topic.group("g");
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    wait_for_readers(&queue, 1).await;

    broker.shutdown();
    let consumed = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .expect("consume should return promptly")
        .unwrap();
    assert_eq!(consumed, Consumed::Gone);
    assert!(consumed.into_messages().is_empty());
    assert_eq!(queue.active_readers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_first_consume_shares_one_queue() {
    const CONSUMERS: usize = 8;
    let broker = Arc::new(Broker::default());
    let barrier = Arc::new(tokio::sync::Barrier::new(CONSUMERS));

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|i| {
            let broker = broker.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                broker.consume("fresh", "G", &format!("c{i}"), 1, 10_000).await
            })
        })
        .collect();

    let queue = loop {
        if let Some(topic) = broker.topic("fresh") {
            if topic.group_count() == 1 {
                break topic.group("G");
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    wait_for_readers(&queue, CONSUMERS).await;
    assert_eq!(broker.active_topics(), strings(&["fresh"]));
    assert_eq!(broker.topic("fresh").unwrap().group_count(), 1);

    let sent: Vec<String> = (0..CONSUMERS).map(|i| format!("m{i}")).collect();
    assert_eq!(broker.publish("fresh", Payload::Batch(sent.clone())), CONSUMERS);

    let mut received = Vec::new();
    for consumed in futures::future::join_all(consumers).await {
        let messages = consumed.unwrap().into_messages();
        assert_eq!(messages.len(), 1);
        received.extend(messages);
    }
    received.sort();
    assert_eq!(received, sent);
    assert_eq!(queue.pending(), 0);
}

#[test]
fn test_sweep_continues_after_topic_panics() {
    let topics = TopicMap::new();
    for name in ["a", "b"] {
        let topic = Arc::new(Topic::new(name));
        topic.group("g");
        topics.insert(name.to_string(), topic);
    }

    let evict = |topic: &Topic| {
        if topic.name() == "a" {
            panic!("eviction failed for {}", topic.name());
        }
        topic.evict_idle_groups().len()
    };

    assert_eq!(sweep_each_topic(&topics, evict), 0);
    assert_eq!(sweep_each_topic(&topics, evict), 1);

    let a = topics.get("a").map(|e| Arc::clone(e.value())).unwrap();
    let b = topics.get("b").map(|e| Arc::clone(e.value())).unwrap();
    assert_eq!(a.group_count(), 1);
    assert_eq!(b.group_count(), 0);
}

// ---------------------------------------------------------------------------
// Sweep scheduler
// ---------------------------------------------------------------------------

#[test]
fn test_start_requires_runtime() {
    let broker = Broker::default();
    assert!(matches!(broker.start(), Err(BrokerError::NoRuntime)));
    assert!(!broker.is_sweeping());
    broker.stop();
}

#[tokio::test]
async fn test_start_rejects_zero_interval() {
    let broker = Broker::new(settings_with_sweep(0));
    assert!(matches!(
        broker.start(),
        Err(BrokerError::InvalidSweepInterval)
    ));
    assert!(!broker.is_sweeping());
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let broker = Broker::new(settings_with_sweep(50));
    broker.start().unwrap();
    broker.start().unwrap();
    assert!(broker.is_sweeping());

    broker.stop();
    broker.stop();
    assert!(!broker.is_sweeping());

    broker.start().unwrap();
    assert!(broker.is_sweeping());
    broker.shutdown();
    assert!(!broker.is_sweeping());
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_evicts_idle_groups() {
    let broker = Broker::new(settings_with_sweep(100));
    broker.start().unwrap();
    broker.consume("t", "g", "c", 1, 0).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(broker.topic("t").unwrap().group_count(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.topic("t").unwrap().group_count(), 0);

    broker.stop();
}

#[tokio::test(start_paused = true)]
async fn test_stopped_scheduler_does_not_sweep() {
    let broker = Broker::new(settings_with_sweep(100));
    broker.start().unwrap();
    broker.stop();
    broker.consume("t", "g", "c", 1, 0).await;

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(broker.topic("t").unwrap().group_count(), 1);
}
