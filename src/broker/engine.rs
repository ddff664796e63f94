//! Broker engine
//!
//! This module contains the in-memory broker responsible for:
//! - routing publishes to the topic's consumer groups (fan-out)
//! - serving long-poll consumes, creating topics and groups on first read
//! - periodically evicting idle consumer groups through the [`Sweeper`]
//!
//! Concurrency and usage notes:
//! - Every method takes `&self`; share the broker as `Arc<Broker>`. Topic and
//!   group maps are sharded concurrent maps, and per-group counters have
//!   their own lock, so unrelated groups never contend.
//! - Each `Broker` is self-contained. Several can live in one process.
//! - `shutdown` cancels all blocked consumes; they report [`Consumed::Gone`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::broker::message::Payload;
use crate::broker::sweeper::Sweeper;
use crate::broker::topic::Topic;
use crate::config::BrokerSettings;
use crate::utils::error::BrokerError;

pub(crate) type TopicMap = DashMap<String, Arc<Topic>>;

/// Outcome of a consume call as seen by the request layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumed {
    /// Messages read, possibly none if the wait elapsed.
    Messages(Vec<String>),
    /// The wait was cancelled; the caller should report the consumer as gone.
    Gone,
}

impl Consumed {
    /// The messages carried, empty for `Gone`.
    pub fn into_messages(self) -> Vec<String> {
        match self {
            Consumed::Messages(messages) => messages,
            Consumed::Gone => Vec::new(),
        }
    }
}

/// Snapshot of the live registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub topics: usize,
    pub groups: usize,
    pub pending: usize,
}

#[derive(Debug)]
pub struct Broker {
    topics: Arc<TopicMap>,
    settings: BrokerSettings,
    sweeper: Sweeper,
    shutdown: CancellationToken,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl Broker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            settings,
            sweeper: Sweeper::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Publish one message or a batch to `topic`.
    ///
    /// Returns the number of messages considered delivered. A topic nobody
    /// has read from has no subscribers to fail, so the whole batch counts.
    /// Otherwise the count excludes entries that could not be serialized.
    pub fn publish<T: Serialize>(&self, topic: &str, payload: Payload<T>) -> usize {
        let messages = payload.into_vec();
        let Some(registry) = self.topic(topic) else {
            debug!("Topic '{topic}' has no consumer groups, {} message(s) delivered", messages.len());
            return messages.len();
        };
        registry.write(&messages)
    }

    /// Long-poll consume for `consumer_id` in `group` on `topic`.
    ///
    /// Creates the topic and group on first use. `max_count` is clamped to at
    /// least 1 and `wait_ms` to at least 0. Returns [`Consumed::Gone`] when the
    /// broker is shut down during the wait.
    pub async fn consume(
        &self,
        topic: &str,
        group: &str,
        consumer_id: &str,
        max_count: i64,
        wait_ms: i64,
    ) -> Consumed {
        let span = info_span!("consume", topic, group, consumer = consumer_id);
        let registry = self.topic_or_create(topic);

        match registry
            .read(group, max_count, wait_ms, &self.shutdown)
            .instrument(span)
            .await
        {
            Ok(messages) => Consumed::Messages(messages),
            Err(BrokerError::Cancelled) => {
                debug!("Consume on {topic}/{group} by {consumer_id} cancelled");
                Consumed::Gone
            }
            Err(e) => {
                warn!("Consume on {topic}/{group} by {consumer_id} failed: {e}");
                Consumed::Gone
            }
        }
    }

    /// The configured list of well-known topic names.
    pub fn list_topics(&self) -> Vec<String> {
        self.settings.known_topics.clone()
    }

    /// Names of topics that currently have a registry, i.e. have been read.
    pub fn active_topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> BrokerStats {
        self.topics.iter().fold(BrokerStats::default(), |mut stats, entry| {
            stats.topics += 1;
            stats.groups += entry.value().group_count();
            stats.pending += entry.value().pending();
            stats
        })
    }

    /// Start the sweep scheduler at the configured interval.
    pub fn start(&self) -> Result<(), BrokerError> {
        let period = Duration::from_millis(self.settings.sweep_interval_ms);
        let topics = Arc::clone(&self.topics);
        self.sweeper.start(period, move || {
            sweep_topics(&topics);
        })
    }

    /// Stop the sweep scheduler. Blocked consumes are left alone.
    pub fn stop(&self) {
        self.sweeper.stop();
    }

    /// Stop the sweep scheduler and cancel every blocked consume.
    pub fn shutdown(&self) {
        self.stop();
        self.shutdown.cancel();
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_running()
    }

    /// Run one eviction cycle now. Returns how many groups were evicted.
    pub fn sweep(&self) -> usize {
        sweep_topics(&self.topics)
    }

    pub fn topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.get(name).map(|entry| Arc::clone(entry.value()))
    }

    fn topic_or_create(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topic(name) {
            return topic;
        }
        let entry = self
            .topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(name)));
        Arc::clone(entry.value())
    }
}

/// Evict idle groups on every topic.
fn sweep_topics(topics: &TopicMap) -> usize {
    sweep_each_topic(topics, |topic| topic.evict_idle_groups().len())
}

/// Apply `evict` to every topic and sum the evictions. A panic inside
/// `evict` for one topic is logged and the remaining topics are still swept.
pub(crate) fn sweep_each_topic<F>(topics: &TopicMap, evict: F) -> usize
where
    F: Fn(&Topic) -> usize,
{
    let registries: Vec<Arc<Topic>> = topics.iter().map(|e| Arc::clone(e.value())).collect();

    registries
        .iter()
        .map(|topic| {
            panic::catch_unwind(AssertUnwindSafe(|| evict(topic))).unwrap_or_else(|_| {
                warn!("Sweep of topic '{}' panicked, skipping", topic.name());
                0
            })
        })
        .sum()
}
