//! Topic management
//!
//! A `Topic` holds the consumer groups currently reading one topic name.
//! Groups are created lazily on first read and removed by the sweeper once
//! idle. Publishing never creates a group: a group only sees messages written
//! after its queue exists.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::group::{GroupQueue, ReadOutcome};
use crate::broker::message::to_canonical;
use crate::utils::error::BrokerError;

pub type GroupName = String;

#[derive(Debug)]
pub struct Topic {
    name: String,
    groups: DashMap<GroupName, Arc<GroupQueue>>,
}

impl Topic {
    /// Create a new topic with the given name and no consumer groups.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            groups: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group_names(&self) -> Vec<GroupName> {
        self.groups.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Messages waiting across every group of this topic.
    pub fn pending(&self) -> usize {
        self.groups.iter().map(|entry| entry.value().pending()).sum()
    }

    /// Fan `messages` out to every registered group.
    ///
    /// Entries that cannot be converted to their canonical string are dropped
    /// individually. Returns how many were converted, regardless of how many
    /// groups received them.
    pub fn write<T: Serialize>(&self, messages: &[T]) -> usize {
        let converted: Vec<String> = messages.iter().filter_map(to_canonical).collect();
        for entry in self.groups.iter() {
            entry.value().write(&converted);
        }
        converted.len()
    }

    /// Long-poll read on behalf of consumer group `group`.
    ///
    /// If the group's queue is retired between lookup and read, the stale
    /// entry is dropped and a fresh queue is created.
    pub async fn read(
        &self,
        group: &str,
        max_count: i64,
        wait_ms: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, BrokerError> {
        loop {
            let queue = self.group(group);
            match queue.read(max_count, wait_ms, cancel).await? {
                ReadOutcome::Ready(messages) => return Ok(messages),
                ReadOutcome::Empty => return Ok(Vec::new()),
                ReadOutcome::Retired => {
                    debug!(topic = %self.name, group, "Group queue retired, retrying lookup");
                    self.groups
                        .remove_if(group, |_, current| Arc::ptr_eq(current, &queue));
                }
            }
        }
    }

    /// Evict every group whose queue reports itself idle for this sweep.
    /// Returns the names of the evicted groups.
    pub fn evict_idle_groups(&self) -> Vec<GroupName> {
        let mut evicted = Vec::new();
        self.groups.retain(|name, queue| {
            if queue.should_evict() {
                evicted.push(name.clone());
                false
            } else {
                true
            }
        });

        for group in &evicted {
            info!(topic = %self.name, group = %group, "Evicted idle consumer group");
        }
        evicted
    }

    /// Get the queue for `group`, creating it if absent.
    pub(crate) fn group(&self, group: &str) -> Arc<GroupQueue> {
        if let Some(queue) = self.groups.get(group) {
            return Arc::clone(queue.value());
        }
        let entry = self.groups.entry(group.to_string()).or_insert_with(|| {
            debug!(topic = %self.name, group, "Creating consumer group queue");
            Arc::new(GroupQueue::new(group))
        });
        Arc::clone(entry.value())
    }
}
