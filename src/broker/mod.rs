//! The broker: topics, consumer-group queues and the idle-group sweeper.
//!
//! Public types:
//! - `Broker`: routes publishes and long-poll consumes, owns the sweeper.
//! - `Topic`: the consumer groups of one topic, with fan-out on write.
//! - `GroupQueue`: the FIFO queue shared by the consumers of one group.
//! - `Sweeper`: the periodic eviction timer.

pub mod engine;
pub mod group;
pub mod message;
pub mod sweeper;
pub mod topic;

pub use engine::{Broker, BrokerStats, Consumed};
pub use group::{GroupQueue, ReadOutcome};
pub use message::Payload;
pub use sweeper::Sweeper;
pub use topic::Topic;

#[cfg(test)]
mod tests;
