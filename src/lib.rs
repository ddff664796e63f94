//! # Pollbus
//!
//! `pollbus` is an in-memory, topic-based message broker simulator. Messages
//! are published to named topics and read by independent consumer groups via
//! blocking long-poll reads. Consumer groups that stop polling are reclaimed
//! by a periodic sweep.
//!
//! ## Core Modules
//!
//! - `broker`: topics, consumer-group queues, the broker and its sweeper.
//! - `config`: loading and merging server, broker and logging settings.
//! - `transport`: the HTTP/1.1 API in front of the broker.
//! - `utils`: shared error type and logging initialization.

pub mod broker;
pub mod config;
pub mod transport;
pub mod utils;
