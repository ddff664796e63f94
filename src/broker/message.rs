//! Message definitions for the broker
//!
//! The broker treats a message as an opaque, already-serialized string. What
//! arrives at publish time is any serializable value; it is turned into its
//! canonical string form once, before fan-out:
//! - a JSON string is kept as-is (no surrounding quotes)
//! - anything else becomes its compact JSON text
//!
//! An entry that cannot be serialized is dropped on its own; the rest of the
//! batch is still delivered.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A publish body: either one message or a batch of them.
///
/// Deserializes untagged, so a JSON array is a batch and any other JSON
/// value is a single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload<T> {
    Batch(Vec<T>),
    Single(T),
}

impl<T> Payload<T> {
    /// Normalize into a list of messages.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Payload::Batch(messages) => messages,
            Payload::Single(message) => vec![message],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Batch(messages) => messages.len(),
            Payload::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> From<Vec<T>> for Payload<T> {
    fn from(messages: Vec<T>) -> Self {
        Payload::Batch(messages)
    }
}

/// Canonical string form of a message, or `None` if it cannot be serialized.
pub fn to_canonical<T: Serialize>(message: &T) -> Option<String> {
    match serde_json::to_value(message) {
        Ok(Value::String(text)) => Some(text),
        Ok(other) => Some(other.to_string()),
        Err(e) => {
            debug!("Dropping unconvertible message: {e}");
            None
        }
    }
}
