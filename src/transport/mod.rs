//! The `transport` module exposes the broker over HTTP.
//!
//! It defines the request/response shapes and routing table, and implements
//! the HTTP/1.1 server that forwards publish, consume and topic-listing
//! requests to the broker.

pub mod http;
pub mod message;

pub use http::{HttpError, HttpServer};
