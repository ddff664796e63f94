//! Request and response shapes of the HTTP API.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::transport::http::HttpError;

/// Body of a successful publish.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub server_time_ms: i64,
    pub count: usize,
}

/// Query parameters of a consume request, before defaults are applied.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConsumeQuery {
    pub consumer_id: Option<String>,
    pub limit: Option<i64>,
    pub timeout: Option<i64>,
}

impl ConsumeQuery {
    /// Parse `consumerId`, `limit` and `timeout` from a raw query string.
    /// Unknown parameters are ignored.
    pub fn parse(query: &str) -> Result<Self, HttpError> {
        let params = parse_query_params(query);
        Ok(Self {
            consumer_id: params.get("consumerId").filter(|id| !id.is_empty()).cloned(),
            limit: parse_number(&params, "limit")?,
            timeout: parse_number(&params, "timeout")?,
        })
    }
}

fn parse_number(params: &HashMap<String, String>, name: &str) -> Result<Option<i64>, HttpError> {
    match params.get(name) {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| HttpError::InvalidParameter(name.to_string(), raw.clone())),
    }
}

/// Parse URL query parameters into a map using `application/x-www-form-urlencoded`
/// rules: `+` is a space in keys and values, and malformed escapes are kept
/// literally. Later duplicates win.
pub fn parse_query_params(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Decode `%XX` escapes in a path segment. `+` is left alone and malformed
/// escapes are kept literally. Returns `None` if the result is not UTF-8.
pub fn percent_decode(input: &str) -> Option<String> {
    percent_decode_str(input)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Routes understood by the server.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    Health,
    Stats,
    ListTopics,
    Publish {
        topic: String,
    },
    Consume {
        topic: String,
        group: String,
        /// Set when the consumer id is part of the path.
        consumer_id: Option<String>,
    },
}

impl Route {
    /// Match a method and path. Path segments are percent-decoded.
    ///
    /// Besides the `/topics` routes, the DMaaP-style `POST /events/{topic}`
    /// and `GET /events/{topic}/{group}/{consumerId}` are accepted.
    pub fn resolve(method: &hyper::Method, path: &str) -> Option<Self> {
        let segments: Vec<String> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(percent_decode)
            .collect::<Option<_>>()?;
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        match (method, segments.as_slice()) {
            (&hyper::Method::GET, ["health"]) => Some(Route::Health),
            (&hyper::Method::GET, ["stats"]) => Some(Route::Stats),
            (&hyper::Method::GET, ["topics"]) => Some(Route::ListTopics),
            (&hyper::Method::POST, ["topics", topic, "messages"])
            | (&hyper::Method::POST, ["events", topic]) => Some(Route::Publish {
                topic: topic.to_string(),
            }),
            (&hyper::Method::GET, ["topics", topic, "groups", group, "messages"]) => {
                Some(Route::Consume {
                    topic: topic.to_string(),
                    group: group.to_string(),
                    consumer_id: None,
                })
            }
            (&hyper::Method::GET, ["events", topic, group, consumer_id]) => Some(Route::Consume {
                topic: topic.to_string(),
                group: group.to_string(),
                consumer_id: Some(consumer_id.to_string()),
            }),
            _ => None,
        }
    }
}
