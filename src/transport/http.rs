//! HTTP transport
//!
//! A small HTTP/1.1 server that maps requests onto broker operations:
//!
//! | Method | Path                                        | Operation      |
//! |--------|---------------------------------------------|----------------|
//! | POST   | `/topics/{topic}/messages`                  | publish        |
//! | GET    | `/topics/{topic}/groups/{group}/messages`   | long-poll read |
//! | POST   | `/events/{topic}`                           | publish        |
//! | GET    | `/events/{topic}/{group}/{consumerId}`      | long-poll read |
//! | GET    | `/topics`                                   | list topics    |
//! | GET    | `/health`, `/stats`                         | diagnostics    |
//!
//! Consume accepts `limit` and `timeout` (milliseconds) query parameters,
//! plus `consumerId` on the `/topics` form where it is not in the path. A
//! consume cancelled by broker shutdown answers `410 Gone` with an empty
//! array.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, Consumed, Payload};
use crate::config::ServerSettings;
use crate::transport::message::{ConsumeQuery, PublishResponse, Route};

/// Errors raised while serving HTTP.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("failed to bind to {0}: {1}")]
    Bind(String, std::io::Error),

    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("request body too large (max {0} bytes)")]
    BodyTooLarge(usize),

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid value for '{0}': {1}")]
    InvalidParameter(String, String),
}

impl HttpError {
    /// Status code reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::Bind(..) | HttpError::Accept(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpError::Body(_) | HttpError::InvalidJson(_) | HttpError::InvalidParameter(..) => {
                StatusCode::BAD_REQUEST
            }
            HttpError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

pub struct HttpServer {
    settings: ServerSettings,
    broker: Arc<Broker>,
}

impl HttpServer {
    pub fn new(settings: ServerSettings, broker: Arc<Broker>) -> Self {
        Self { settings, broker }
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, HttpError> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|e| HttpError::Bind(addr, e))
    }

    /// Bind and serve until accepting fails or the future is dropped.
    pub async fn start(&self) -> Result<(), HttpError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), HttpError> {
        if let Ok(addr) = listener.local_addr() {
            info!("HTTP server listening on http://{addr}");
        }

        loop {
            let (stream, remote_addr) = listener.accept().await.map_err(HttpError::Accept)?;
            let io = TokioIo::new(stream);
            let broker = Arc::clone(&self.broker);
            let max_body_bytes = self.settings.max_body_bytes;

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let broker = Arc::clone(&broker);
                    async move {
                        let response = match handle_request(req, &broker, max_body_bytes).await {
                            Ok(resp) => resp,
                            Err(e) => {
                                if e.status().is_server_error() {
                                    error!("Request from {remote_addr} failed: {e}");
                                } else {
                                    debug!("Rejected request from {remote_addr}: {e}");
                                }
                                error_response(e.status(), &e.to_string())
                            }
                        };
                        Ok::<_, std::convert::Infallible>(response)
                    }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    warn!("HTTP connection error from {remote_addr}: {e}");
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    broker: &Broker,
    max_body_bytes: usize,
) -> Result<Response<Full<Bytes>>, HttpError> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    debug!("{method} {path}");

    let body = if method == Method::POST {
        read_body(req, max_body_bytes).await?
    } else {
        Bytes::new()
    };

    dispatch(broker, &method, &path, &query, &body).await
}

/// Route one request to the broker and build its response.
pub async fn dispatch(
    broker: &Broker,
    method: &Method,
    path: &str,
    query: &str,
    body: &[u8],
) -> Result<Response<Full<Bytes>>, HttpError> {
    let Some(route) = Route::resolve(method, path) else {
        return Ok(error_response(StatusCode::NOT_FOUND, "Not found"));
    };

    let response = match route {
        Route::Health => json_response(StatusCode::OK, &serde_json::json!({ "status": "ok" })),
        Route::Stats => json_response(StatusCode::OK, &broker.stats()),
        Route::ListTopics => json_response(StatusCode::OK, &broker.list_topics()),
        Route::Publish { topic } => handle_publish(broker, &topic, body)?,
        Route::Consume {
            topic,
            group,
            consumer_id,
        } => handle_consume(broker, &topic, &group, consumer_id, query).await?,
    };
    Ok(response)
}

fn handle_publish(
    broker: &Broker,
    topic: &str,
    body: &[u8],
) -> Result<Response<Full<Bytes>>, HttpError> {
    let payload: Payload<serde_json::Value> = serde_json::from_slice(body)?;
    let count = broker.publish(topic, payload);

    Ok(json_response(
        StatusCode::OK,
        &PublishResponse {
            server_time_ms: chrono::Utc::now().timestamp_millis(),
            count,
        },
    ))
}

async fn handle_consume(
    broker: &Broker,
    topic: &str,
    group: &str,
    path_consumer_id: Option<String>,
    query: &str,
) -> Result<Response<Full<Bytes>>, HttpError> {
    let query = ConsumeQuery::parse(query)?;
    let consumer_id = path_consumer_id
        .or(query.consumer_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let limit = query.limit.unwrap_or(broker.settings().default_limit);
    let timeout = query.timeout.unwrap_or(broker.settings().default_timeout_ms);

    let response = match broker.consume(topic, group, &consumer_id, limit, timeout).await {
        Consumed::Messages(messages) => json_response(StatusCode::OK, &messages),
        Consumed::Gone => json_response(StatusCode::GONE, &Vec::<String>::new()),
    };
    Ok(response)
}

/// Read the full request body, enforcing a size limit.
async fn read_body(req: Request<Incoming>, max_size: usize) -> Result<Bytes, HttpError> {
    match Limited::new(req.into_body(), max_size).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(HttpError::BodyTooLarge(max_size))
        }
        Err(e) => Err(HttpError::Body(e.to_string())),
    }
}

/// Build a JSON response with the given status code and body.
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| {
            Response::new(Full::new(Bytes::from(
                r#"{"error":"Failed to build response"}"#,
            )))
        })
}

/// Build a JSON error response.
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "error": message }))
}
