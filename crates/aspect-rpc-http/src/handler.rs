//! HTTP request handler for the RPC endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use aspect_rpc_server::{Dispatcher, RequestScope, ResponseEnvelope};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::ServerConfig;

/// Address of the connected client, stored in the request scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// Turns HTTP requests into dispatcher calls
#[derive(Clone)]
pub struct RpcHttpHandler {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) dispatcher: Arc<Dispatcher>,
}

impl RpcHttpHandler {
    pub fn new(config: Arc<ServerConfig>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { config, dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Handle one HTTP request
    pub async fn handle<B>(&self, req: Request<B>, peer: Option<SocketAddr>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        debug!("Handling {} {}", req.method(), req.uri().path());

        if req.uri().path() != self.config.rpc_path {
            return text_response(StatusCode::NOT_FOUND, "Not Found");
        }
        if req.method() != Method::POST {
            return method_not_allowed();
        }

        let max = self.config.max_body_size;
        if declared_length(&req).is_some_and(|len| len > max as u64) {
            return too_large(max);
        }

        let scope = build_scope(&req, peer);
        let body = match Limited::new(req.into_body(), max).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                return too_large(max);
            }
            Err(err) => {
                warn!("Failed to read request body: {}", err);
                return envelope_response(
                    StatusCode::BAD_REQUEST,
                    &ResponseEnvelope::failure("failed to read request body"),
                );
            }
        };

        let envelope = self.dispatcher.dispatch_bytes(&body, scope).await;
        envelope_response(StatusCode::OK, &envelope)
    }
}

fn build_scope<B>(req: &Request<B>, peer: Option<SocketAddr>) -> RequestScope {
    let mut scope = RequestScope::new();
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            scope.add_metadata(name.as_str(), Value::String(value.to_string()));
        }
    }
    if let Some(peer) = peer {
        scope.insert(PeerAddr(peer));
    }
    scope
}

fn declared_length<B>(req: &Request<B>) -> Option<u64> {
    req.headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

fn envelope_response(status: StatusCode, envelope: &ResponseEnvelope) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(envelope.to_vec())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn too_large(max: usize) -> Response<Full<Bytes>> {
    warn!(max_body_size = max, "Request body too large");
    envelope_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        &ResponseEnvelope::failure(format!("request body exceeds {} bytes", max)),
    )
}

fn method_not_allowed() -> Response<Full<Bytes>> {
    let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static("POST"));
    response
}

fn text_response(status: StatusCode, text: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(text.as_bytes())));
    *response.status_mut() = status;
    response
}
