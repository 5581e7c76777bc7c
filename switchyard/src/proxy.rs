//! The request dispatcher and stream pump.
//!
//! One handler owns the whole proxied exchange: validate the caller's key,
//! admit a session, select an account, get a valid access token, forward,
//! and relay the response — streamed byte-for-byte when the upstream
//! answers with SSE, buffered otherwise.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};

use crate::error::{Error, Result};
use crate::keys::KeyStatus;
use crate::server::Gateway;

/// Upper bound on a buffered request body. Large prompts fit comfortably;
/// anything bigger is rejected rather than held in memory.
const MAX_REQUEST_BODY: usize = 32 * 1024 * 1024;

const ANTHROPIC_VERSION_HEADER: &str = "anthropic-version";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// The upstream API as one capability: send an HTTP exchange, get back a
/// status, headers, and a byte stream. Pluggable so tests can stand in a
/// scripted upstream.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse>;
}

pub struct UpstreamRequest {
    pub method: Method,
    /// Path plus query string, starting with `/`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
}

/// reqwest-backed upstream, sharing the process-wide pooled client.
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse> {
        let url = format!("{}{}", self.base_url, request.path_and_query);
        let mut builder = self
            .client
            .request(request.method, url)
            .timeout(self.timeout)
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::RequestTimeout
            } else {
                Error::Upstream(e.to_string())
            }
        })?;

        Ok(UpstreamResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body: response
                .bytes_stream()
                .map_err(std::io::Error::other)
                .boxed(),
        })
    }
}

/// `ANY /v1/{*path}` — the data plane.
pub async fn dispatch(State(gateway): State<Gateway>, request: Request) -> Result<Response> {
    let started = Instant::now();
    let (parts, body) = request.into_parts();

    // 1. Authenticate the caller.
    let secret = extract_bearer(&parts.headers).ok_or(Error::Unauthorized)?;
    let key = gateway
        .keys
        .get_by_key(secret)
        .await
        .ok_or(Error::Unauthorized)?;
    if key.status != KeyStatus::Active {
        return Err(Error::Unauthorized);
    }

    // 2. Record usage. Write-behind means this never fails the request.
    gateway.keys.record_usage(&key.id).await;

    // 3. Admit a session for this client identity.
    let remote_addr = client_addr(&parts.headers, parts.extensions.get::<ConnectInfo<SocketAddr>>());
    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    gateway
        .sessions
        .admit(&key.id, &remote_addr, &user_agent, parts.uri.path())
        .await?;

    // 4. Select an account, 5. and get a token it can actually use.
    let account = gateway.pool.pick().await?;
    let access_token = gateway.tokens.get_valid_token(&account.id).await?;

    // 6. Normalize the body when a thinking budget would starve max_tokens.
    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| Error::BadRequest(format!("read request body: {}", e)))?;
    let body = match normalize_body(&body) {
        Some(rewritten) => Bytes::from(rewritten),
        None => body,
    };

    // 7. Forward with the account's credentials swapped in.
    let mut headers = copy_request_headers(&parts.headers);
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| Error::Internal(format!("access token not header-safe: {}", e)))?,
    );
    if !body.is_empty() && !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }
    let version_header = HeaderName::from_static(ANTHROPIC_VERSION_HEADER);
    if !headers.contains_key(&version_header) {
        headers.insert(
            version_header,
            HeaderValue::from_static(DEFAULT_ANTHROPIC_VERSION),
        );
    }

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let upstream_response = gateway
        .upstream
        .send(UpstreamRequest {
            method: parts.method.clone(),
            path_and_query: path_and_query.clone(),
            headers,
            body,
        })
        .await?;

    tracing::info!(
        method = %parts.method,
        path = %path_and_query,
        account_id = %account.id,
        status = upstream_response.status.as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "proxied request"
    );

    // 8. Relay the response.
    relay_response(upstream_response, account.id, path_and_query).await
}

async fn relay_response(
    upstream: UpstreamResponse,
    account_id: String,
    path: String,
) -> Result<Response> {
    let streaming = upstream
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));

    let mut builder = http::Response::builder().status(upstream.status);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in upstream.headers.iter() {
            if is_hop_header(name) {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }
        if streaming {
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
            headers.insert(
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            );
        }
    }

    let body = if streaming {
        Body::from_stream(StreamPump::new(upstream.body, account_id, path))
    } else {
        // Buffered mode: collect the whole body before answering, so the
        // status line and body stand or fall together.
        let mut collected: Vec<u8> = Vec::new();
        let mut upstream_body = upstream.body;
        while let Some(chunk) = upstream_body
            .try_next()
            .await
            .map_err(|e| Error::Upstream(format!("read upstream body: {}", e)))?
        {
            collected.extend_from_slice(&chunk);
        }
        Body::from(collected)
    };

    builder
        .body(body)
        .map_err(|e| Error::Internal(e.to_string()))
}

/// Headers never forwarded in either direction.
fn is_hop_header(name: &HeaderName) -> bool {
    name == header::TRANSFER_ENCODING
        || name == header::CONTENT_LENGTH
        || name == header::CONNECTION
}

fn copy_request_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in incoming.iter() {
        if name == header::AUTHORIZATION || name == header::HOST || is_hop_header(name) {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }
    headers
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Best available client address: proxy header first, then the socket.
fn client_addr(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        let forwarded = forwarded.trim();
        if !forwarded.is_empty() {
            return forwarded.to_string();
        }
    }
    connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Bump `max_tokens` when it does not clear the thinking budget. Returns
/// the rewritten body, or `None` when the body is left untouched.
pub fn normalize_body(body: &[u8]) -> Option<Vec<u8>> {
    let mut value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object()?;
    let budget = object.get("thinking")?.get("budget_tokens")?.as_i64()?;
    let max_tokens = object.get("max_tokens")?.as_i64()?;
    if max_tokens > budget {
        return None;
    }

    let bumped = budget + std::cmp::max(1024, budget / 10);
    tracing::warn!(
        max_tokens,
        budget_tokens = budget,
        bumped,
        "max_tokens does not clear the thinking budget, raising it"
    );
    value
        .as_object_mut()?
        .insert("max_tokens".to_string(), serde_json::json!(bumped));
    serde_json::to_vec(&value).ok()
}

/// Copies the upstream byte stream to the client, recording how the
/// exchange ended.
///
/// Termination cases:
/// - upstream EOF: clean end;
/// - upstream read error: stop silently, the client sees truncation;
/// - client disconnect: the response body is dropped mid-stream, which both
///   logs the exchange as 499 and drops the upstream stream, closing that
///   connection promptly.
pub struct StreamPump {
    inner: BoxStream<'static, std::io::Result<Bytes>>,
    account_id: String,
    path: String,
    bytes_sent: u64,
    finished: bool,
}

impl StreamPump {
    pub fn new(inner: BoxStream<'static, std::io::Result<Bytes>>, account_id: String, path: String) -> Self {
        Self {
            inner,
            account_id,
            path,
            bytes_sent: 0,
            finished: false,
        }
    }
}

impl Stream for StreamPump {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes_sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(
                    account_id = %this.account_id,
                    path = %this.path,
                    bytes_sent = this.bytes_sent,
                    error = %e,
                    "upstream read failed mid-stream, truncating"
                );
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.finished = true;
                tracing::debug!(
                    account_id = %this.account_id,
                    path = %this.path,
                    bytes_sent = this.bytes_sent,
                    "stream complete"
                );
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for StreamPump {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(
                account_id = %self.account_id,
                path = %self.path,
                bytes_sent = self.bytes_sent,
                status = 499,
                "client disconnected before stream completed"
            );
        }
    }
}
