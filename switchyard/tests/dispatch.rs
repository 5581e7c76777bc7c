//! End-to-end dispatcher scenarios: the assembled router driven with
//! in-memory stand-ins for the upstream API and the OAuth token endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use bytes::Bytes;
use chrono::{Duration, Utc};
use futures::StreamExt;
use http::{Request, StatusCode, header};
use tower::ServiceExt;

use switchyard::accounts::{Account, AccountStatus, AccountStore};
use switchyard::config::GatewayConfig;
use switchyard::keys::{ClientKey, ClientKeyStore, KeyRole, KeyStatus};
use switchyard::oauth::{TokenEndpoint, TokenEndpointError, TokenGrant};
use switchyard::proxy::{Upstream, UpstreamRequest, UpstreamResponse};
use switchyard::server::Gateway;
use switchyard::sessions::SessionRegistry;

// ---------------------------------------------------------------------------
// Fakes for the two external capabilities

#[derive(Clone)]
struct RecordedCall {
    method: String,
    path_and_query: String,
    authorization: Option<String>,
    anthropic_version: Option<String>,
    body: Bytes,
}

struct FakeUpstream {
    calls: std::sync::Mutex<Vec<RecordedCall>>,
    status: StatusCode,
    content_type: &'static str,
    frames: Vec<Bytes>,
    extra_headers: Vec<(&'static str, &'static str)>,
    failure: Option<fn() -> switchyard::Error>,
}

impl FakeUpstream {
    fn sse(frames: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            calls: std::sync::Mutex::new(Vec::new()),
            status: StatusCode::OK,
            content_type: "text/event-stream",
            frames: frames.into_iter().map(Bytes::from).collect(),
            extra_headers: Vec::new(),
            failure: None,
        })
    }

    fn json(body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: std::sync::Mutex::new(Vec::new()),
            status: StatusCode::OK,
            content_type: "application/json",
            frames: vec![Bytes::from(body)],
            extra_headers: Vec::new(),
            failure: None,
        })
    }

    fn failing(failure: fn() -> switchyard::Error) -> Arc<Self> {
        Arc::new(Self {
            calls: std::sync::Mutex::new(Vec::new()),
            status: StatusCode::OK,
            content_type: "application/json",
            frames: Vec::new(),
            extra_headers: Vec::new(),
            failure: Some(failure),
        })
    }

    fn with_header(self: Arc<Self>, name: &'static str, value: &'static str) -> Arc<Self> {
        let mut extra_headers = self.extra_headers.clone();
        extra_headers.push((name, value));
        Arc::new(Self {
            calls: std::sync::Mutex::new(Vec::new()),
            status: self.status,
            content_type: self.content_type,
            frames: self.frames.clone(),
            extra_headers,
            failure: self.failure,
        })
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn send(&self, request: UpstreamRequest) -> switchyard::Result<UpstreamResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: request.method.to_string(),
            path_and_query: request.path_and_query.clone(),
            authorization: request
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            anthropic_version: request
                .headers
                .get("anthropic-version")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            body: request.body.clone(),
        });

        if let Some(failure) = self.failure {
            return Err(failure());
        }

        let mut headers = http::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            http::HeaderValue::from_static(self.content_type),
        );
        for (name, value) in &self.extra_headers {
            headers.insert(
                http::HeaderName::from_static(name),
                http::HeaderValue::from_static(value),
            );
        }
        let frames = self.frames.clone();
        Ok(UpstreamResponse {
            status: self.status,
            headers,
            body: futures::stream::iter(frames.into_iter().map(Ok)).boxed(),
        })
    }
}

struct FakeOauth {
    refresh_calls: AtomicUsize,
    result: std::sync::Mutex<Result<TokenGrant, TokenEndpointError>>,
}

impl FakeOauth {
    fn granting(access: &str, expires_in: i64) -> Arc<Self> {
        Arc::new(Self {
            refresh_calls: AtomicUsize::new(0),
            result: std::sync::Mutex::new(Ok(TokenGrant {
                access_token: access.to_string(),
                refresh_token: Some(format!("rt_{access}")),
                expires_in,
            })),
        })
    }

    fn failing(status: u16, message: &str) -> Arc<Self> {
        Arc::new(Self {
            refresh_calls: AtomicUsize::new(0),
            result: std::sync::Mutex::new(Err(TokenEndpointError {
                status: Some(status),
                message: message.to_string(),
            })),
        })
    }
}

#[async_trait]
impl TokenEndpoint for FakeOauth {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, TokenEndpointError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _state: &str,
        _code_verifier: &str,
    ) -> Result<TokenGrant, TokenEndpointError> {
        self.result.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Harness

struct Harness {
    router: Router,
    gateway: Gateway,
    upstream: Arc<FakeUpstream>,
    oauth: Arc<FakeOauth>,
    client_key: String,
    account_id: String,
    _dir: tempfile::TempDir,
}

async fn harness(
    upstream: Arc<FakeUpstream>,
    oauth: Arc<FakeOauth>,
    max_concurrent: usize,
    account_expires_in: Duration,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GatewayConfig::default();
    config.session.max_concurrent = max_concurrent;
    config.auth.api_key = Some("admin-secret".into());

    let accounts = Arc::new(AccountStore::load(dir.path().join("accounts.json")).await);
    let keys = Arc::new(ClientKeyStore::load(dir.path().join("tokens.json")).await);
    let sessions = Arc::new(
        SessionRegistry::load(
            dir.path().join("sessions.json"),
            config.session.enabled,
            config.session.max_concurrent,
            config.session_ttl(),
        )
        .await,
    );

    let account = accounts
        .create(Account::new(
            "primary".into(),
            Some("org-1".into()),
            "at_initial".into(),
            "rt_initial".into(),
            Utc::now() + account_expires_in,
        ))
        .await
        .unwrap();
    let key = keys
        .create(ClientKey::new("caller".into(), KeyRole::User))
        .await
        .unwrap();

    let gateway = Gateway::new(
        Arc::new(config),
        accounts,
        keys,
        sessions,
        upstream.clone(),
        oauth.clone(),
    );
    Harness {
        router: gateway.router(),
        gateway,
        upstream,
        oauth,
        client_key: key.key,
        account_id: account.id,
        _dir: dir,
    }
}

fn proxied_request(key: &str, ip: &str, agent: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header(header::AUTHORIZATION, format!("Bearer {key}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, agent)
        .header("x-forwarded-for", ip)
        .body(Body::from(
            r#"{"model":"x","stream":true,"messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios

#[tokio::test]
async fn happy_streaming_path_delivers_frames_in_order() {
    let upstream = FakeUpstream::sse(vec![
        "event: message_start\ndata: {}\n\n",
        "event: content_block_delta\ndata: {}\n\n",
        "event: message_stop\ndata: {}\n\n",
    ]);
    let oauth = FakeOauth::granting("unused", 3600);
    let h = harness(upstream, oauth, 3, Duration::hours(2)).await;

    let response = h
        .router
        .clone()
        .oneshot(proxied_request(&h.client_key, "10.0.0.1:5000", "cli/1.0"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");
    assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");

    let body = body_string(response).await;
    let start = body.find("message_start").unwrap();
    let delta = body.find("content_block_delta").unwrap();
    let stop = body.find("message_stop").unwrap();
    assert!(start < delta && delta < stop);

    // The fresh token was used as-is, with the default version header.
    let calls = h.upstream.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "POST");
    assert_eq!(calls[0].path_and_query, "/v1/messages");
    assert_eq!(calls[0].authorization.as_deref(), Some("Bearer at_initial"));
    assert_eq!(calls[0].anthropic_version.as_deref(), Some("2023-06-01"));
    assert_eq!(h.oauth.refresh_calls.load(Ordering::SeqCst), 0);

    // One usage recorded, one session created.
    let key = h.gateway.keys.get_by_key(&h.client_key).await.unwrap();
    assert_eq!(key.usage_count, 1);
    assert!(key.last_used_at.is_some());
    assert_eq!(h.gateway.sessions.active_count().await, 1);
}

#[tokio::test]
async fn stale_token_is_refreshed_before_forwarding() {
    let upstream = FakeUpstream::json(r#"{"id":"msg_1"}"#);
    let oauth = FakeOauth::granting("at_rotated", 3600);
    // Inside the 60s buffer, so the dispatcher must refresh first.
    let h = harness(upstream, oauth, 3, Duration::seconds(30)).await;

    let response = h
        .router
        .clone()
        .oneshot(proxied_request(&h.client_key, "10.0.0.1:5000", "cli/1.0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(h.oauth.refresh_calls.load(Ordering::SeqCst), 1);
    let calls = h.upstream.calls();
    assert_eq!(calls[0].authorization.as_deref(), Some("Bearer at_rotated"));

    let account = h.gateway.accounts.get(&h.account_id).await.unwrap();
    assert_eq!(account.access_token, "at_rotated");
    let remaining = account.expires_at - Utc::now();
    assert!(remaining > Duration::seconds(3500) && remaining <= Duration::seconds(3600));
}

#[tokio::test]
async fn rate_limited_refresh_fails_the_request_and_parks_the_account() {
    let upstream = FakeUpstream::json(r#"{"id":"msg_1"}"#);
    let oauth = FakeOauth::failing(429, "rate limit exceeded");
    let h = harness(upstream, oauth, 3, Duration::seconds(30)).await;

    let response = h
        .router
        .clone()
        .oneshot(proxied_request(&h.client_key, "10.0.0.1:5000", "cli/1.0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let account = h.gateway.accounts.get(&h.account_id).await.unwrap();
    assert_eq!(account.status, AccountStatus::RateLimited);
    assert!(account.last_refresh_error.is_some());
    let window = account.rate_limited_until.unwrap() - Utc::now();
    assert!(window > Duration::minutes(59) && window <= Duration::hours(1));

    // With the only account parked, the next request is turned away with a
    // message naming the reason, and nothing reaches the upstream.
    let response = h
        .router
        .clone()
        .oneshot(proxied_request(&h.client_key, "10.0.0.2:5000", "cli/1.0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_string(response).await;
    assert!(body.contains("rate limited"), "body: {body}");
    assert!(h.upstream.calls().is_empty());
}

#[tokio::test]
async fn session_cap_turns_away_the_extra_identity() {
    let upstream = FakeUpstream::json(r#"{"id":"msg_1"}"#);
    let oauth = FakeOauth::granting("unused", 3600);
    let h = harness(upstream, oauth, 2, Duration::hours(2)).await;

    let first = h
        .router
        .clone()
        .oneshot(proxied_request(&h.client_key, "10.0.0.1:5000", "agent-a"))
        .await
        .unwrap();
    let second = h
        .router
        .clone()
        .oneshot(proxied_request(&h.client_key, "10.0.0.2:5000", "agent-b"))
        .await
        .unwrap();
    let third = h
        .router
        .clone()
        .oneshot(proxied_request(&h.client_key, "10.0.0.3:5000", "agent-c"))
        .await
        .unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = body_string(third).await;
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["active_count"], 2);
    assert_eq!(value["max_concurrent"], 2);

    // Only the two admitted requests reached the upstream.
    assert_eq!(h.upstream.calls().len(), 2);
}

#[tokio::test]
async fn same_identity_is_not_double_counted() {
    let upstream = FakeUpstream::json(r#"{"id":"msg_1"}"#);
    let oauth = FakeOauth::granting("unused", 3600);
    let h = harness(upstream, oauth, 1, Duration::hours(2)).await;

    for _ in 0..3 {
        let response = h
            .router
            .clone()
            .oneshot(proxied_request(&h.client_key, "10.0.0.1:5000", "agent-a"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(h.gateway.sessions.active_count().await, 1);
}

#[tokio::test]
async fn missing_or_inactive_keys_get_401() {
    let upstream = FakeUpstream::json(r#"{"id":"msg_1"}"#);
    let oauth = FakeOauth::granting("unused", 3600);
    let h = harness(upstream, oauth, 3, Duration::hours(2)).await;

    // No Authorization header at all.
    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Unknown key.
    let response = h
        .router
        .clone()
        .oneshot(proxied_request("sk-gw-unknown", "10.0.0.1:5000", "cli/1.0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Deactivated key.
    let mut key = h.gateway.keys.get_by_key(&h.client_key).await.unwrap();
    key.status = KeyStatus::Inactive;
    h.gateway.keys.update(key).await.unwrap();
    let response = h
        .router
        .clone()
        .oneshot(proxied_request(&h.client_key, "10.0.0.1:5000", "cli/1.0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(h.upstream.calls().is_empty());
}

#[tokio::test]
async fn thinking_budget_normalization_rewrites_the_forwarded_body() {
    let upstream = FakeUpstream::json(r#"{"id":"msg_1"}"#);
    let oauth = FakeOauth::granting("unused", 3600);
    let h = harness(upstream, oauth, 3, Duration::hours(2)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header(header::AUTHORIZATION, format!("Bearer {}", h.client_key))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "10.0.0.1")
        .body(Body::from(
            r#"{"model":"x","max_tokens":1000,"thinking":{"type":"enabled","budget_tokens":5000}}"#,
        ))
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let calls = h.upstream.calls();
    let forwarded: serde_json::Value = serde_json::from_slice(&calls[0].body).unwrap();
    // 5000 + max(1024, 500) = 6024
    assert_eq!(forwarded["max_tokens"], 6024);
    assert_eq!(forwarded["thinking"]["budget_tokens"], 5000);
}

#[tokio::test]
async fn health_endpoint_needs_no_auth() {
    let upstream = FakeUpstream::json("{}");
    let oauth = FakeOauth::granting("unused", 3600);
    let h = harness(upstream, oauth, 3, Duration::hours(2)).await;

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(value["status"], "healthy");
    assert!(value["timestamp"].is_string());
}

#[tokio::test]
async fn admin_surface_requires_a_key_and_masks_secrets() {
    let upstream = FakeUpstream::json("{}");
    let oauth = FakeOauth::granting("at_provisioned", 3600);
    let h = harness(upstream, oauth, 3, Duration::hours(2)).await;

    // Unauthenticated listing is refused.
    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/tokens")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The configured X-API-Key opens it; listed secrets are masked.
    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/tokens")
                .header("x-api-key", "admin-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(!body.contains(&h.client_key), "full secret leaked: {body}");

    // A user-role bearer key is authenticated but not authorized.
    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/statistics")
                .header(header::AUTHORIZATION, format!("Bearer {}", h.client_key))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Statistics reflect the single healthy account.
    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/statistics")
                .header("x-api-key", "admin-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(value["total_accounts"], 1);
    assert_eq!(value["system_health"], "healthy");
}

#[tokio::test]
async fn account_provisioning_exchanges_the_code() {
    let upstream = FakeUpstream::json("{}");
    let oauth = FakeOauth::granting("at_provisioned", 7200);
    let h = harness(upstream, oauth, 3, Duration::hours(2)).await;

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/accounts")
                .header("x-api-key", "admin-secret")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"code":"auth-code","state":"st","code_verifier":"ver","name":"second","org_id":"org-2"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let value: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(value["name"], "second");
    assert_eq!(value["status"], "active");
    // Token material never appears in admin views.
    assert!(value.get("access_token").is_none());

    assert_eq!(h.gateway.accounts.count().await, 2);
}

#[tokio::test]
async fn upstream_deadline_maps_to_408() {
    let upstream = FakeUpstream::failing(|| switchyard::Error::RequestTimeout);
    let oauth = FakeOauth::granting("unused", 3600);
    let h = harness(upstream, oauth, 3, Duration::hours(2)).await;

    let response = h
        .router
        .clone()
        .oneshot(proxied_request(&h.client_key, "10.0.0.1:5000", "cli/1.0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
}

#[tokio::test]
async fn unreachable_upstream_maps_to_503() {
    let upstream =
        FakeUpstream::failing(|| switchyard::Error::Upstream("connection refused".into()));
    let oauth = FakeOauth::granting("unused", 3600);
    let h = harness(upstream, oauth, 3, Duration::hours(2)).await;

    let response = h
        .router
        .clone()
        .oneshot(proxied_request(&h.client_key, "10.0.0.1:5000", "cli/1.0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn upstream_response_headers_pass_through() {
    let upstream = FakeUpstream::json(r#"{"id":"msg_1"}"#).with_header("request-id", "req_123");
    let oauth = FakeOauth::granting("unused", 3600);
    let h = harness(upstream, oauth, 3, Duration::hours(2)).await;

    let response = h
        .router
        .clone()
        .oneshot(proxied_request(&h.client_key, "10.0.0.1:5000", "cli/1.0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("request-id").unwrap(), "req_123");
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(body_string(response).await, r#"{"id":"msg_1"}"#);
}

#[tokio::test]
async fn query_strings_are_forwarded_intact() {
    let upstream = FakeUpstream::json("{}");
    let oauth = FakeOauth::granting("unused", 3600);
    let h = harness(upstream, oauth, 3, Duration::hours(2)).await;

    let request = Request::builder()
        .method("GET")
        .uri("/v1/models?limit=5&after=model-x")
        .header(header::AUTHORIZATION, format!("Bearer {}", h.client_key))
        .header("x-forwarded-for", "10.0.0.1")
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let calls = h.upstream.calls();
    assert_eq!(calls[0].method, "GET");
    assert_eq!(calls[0].path_and_query, "/v1/models?limit=5&after=model-x");
}

#[tokio::test]
async fn restart_recovers_state_from_the_last_sync() {
    let dir = tempfile::tempdir().unwrap();

    // First life: two accounts, one key; mutate; sync; "crash".
    {
        let accounts = AccountStore::load(dir.path().join("accounts.json")).await;
        let keys = ClientKeyStore::load(dir.path().join("tokens.json")).await;

        accounts
            .create(Account::new(
                "a".into(),
                None,
                "at_a".into(),
                "rt_a".into(),
                Utc::now() + Duration::hours(2),
            ))
            .await
            .unwrap();
        let doomed = keys
            .create(ClientKey::new("doomed".into(), KeyRole::User))
            .await
            .unwrap();
        keys.create(ClientKey::new("kept".into(), KeyRole::User))
            .await
            .unwrap();

        accounts
            .create(Account::new(
                "b".into(),
                None,
                "at_b".into(),
                "rt_b".into(),
                Utc::now() + Duration::hours(2),
            ))
            .await
            .unwrap();
        keys.delete(&doomed.id).await.unwrap();

        accounts.sync().await.unwrap();
        keys.sync().await.unwrap();
        // No final flush: the process dies here.
    }

    // Second life: the post-mutation state is back.
    let accounts = AccountStore::load(dir.path().join("accounts.json")).await;
    let keys = ClientKeyStore::load(dir.path().join("tokens.json")).await;

    let mut names: Vec<String> = accounts.list().await.into_iter().map(|a| a.name).collect();
    names.sort();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

    let key_names: Vec<String> = keys.list().await.into_iter().map(|k| k.name).collect();
    assert_eq!(key_names, vec!["kept".to_string()]);
}
