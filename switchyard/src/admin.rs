//! Administrative surface: account provisioning and CRUD, client key CRUD,
//! session observability, and fleet statistics.
//!
//! Everything here sits behind `require_admin`: either the configured
//! `X-API-Key`, or a bearer client key whose role is admin. Responses use
//! sanitized views — raw secrets leave the process exactly once, when a
//! client key is created.

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::accounts::{Account, AccountStatus};
use crate::error::{Error, Result};
use crate::keys::{ClientKey, KeyRole, KeyStatus};
use crate::pool;
use crate::proxy::extract_bearer;
use crate::server::Gateway;
use crate::sessions::Session;

// ---------------------------------------------------------------------------
// Auth

pub async fn require_admin(
    State(gateway): State<Gateway>,
    request: Request,
    next: Next,
) -> Response {
    match authorize(&gateway, request.headers()).await {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

async fn authorize(gateway: &Gateway, headers: &http::HeaderMap) -> Result<()> {
    if let Some(expected) = gateway.config.auth.api_key.as_deref() {
        let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
        if provided == Some(expected) {
            return Ok(());
        }
    }

    let secret = extract_bearer(headers)
        .ok_or(Error::Unauthorized)?
        .to_string();
    let key = gateway
        .keys
        .get_by_key(&secret)
        .await
        .ok_or(Error::Unauthorized)?;
    if key.status != KeyStatus::Active {
        return Err(Error::Unauthorized);
    }
    if key.role != KeyRole::Admin {
        return Err(Error::Forbidden);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Accounts

/// Payload from the OAuth collaborator once the human finished the
/// authorization dance. The gateway only performs the code exchange.
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub code: String,
    pub state: String,
    pub code_verifier: String,
    pub name: String,
    #[serde(default)]
    pub org_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    /// Only `active`/`inactive` are admin-settable; the refresher owns the
    /// failure states.
    #[serde(default)]
    pub status: Option<String>,
}

/// Account as shown to administrators: everything but the token material.
#[derive(Debug, Serialize)]
pub struct AccountView {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    pub status: AccountStatus,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_error: Option<String>,
    pub needs_refresh: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        let needs_refresh = account.needs_refresh();
        Self {
            id: account.id,
            name: account.name,
            org_id: account.org_id,
            status: account.status,
            expires_at: account.expires_at,
            refresh_at: account.refresh_at,
            rate_limited_until: account.rate_limited_until,
            last_refresh_error: account.last_refresh_error,
            needs_refresh,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

pub async fn create_account(
    State(gateway): State<Gateway>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse> {
    if request.name.trim().is_empty() {
        return Err(Error::BadRequest("name is required".into()));
    }

    let grant = gateway
        .oauth
        .exchange_code(&request.code, &request.state, &request.code_verifier)
        .await
        .map_err(|e| Error::BadRequest(format!("code exchange failed: {}", e)))?;

    let refresh_token = grant
        .refresh_token
        .ok_or_else(|| Error::BadRequest("authorization grant carried no refresh token".into()))?;
    let account = Account::new(
        request.name,
        request.org_id,
        grant.access_token,
        refresh_token,
        Utc::now() + Duration::seconds(grant.expires_in),
    );
    let account = gateway.accounts.create(account).await?;
    tracing::info!(account_id = %account.id, name = %account.name, "account provisioned");
    Ok((StatusCode::CREATED, Json(AccountView::from(account))))
}

pub async fn list_accounts(State(gateway): State<Gateway>) -> Json<Vec<AccountView>> {
    let accounts = gateway.accounts.list().await;
    Json(accounts.into_iter().map(AccountView::from).collect())
}

pub async fn get_account(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
) -> Result<Json<AccountView>> {
    let account = gateway
        .accounts
        .get(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("account {}", id)))?;
    Ok(Json(AccountView::from(account)))
}

pub async fn update_account(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
    Json(request): Json<UpdateAccountRequest>,
) -> Result<Json<AccountView>> {
    let mut account = gateway
        .accounts
        .get(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("account {}", id)))?;

    if let Some(name) = request.name {
        account.name = name;
    }
    if let Some(org_id) = request.org_id {
        account.org_id = if org_id.is_empty() { None } else { Some(org_id) };
    }
    if let Some(status) = request.status {
        match status.as_str() {
            "active" => account.set_status(AccountStatus::Active, None),
            "inactive" => account.set_status(AccountStatus::Inactive, None),
            other => {
                return Err(Error::BadRequest(format!(
                    "status {:?} is not admin-settable",
                    other
                )));
            }
        }
    }

    let account = gateway.accounts.update(account).await?;
    Ok(Json(AccountView::from(account)))
}

pub async fn delete_account(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    gateway.accounts.delete(&id).await?;
    tracing::info!(account_id = %id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Client keys

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub role: Option<KeyRole>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateKeyRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<KeyStatus>,
    #[serde(default)]
    pub role: Option<KeyRole>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct KeyListQuery {
    pub role: Option<KeyRole>,
    pub status: Option<KeyStatus>,
    pub search: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// Key as listed: the secret is masked down to prefix + tail.
#[derive(Debug, Serialize)]
pub struct ClientKeyView {
    pub id: String,
    pub name: String,
    pub key: String,
    pub status: KeyStatus,
    pub role: KeyRole,
    pub usage_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ClientKey> for ClientKeyView {
    fn from(key: ClientKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            key: mask_key(&key.key),
            status: key.status,
            role: key.role,
            usage_count: key.usage_count,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}

/// Create response is the one place the full secret appears.
#[derive(Debug, Serialize)]
pub struct CreatedKeyResponse {
    pub id: String,
    pub name: String,
    pub key: String,
    pub status: KeyStatus,
    pub role: KeyRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct KeyListResponse {
    pub keys: Vec<ClientKeyView>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

pub fn mask_key(key: &str) -> String {
    if key.len() <= 12 {
        return "****".to_string();
    }
    format!("{}****{}", &key[..8], &key[key.len() - 4..])
}

pub async fn create_key(
    State(gateway): State<Gateway>,
    Json(request): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse> {
    if request.name.trim().is_empty() {
        return Err(Error::BadRequest("name is required".into()));
    }
    let key = ClientKey::new(request.name, request.role.unwrap_or(KeyRole::User));
    let key = gateway.keys.create(key).await?;
    tracing::info!(key_id = %key.id, name = %key.name, "client key issued");
    Ok((
        StatusCode::CREATED,
        Json(CreatedKeyResponse {
            id: key.id,
            name: key.name,
            key: key.key,
            status: key.status,
            role: key.role,
            created_at: key.created_at,
        }),
    ))
}

pub async fn list_keys(
    State(gateway): State<Gateway>,
    Query(query): Query<KeyListQuery>,
) -> Json<KeyListResponse> {
    let keys = gateway.keys.list().await;
    Json(filter_keys(keys, &query))
}

/// Filtering and pagination over an in-memory snapshot; pure so the edge
/// cases are unit-testable.
pub fn filter_keys(keys: Vec<ClientKey>, query: &KeyListQuery) -> KeyListResponse {
    let needle = query.search.as_deref().map(str::to_lowercase);
    let mut matched: Vec<ClientKey> = keys
        .into_iter()
        .filter(|k| query.role.is_none_or(|role| k.role == role))
        .filter(|k| query.status.is_none_or(|status| k.status == status))
        .filter(|k| {
            needle.as_deref().is_none_or(|needle| {
                k.name.to_lowercase().contains(needle) || k.key.to_lowercase().contains(needle)
            })
        })
        .collect();
    matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let total = matched.len();
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let start = (page - 1).saturating_mul(limit);
    let keys = matched
        .into_iter()
        .skip(start)
        .take(limit)
        .map(ClientKeyView::from)
        .collect();

    KeyListResponse {
        keys,
        total,
        page,
        limit,
    }
}

pub async fn get_key(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
) -> Result<Json<ClientKeyView>> {
    let key = gateway
        .keys
        .get(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("client key {}", id)))?;
    Ok(Json(ClientKeyView::from(key)))
}

pub async fn update_key(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
    Json(request): Json<UpdateKeyRequest>,
) -> Result<Json<ClientKeyView>> {
    let mut key = gateway
        .keys
        .get(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("client key {}", id)))?;

    if let Some(name) = request.name {
        key.name = name;
    }
    if let Some(status) = request.status {
        key.status = status;
    }
    if let Some(role) = request.role {
        key.role = role;
    }

    let key = gateway.keys.update(key).await?;
    Ok(Json(ClientKeyView::from(key)))
}

pub async fn delete_key(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    gateway.keys.delete(&id).await?;
    tracing::info!(key_id = %id, "client key deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Sessions and statistics

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: String,
    pub client_key_id: String,
    pub user_agent: String,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub request_path: String,
    /// Whether the slot currently counts against the cap.
    pub live: bool,
}

impl SessionView {
    fn from_session(session: Session, now: DateTime<Utc>) -> Self {
        let live = session.is_live(now);
        Self {
            id: session.id,
            client_key_id: session.client_key_id,
            user_agent: session.user_agent,
            ip_address: session.ip_address,
            created_at: session.created_at,
            last_seen_at: session.last_seen_at,
            expires_at: session.expires_at,
            is_active: session.is_active,
            request_path: session.request_path,
            live,
        }
    }
}

pub async fn list_sessions(State(gateway): State<Gateway>) -> Json<Vec<SessionView>> {
    let now = Utc::now();
    let sessions = gateway.sessions.list().await;
    Json(
        sessions
            .into_iter()
            .map(|s| SessionView::from_session(s, now))
            .collect(),
    )
}

pub async fn revoke_session(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    gateway.sessions.revoke(&id).await?;
    tracing::info!(session_id = %id, "session revoked");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn statistics(State(gateway): State<Gateway>) -> Json<pool::Statistics> {
    Json(pool::statistics(&gateway.accounts).await)
}
