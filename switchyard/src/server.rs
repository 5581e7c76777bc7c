//! Gateway state and router assembly.

use std::sync::Arc;

use axum::Json;
use axum::middleware;
use axum::routing::{any, delete, get};
use axum::Router;
use chrono::Utc;
use serde_json::json;

use crate::accounts::AccountStore;
use crate::admin;
use crate::config::GatewayConfig;
use crate::keys::ClientKeyStore;
use crate::oauth::TokenEndpoint;
use crate::pool::AccountPool;
use crate::proxy::{self, Upstream};
use crate::sessions::SessionRegistry;
use crate::token::TokenManager;

/// Everything a handler needs, cheaply cloneable.
#[derive(Clone)]
pub struct Gateway {
    pub config: Arc<GatewayConfig>,
    pub accounts: Arc<AccountStore>,
    pub keys: Arc<ClientKeyStore>,
    pub sessions: Arc<SessionRegistry>,
    pub tokens: Arc<TokenManager>,
    pub pool: Arc<AccountPool>,
    pub upstream: Arc<dyn Upstream>,
    pub oauth: Arc<dyn TokenEndpoint>,
}

impl Gateway {
    pub fn new(
        config: Arc<GatewayConfig>,
        accounts: Arc<AccountStore>,
        keys: Arc<ClientKeyStore>,
        sessions: Arc<SessionRegistry>,
        upstream: Arc<dyn Upstream>,
        oauth: Arc<dyn TokenEndpoint>,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(accounts.clone(), oauth.clone()));
        let pool = Arc::new(AccountPool::new(accounts.clone()));
        Self {
            config,
            accounts,
            keys,
            sessions,
            tokens,
            pool,
            upstream,
            oauth,
        }
    }

    /// The full HTTP surface: data plane, health, and the admin routes
    /// behind their auth middleware.
    pub fn router(&self) -> Router {
        let admin_routes = Router::new()
            .route(
                "/accounts",
                get(admin::list_accounts).post(admin::create_account),
            )
            .route(
                "/accounts/{id}",
                get(admin::get_account)
                    .put(admin::update_account)
                    .delete(admin::delete_account),
            )
            .route("/tokens", get(admin::list_keys).post(admin::create_key))
            .route(
                "/tokens/{id}",
                get(admin::get_key)
                    .put(admin::update_key)
                    .delete(admin::delete_key),
            )
            .route("/admin/sessions", get(admin::list_sessions))
            .route("/sessions/{id}", delete(admin::revoke_session))
            .route("/admin/statistics", get(admin::statistics))
            .layer(middleware::from_fn_with_state(
                self.clone(),
                admin::require_admin,
            ));

        Router::new()
            .route("/health", get(health))
            .route("/v1/{*path}", any(proxy::dispatch))
            .merge(admin_routes)
            .with_state(self.clone())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
    }))
}
