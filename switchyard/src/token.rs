//! Token freshness and refresh serialization.
//!
//! The manager answers one question for the dispatcher: "give me a valid
//! access token for this account". The fast path is a read; the slow path
//! coalesces concurrent refreshers per account so the OAuth endpoint sees
//! at most one call per stale token, while different accounts refresh in
//! parallel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use crate::accounts::{Account, AccountStatus, AccountStore};
use crate::error::{Error, Result};
use crate::oauth::{TokenEndpoint, TokenEndpointError};

/// How long a rate-limited account sits out before the recovery job may
/// return it to rotation.
pub const RATE_LIMIT_COOLDOWN_SECS: i64 = 3600;

pub struct TokenManager {
    accounts: Arc<AccountStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    /// One mutex per account id. A global lock here would serialize the
    /// whole fleet behind one slow refresh.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(accounts: Arc<AccountStore>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            accounts,
            endpoint,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return a valid access token for the account, refreshing first when
    /// the token is inside the expiry buffer.
    pub async fn get_valid_token(&self, id: &str) -> Result<String> {
        let account = self
            .accounts
            .get(id)
            .await
            .ok_or_else(|| Error::NoAccountsAvailable(format!("account {} no longer exists", id)))?;

        if !account.needs_refresh() {
            return Ok(account.access_token);
        }

        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        // Re-check under the lock: a concurrent caller may have finished
        // the refresh while we waited.
        let account = self
            .accounts
            .get(id)
            .await
            .ok_or_else(|| Error::NoAccountsAvailable(format!("account {} no longer exists", id)))?;
        if !account.needs_refresh() {
            return Ok(account.access_token);
        }

        self.refresh(&account).await
    }

    /// Perform one refresh attempt and apply its outcome to the store.
    /// Callers must hold the account's refresh lock.
    async fn refresh(&self, account: &Account) -> Result<String> {
        let now = Utc::now();
        match self.endpoint.refresh(&account.refresh_token).await {
            Ok(grant) => {
                let access_token = grant.access_token.clone();
                let expires_at = now + Duration::seconds(grant.expires_in);
                self.accounts
                    .apply(&account.id, |acc| {
                        acc.access_token = grant.access_token.clone();
                        if let Some(refresh_token) = grant.refresh_token.clone() {
                            acc.refresh_token = refresh_token;
                        }
                        acc.expires_at = expires_at;
                        acc.refresh_at = Some(now);
                        acc.last_refresh_error = None;
                        acc.set_status(AccountStatus::Active, None);
                    })
                    .await?;
                tracing::info!(account_id = %account.id, "token refresh succeeded");
                Ok(access_token)
            }
            Err(e) => {
                let outcome = classify(&e);
                self.accounts
                    .apply(&account.id, |acc| {
                        acc.refresh_at = Some(now);
                        acc.last_refresh_error = Some(e.message.clone());
                        match outcome {
                            RefreshOutcome::RateLimited => acc.set_status(
                                AccountStatus::RateLimited,
                                Some(now + Duration::seconds(RATE_LIMIT_COOLDOWN_SECS)),
                            ),
                            RefreshOutcome::Invalid => {
                                acc.set_status(AccountStatus::Invalid, None)
                            }
                            // Transient failures leave the account active;
                            // the caller still sees the error.
                            RefreshOutcome::Transient => {}
                        }
                    })
                    .await?;
                tracing::warn!(
                    account_id = %account.id,
                    outcome = outcome.label(),
                    http_status = ?e.status,
                    error = %e.message,
                    "token refresh failed"
                );
                Err(Error::RefreshFailed(e.message))
            }
        }
    }

    /// One pass of the scheduled refresh: every active account inside the
    /// buffer gets one attempt. Failures are logged by `refresh` and not
    /// retried until the next pass.
    pub async fn refresh_due_accounts(&self) {
        let due: Vec<Account> = self
            .accounts
            .list_active()
            .await
            .into_iter()
            .filter(Account::needs_refresh)
            .collect();
        if due.is_empty() {
            return;
        }
        tracing::info!(accounts = due.len(), "scheduled refresh pass");
        for account in due {
            let lock = self.lock_for(&account.id).await;
            let _guard = lock.lock().await;
            // An on-demand refresh may have beaten this pass to it.
            let Some(current) = self.accounts.get(&account.id).await else {
                continue;
            };
            if current.status != AccountStatus::Active || !current.needs_refresh() {
                continue;
            }
            let _ = self.refresh(&current).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOutcome {
    RateLimited,
    Invalid,
    Transient,
}

impl RefreshOutcome {
    fn label(self) -> &'static str {
        match self {
            RefreshOutcome::RateLimited => "rate_limited",
            RefreshOutcome::Invalid => "invalid",
            RefreshOutcome::Transient => "transient",
        }
    }
}

fn classify(e: &TokenEndpointError) -> RefreshOutcome {
    let message = e.message.to_lowercase();
    if e.status == Some(429) || message.contains("rate limit") {
        RefreshOutcome::RateLimited
    } else if matches!(e.status, Some(401) | Some(403))
        || message.contains("unauthorized")
        || message.contains("invalid")
    {
        RefreshOutcome::Invalid
    } else {
        RefreshOutcome::Transient
    }
}
