//! Health-aware account selection and fleet statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use serde::Serialize;

use crate::accounts::{Account, AccountStatus, AccountStore};
use crate::error::{Error, Result};

/// Round-robin selector over the active accounts.
///
/// Accounts outside `active` status never enter the candidate list, so a
/// rate-limited or invalid account cannot be handed to a request. Within
/// the active set, accounts whose token is already fresh are preferred over
/// ones that would force an inline refresh.
pub struct AccountPool {
    accounts: Arc<AccountStore>,
    cursor: AtomicUsize,
}

impl AccountPool {
    pub fn new(accounts: Arc<AccountStore>) -> Self {
        Self {
            accounts,
            cursor: AtomicUsize::new(0),
        }
    }

    pub async fn pick(&self) -> Result<Account> {
        let active = self.accounts.list_active().await;
        if active.is_empty() {
            let total = self.accounts.count().await;
            let detail = if total == 0 {
                "no accounts are configured".to_string()
            } else {
                "all accounts are rate limited, invalid, or inactive".to_string()
            };
            return Err(Error::NoAccountsAvailable(detail));
        }

        let (healthy, stale): (Vec<Account>, Vec<Account>) =
            active.into_iter().partition(|a| !a.needs_refresh());
        let candidates = if healthy.is_empty() { stale } else { healthy };

        // list_active returns a stable (id-sorted) order, so the counter
        // walks the fleet evenly.
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Ok(candidates[idx].clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Fleet-level counts, recomputed on demand from the in-memory store.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_accounts: usize,
    pub active_accounts: usize,
    pub inactive_accounts: usize,
    pub rate_limited_accounts: usize,
    pub invalid_accounts: usize,
    pub accounts_needing_refresh: usize,
    pub oldest_token_age_hours: i64,
    pub system_health: SystemHealth,
}

pub async fn statistics(accounts: &AccountStore) -> Statistics {
    let all = accounts.list().await;
    let now = Utc::now();

    let total = all.len();
    let mut active = 0;
    let mut inactive = 0;
    let mut rate_limited = 0;
    let mut invalid = 0;
    let mut needing_refresh = 0;
    let mut oldest_age_hours = 0i64;

    for account in &all {
        match account.status {
            AccountStatus::Active => active += 1,
            AccountStatus::Inactive => inactive += 1,
            AccountStatus::RateLimited => rate_limited += 1,
            AccountStatus::Invalid => invalid += 1,
        }
        if account.needs_refresh() {
            needing_refresh += 1;
        }
        let refreshed = account.refresh_at.unwrap_or(account.created_at);
        oldest_age_hours = oldest_age_hours.max((now - refreshed).num_hours());
    }

    let system_health = if invalid > 0 || rate_limited * 2 > total {
        SystemHealth::Unhealthy
    } else if rate_limited > 0 || needing_refresh * 2 > total {
        SystemHealth::Degraded
    } else {
        SystemHealth::Healthy
    };

    Statistics {
        total_accounts: total,
        active_accounts: active,
        inactive_accounts: inactive,
        rate_limited_accounts: rate_limited,
        invalid_accounts: invalid,
        accounts_needing_refresh: needing_refresh,
        oldest_token_age_hours: oldest_age_hours,
        system_health,
    }
}
