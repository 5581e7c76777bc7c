//! Background jobs: write-behind flushing, session cleanup, rate-limit
//! recovery, and the scheduled token refresh.
//!
//! Jobs run on their own timers and never surface errors to clients; a
//! failed flush is logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::accounts::AccountStore;
use crate::server::Gateway;
use crate::sessions::SessionRegistry;
use crate::token::TokenManager;

/// How often expired rate-limit windows are re-checked.
const RATE_LIMIT_RECOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// Flush dirty stores to disk every `interval`.
pub fn spawn_sync_job(gateway: Gateway, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Nothing can be dirty before the first tick.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sync_all(&gateway).await;
        }
    })
}

async fn sync_all(gateway: &Gateway) {
    for (name, result) in [
        ("accounts", gateway.accounts.sync().await),
        ("tokens", gateway.keys.sync().await),
        ("sessions", gateway.sessions.sync().await),
    ] {
        match result {
            Ok(true) => tracing::debug!(store = name, "store flushed"),
            Ok(false) => {}
            Err(e) => tracing::warn!(store = name, error = %e, "store flush failed, will retry"),
        }
    }
}

/// Final flush on shutdown. The caller bounds this with a timeout.
pub async fn final_sync(gateway: &Gateway) {
    tracing::info!("final sync");
    sync_all(gateway).await;
}

/// Drop expired sessions every `interval`.
pub fn spawn_session_cleanup(
    sessions: Arc<SessionRegistry>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = sessions.cleanup_expired().await;
            if removed > 0 {
                tracing::debug!(removed, "expired sessions cleaned up");
            }
        }
    })
}

/// Return rate-limited accounts to rotation once their window passes.
pub fn spawn_rate_limit_recovery(accounts: Arc<AccountStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RATE_LIMIT_RECOVERY_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let recovered = accounts.recover_rate_limited(chrono::Utc::now()).await;
            for id in &recovered {
                tracing::info!(account_id = %id, "rate limit window passed, account active again");
            }
        }
    })
}

/// Refresh every due active account once per hour, on the hour.
pub fn spawn_scheduled_refresh(manager: Arc<TokenManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(until_next_hour()).await;
            manager.refresh_due_accounts().await;
        }
    })
}

/// Wall-clock delay to the next top of the hour.
fn until_next_hour() -> Duration {
    let now = chrono::Utc::now().timestamp();
    let remainder = now.rem_euclid(3600);
    Duration::from_secs((3600 - remainder) as u64)
}
