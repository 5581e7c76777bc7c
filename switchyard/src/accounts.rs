//! Upstream account store.
//!
//! An account is one upstream-authenticable identity: an access/refresh
//! token pair plus the health state the refresher and selector act on. The
//! store is the single owner of all account records; everything else works
//! with clones obtained through lookups.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::storage;

/// Seconds before expiry at which a token counts as needing refresh. The
/// buffer keeps a token from expiring underneath an in-flight request.
pub const REFRESH_BUFFER_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Usable for selection.
    Active,
    /// Parked by an administrator; never selected.
    Inactive,
    /// Refresh hit a rate limit; recovers automatically once
    /// `rate_limited_until` passes.
    RateLimited,
    /// Refresh was rejected as unauthorized. Requires human intervention;
    /// never selected and never auto-recovered.
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    /// Human label, unique case-insensitively.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    /// When `access_token` stops being accepted upstream.
    pub expires_at: DateTime<Utc>,
    /// Last refresh attempt, successful or not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create an active account from freshly exchanged tokens.
    pub fn new(
        name: String,
        org_id: Option<String>,
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            name,
            org_id,
            access_token,
            refresh_token,
            expires_at,
            refresh_at: None,
            status: AccountStatus::Active,
            rate_limited_until: None,
            last_refresh_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once the token is within the refresh buffer of expiring.
    pub fn needs_refresh(&self) -> bool {
        Utc::now() + Duration::seconds(REFRESH_BUFFER_SECS) >= self.expires_at
    }

    /// Healthy means selectable without a refresh standing in the way.
    pub fn is_healthy(&self) -> bool {
        self.status == AccountStatus::Active && !self.needs_refresh()
    }

    /// Transition status, keeping `rate_limited_until` populated exactly
    /// when the status is `RateLimited`.
    pub fn set_status(&mut self, status: AccountStatus, rate_limited_until: Option<DateTime<Utc>>) {
        self.status = status;
        self.rate_limited_until = match status {
            AccountStatus::RateLimited => rate_limited_until,
            _ => None,
        };
    }
}

/// Write-behind account cache backed by `accounts.json`.
pub struct AccountStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, Account>>,
    dirty: AtomicBool,
}

impl AccountStore {
    /// Load the durable file into memory. A missing file starts empty; a
    /// malformed one is logged and also starts empty rather than refusing
    /// to boot. The legacy object-keyed format is converted on load and
    /// canonicalized by the next sync.
    pub async fn load(path: PathBuf) -> Self {
        let (accounts, dirty) = match Self::read_file(&path).await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load accounts, starting empty");
                (Vec::new(), false)
            }
        };

        let entries = accounts
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect::<HashMap<_, _>>();
        tracing::info!(path = %path.display(), accounts = entries.len(), "account store loaded");

        Self {
            path,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(dirty),
        }
    }

    async fn read_file(path: &PathBuf) -> Result<(Vec<Account>, bool)> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
            Err(e) => return Err(e.into()),
        };
        let value: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;

        match value {
            serde_json::Value::Array(_) => {
                let accounts: Vec<Account> = serde_json::from_value(value)
                    .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;
                Ok((accounts, false))
            }
            // Older deployments wrote an object keyed by org id. Convert
            // each entry and mark the store dirty so the next sync writes
            // the canonical array form.
            serde_json::Value::Object(map) => {
                let mut accounts = Vec::new();
                for (org_id, entry) in map {
                    match convert_legacy_entry(&org_id, &entry) {
                        Some(account) => accounts.push(account),
                        None => {
                            tracing::warn!(org_id = %org_id, "skipping unreadable legacy account entry")
                        }
                    }
                }
                tracing::info!(accounts = accounts.len(), "converted legacy account file");
                Ok((accounts, true))
            }
            _ => Err(Error::Storage(format!(
                "{}: expected array or object",
                path.display()
            ))),
        }
    }

    pub async fn create(&self, account: Account) -> Result<Account> {
        let mut entries = self.entries.write().await;
        check_unique(&entries, &account, None)?;
        entries.insert(account.id.clone(), account.clone());
        drop(entries);
        self.mark_dirty();
        Ok(account)
    }

    pub async fn get(&self, id: &str) -> Option<Account> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn update(&self, account: Account) -> Result<Account> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&account.id) {
            return Err(Error::NotFound(format!("account {}", account.id)));
        }
        check_unique(&entries, &account, Some(&account.id))?;
        let mut account = account;
        account.updated_at = Utc::now();
        entries.insert(account.id.clone(), account.clone());
        drop(entries);
        self.mark_dirty();
        Ok(account)
    }

    /// Apply an in-place mutation under the write lock. This is the
    /// refresher's primitive: read-modify-write without a lost-update
    /// window between lookup and store.
    pub async fn apply<F>(&self, id: &str, mutate: F) -> Result<Account>
    where
        F: FnOnce(&mut Account),
    {
        let mut entries = self.entries.write().await;
        let account = entries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("account {}", id)))?;
        mutate(account);
        account.updated_at = Utc::now();
        let updated = account.clone();
        drop(entries);
        self.mark_dirty();
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(id).is_none() {
            return Err(Error::NotFound(format!("account {}", id)));
        }
        drop(entries);
        self.mark_dirty();
        Ok(())
    }

    pub async fn list(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.entries.read().await.values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        accounts
    }

    pub async fn list_active(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .entries
            .read()
            .await
            .values()
            .filter(|a| a.status == AccountStatus::Active)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        accounts
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Move rate-limited accounts whose window has passed back to active.
    /// Returns the ids that recovered.
    pub async fn recover_rate_limited(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut recovered = Vec::new();
        let mut entries = self.entries.write().await;
        for account in entries.values_mut() {
            if account.status == AccountStatus::RateLimited
                && account.rate_limited_until.is_some_and(|until| until <= now)
            {
                account.set_status(AccountStatus::Active, None);
                account.updated_at = now;
                recovered.push(account.id.clone());
            }
        }
        drop(entries);
        if !recovered.is_empty() {
            self.mark_dirty();
        }
        recovered
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Flush to disk when dirty. Returns whether a write happened. On
    /// failure the dirty flag is restored so the next tick retries.
    pub async fn sync(&self) -> Result<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let snapshot = self.list().await;
        if let Err(e) = storage::save_array(&self.path, &snapshot).await {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(true)
    }
}

fn check_unique(
    entries: &HashMap<String, Account>,
    candidate: &Account,
    skip_id: Option<&str>,
) -> Result<()> {
    for existing in entries.values() {
        if skip_id == Some(existing.id.as_str()) {
            continue;
        }
        if existing.name.eq_ignore_ascii_case(&candidate.name) {
            return Err(Error::Conflict(format!(
                "account name {:?} already exists",
                candidate.name
            )));
        }
        if let (Some(a), Some(b)) = (&existing.org_id, &candidate.org_id) {
            if a == b {
                return Err(Error::Conflict(format!("org_id {:?} already exists", b)));
            }
        }
    }
    Ok(())
}

fn convert_legacy_entry(org_id: &str, entry: &serde_json::Value) -> Option<Account> {
    let oauth = entry.get("oauth_token")?;
    let access_token = oauth.get("access_token")?.as_str()?.to_string();
    let refresh_token = oauth.get("refresh_token")?.as_str()?.to_string();
    let expires_at = parse_legacy_instant(oauth.get("expires_at"))?;
    let status = entry
        .get("status")
        .and_then(|s| s.as_str())
        .and_then(|s| match s {
            "active" => Some(AccountStatus::Active),
            "inactive" => Some(AccountStatus::Inactive),
            "rate_limited" => Some(AccountStatus::RateLimited),
            "invalid" => Some(AccountStatus::Invalid),
            _ => None,
        })
        .unwrap_or(AccountStatus::Active);

    let now = Utc::now();
    let mut account = Account {
        id: uuid::Uuid::now_v7().to_string(),
        name: org_id.to_string(),
        org_id: Some(org_id.to_string()),
        access_token,
        refresh_token,
        expires_at,
        refresh_at: None,
        status: AccountStatus::Active,
        rate_limited_until: None,
        last_refresh_error: None,
        created_at: now,
        updated_at: now,
    };
    // The legacy format never recorded a rate-limit window, so a converted
    // rate_limited entry gets one starting now.
    let until = (status == AccountStatus::RateLimited).then(|| now + Duration::hours(1));
    account.set_status(status, until);
    Some(account)
}

fn parse_legacy_instant(value: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    match value? {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => {
            let secs = n.as_i64()?;
            DateTime::<Utc>::from_timestamp(secs, 0)
        }
        _ => None,
    }
}
