//! Client key store.
//!
//! Client keys are the bearer secrets this gateway issues to its own
//! callers. They are unrelated to upstream accounts; a key only gates entry
//! to the data plane and (for admin-role keys) the admin surface.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::storage;

const KEY_PREFIX: &str = "sk-gw-";
const KEY_RANDOM_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientKey {
    pub id: String,
    /// Human label, unique.
    pub name: String,
    /// The bearer secret itself, globally unique.
    pub key: String,
    pub status: KeyStatus,
    pub role: KeyRole,
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientKey {
    pub fn new(name: String, role: KeyRole) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            name,
            key: generate_key(),
            status: KeyStatus::Active,
            role,
            usage_count: 0,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn generate_key() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..KEY_RANDOM_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();
    format!("{KEY_PREFIX}{suffix}")
}

/// Write-behind client key cache backed by `tokens.json`.
pub struct ClientKeyStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, ClientKey>>,
    dirty: AtomicBool,
}

impl ClientKeyStore {
    pub async fn load(path: PathBuf) -> Self {
        let keys: Vec<ClientKey> = match storage::load_array(&path).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load client keys, starting empty");
                Vec::new()
            }
        };
        let entries = keys
            .into_iter()
            .map(|k| (k.id.clone(), k))
            .collect::<HashMap<_, _>>();
        tracing::info!(path = %path.display(), keys = entries.len(), "client key store loaded");
        Self {
            path,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    pub async fn create(&self, key: ClientKey) -> Result<ClientKey> {
        let mut entries = self.entries.write().await;
        check_unique(&entries, &key, None)?;
        entries.insert(key.id.clone(), key.clone());
        drop(entries);
        self.mark_dirty();
        Ok(key)
    }

    pub async fn get(&self, id: &str) -> Option<ClientKey> {
        self.entries.read().await.get(id).cloned()
    }

    /// Lookup by the bearer secret; the dispatcher's hot path.
    pub async fn get_by_key(&self, secret: &str) -> Option<ClientKey> {
        self.entries
            .read()
            .await
            .values()
            .find(|k| k.key == secret)
            .cloned()
    }

    pub async fn update(&self, key: ClientKey) -> Result<ClientKey> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&key.id) {
            return Err(Error::NotFound(format!("client key {}", key.id)));
        }
        check_unique(&entries, &key, Some(&key.id))?;
        let mut key = key;
        key.updated_at = Utc::now();
        entries.insert(key.id.clone(), key.clone());
        drop(entries);
        self.mark_dirty();
        Ok(key)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(id).is_none() {
            return Err(Error::NotFound(format!("client key {}", id)));
        }
        drop(entries);
        self.mark_dirty();
        Ok(())
    }

    pub async fn list(&self) -> Vec<ClientKey> {
        let mut keys: Vec<ClientKey> = self.entries.read().await.values().cloned().collect();
        keys.sort_by(|a, b| a.id.cmp(&b.id));
        keys
    }

    /// Bump usage on a successful validation. Best-effort by design: a key
    /// deleted mid-request is simply skipped, and the count only needs to
    /// be a monotonic approximation under contention.
    pub async fn record_usage(&self, id: &str) {
        let mut entries = self.entries.write().await;
        if let Some(key) = entries.get_mut(id) {
            key.usage_count += 1;
            key.last_used_at = Some(Utc::now());
        } else {
            return;
        }
        drop(entries);
        self.mark_dirty();
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

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
    entries: &HashMap<String, ClientKey>,
    candidate: &ClientKey,
    skip_id: Option<&str>,
) -> Result<()> {
    for existing in entries.values() {
        if skip_id == Some(existing.id.as_str()) {
            continue;
        }
        if existing.name == candidate.name {
            return Err(Error::Conflict(format!(
                "client key name {:?} already exists",
                candidate.name
            )));
        }
        if existing.key == candidate.key {
            return Err(Error::Conflict("client key secret already exists".into()));
        }
    }
    Ok(())
}
