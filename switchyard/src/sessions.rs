//! Session registry: the global concurrency gate.
//!
//! A session is one admitted concurrency slot, keyed by the caller's
//! `(ip, user-agent)` identity. Re-admission from the same identity refreshes
//! the existing slot instead of consuming a new one; distinct identities
//! compete for `max_concurrent` live slots.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub client_key_id: String,
    pub user_agent: String,
    /// Host only; the port is stripped on admission.
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    /// Path of the request that first created the slot. Informational.
    pub request_path: String,
}

impl Session {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }
}

/// Strip the port from a socket-address-ish string, leaving the host.
/// Handles `host:port`, `[v6]:port`, and bare IPv6 addresses.
pub fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match addr.rfind(':') {
        // More than one colon and no brackets: bare IPv6, leave intact.
        Some(idx) if addr[..idx].contains(':') => addr,
        Some(idx) => &addr[..idx],
        None => addr,
    }
}

pub struct SessionRegistry {
    path: PathBuf,
    sessions: RwLock<HashMap<String, Session>>,
    dirty: AtomicBool,
    enabled: bool,
    max_concurrent: usize,
    ttl: Duration,
}

impl SessionRegistry {
    pub async fn load(
        path: PathBuf,
        enabled: bool,
        max_concurrent: usize,
        ttl: std::time::Duration,
    ) -> Self {
        let sessions: Vec<Session> = match storage::load_array(&path).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load sessions, starting empty");
                Vec::new()
            }
        };
        let sessions = sessions
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect::<HashMap<_, _>>();
        Self {
            path,
            sessions: RwLock::new(sessions),
            dirty: AtomicBool::new(false),
            enabled,
            max_concurrent,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(300)),
        }
    }

    /// Admit a caller, either by refreshing its existing slot or by taking a
    /// new one under the global cap. `Ok(None)` means the registry is
    /// disabled and admission is unconditional.
    ///
    /// The whole check-then-create runs under the write lock so two racing
    /// admissions cannot both observe a free slot.
    pub async fn admit(
        &self,
        client_key_id: &str,
        remote_addr: &str,
        user_agent: &str,
        request_path: &str,
    ) -> Result<Option<Session>> {
        if !self.enabled {
            return Ok(None);
        }

        let ip = strip_port(remote_addr).to_string();
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        // Same identity, still live: refresh the slot in place.
        if let Some(existing) = sessions
            .values_mut()
            .find(|s| s.is_live(now) && s.ip_address == ip && s.user_agent == user_agent)
        {
            existing.last_seen_at = now;
            existing.expires_at = now + self.ttl;
            let refreshed = existing.clone();
            drop(sessions);
            self.mark_dirty();
            return Ok(Some(refreshed));
        }

        let live = sessions.values().filter(|s| s.is_live(now)).count();
        if live >= self.max_concurrent {
            return Err(Error::SessionLimit {
                active_count: live,
                max_concurrent: self.max_concurrent,
            });
        }

        let session = Session {
            id: uuid::Uuid::now_v7().to_string(),
            client_key_id: client_key_id.to_string(),
            user_agent: user_agent.to_string(),
            ip_address: ip,
            created_at: now,
            last_seen_at: now,
            expires_at: now + self.ttl,
            is_active: true,
            request_path: request_path.to_string(),
        };
        sessions.insert(session.id.clone(), session.clone());
        drop(sessions);
        self.mark_dirty();
        Ok(Some(session))
    }

    pub async fn revoke(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(id).is_none() {
            return Err(Error::NotFound(format!("session {}", id)));
        }
        drop(sessions);
        self.mark_dirty();
        Ok(())
    }

    /// Drop every expired session. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| now <= s.expires_at);
        let removed = before - sessions.len();
        drop(sessions);
        if removed > 0 {
            self.mark_dirty();
        }
        removed
    }

    pub async fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub async fn active_count(&self) -> usize {
        let now = Utc::now();
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_live(now))
            .count()
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
