//! In-process store backend.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;
use crate::store::Store;

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// HashMap-backed [`Store`] with lazy expiry.
///
/// Expired entries are dropped when touched, plus wholesale during prefix
/// deletes. Uses `tokio::time::Instant` so time-sensitive behavior is
/// testable under a paused clock.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live entries. Test and introspection helper.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(entry
                .expires_at
                .map(|at| at.saturating_duration_since(now))),
            None => Ok(None),
        }
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let count = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.value.as_u64().unwrap_or(0) + 1
            }
            _ => 1,
        };

        // Keep the original deadline; only the first increment starts it.
        let expires_at = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.expires_at,
            _ => Some(now + window),
        };

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::from(count),
                expires_at,
            },
        );
        Ok(count)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        let removed = keys.len() as u64;
        for key in keys {
            entries.remove(&key);
        }
        // Opportunistically drop anything already expired.
        entries.retain(|_, e| !e.is_expired(now));
        Ok(removed)
    }
}
