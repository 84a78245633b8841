//! Session registry: account id → live connection handle.

use std::{collections::HashMap, fmt, sync::Arc};

use {serde::Serialize, tokio::sync::RwLock};

use crate::session::SessionHandle;

/// Where an account's session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    QrPending,
    Open,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::QrPending => "qr_pending",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Registry value for one account.
#[derive(Clone)]
pub struct SessionEntry {
    pub handle: Arc<dyn SessionHandle>,
    /// Identifies the `connect` call that owns this entry.
    pub generation: u64,
    pub state: ConnectionState,
}

impl SessionEntry {
    pub fn new(handle: Arc<dyn SessionHandle>, generation: u64) -> Self {
        Self {
            handle,
            generation,
            state: ConnectionState::Connecting,
        }
    }
}

/// Shared, in-memory map of active sessions. Cloning shares the same map.
///
/// Holds at most one entry per account. Starts empty and is emptied with
/// [`SessionRegistry::drain`] on shutdown.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entry`, returning the entry it superseded.
    pub async fn put(&self, account_id: &str, entry: SessionEntry) -> Option<SessionEntry> {
        self.inner
            .write()
            .await
            .insert(account_id.to_string(), entry)
    }

    pub async fn get(&self, account_id: &str) -> Option<Arc<dyn SessionHandle>> {
        self.inner
            .read()
            .await
            .get(account_id)
            .map(|e| Arc::clone(&e.handle))
    }

    pub async fn entry(&self, account_id: &str) -> Option<SessionEntry> {
        self.inner.read().await.get(account_id).cloned()
    }

    pub async fn contains(&self, account_id: &str) -> bool {
        self.inner.read().await.contains_key(account_id)
    }

    pub async fn state(&self, account_id: &str) -> Option<ConnectionState> {
        self.inner.read().await.get(account_id).map(|e| e.state)
    }

    pub async fn remove(&self, account_id: &str) -> Option<SessionEntry> {
        self.inner.write().await.remove(account_id)
    }

    pub async fn size(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn account_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `generation` still owns the account's entry.
    pub async fn is_current(&self, account_id: &str, generation: u64) -> bool {
        self.inner
            .read()
            .await
            .get(account_id)
            .is_some_and(|e| e.generation == generation)
    }

    /// Update the state if `generation` still owns the entry.
    pub async fn set_state(
        &self,
        account_id: &str,
        generation: u64,
        state: ConnectionState,
    ) -> bool {
        let mut map = self.inner.write().await;
        match map.get_mut(account_id) {
            Some(entry) if entry.generation == generation => {
                entry.state = state;
                true
            },
            _ => false,
        }
    }

    /// Swap in a reconnected handle if `generation` still owns the entry.
    ///
    /// Returns the previous handle on success, or gives `handle` back when the
    /// entry was superseded or removed meanwhile.
    pub async fn replace_handle(
        &self,
        account_id: &str,
        generation: u64,
        handle: Arc<dyn SessionHandle>,
    ) -> Result<Arc<dyn SessionHandle>, Arc<dyn SessionHandle>> {
        let mut map = self.inner.write().await;
        match map.get_mut(account_id) {
            Some(entry) if entry.generation == generation => {
                entry.state = ConnectionState::Connecting;
                Ok(std::mem::replace(&mut entry.handle, handle))
            },
            _ => Err(handle),
        }
    }

    /// Remove the entry only if `generation` still owns it.
    pub async fn remove_if_current(&self, account_id: &str, generation: u64) -> Option<SessionEntry> {
        let mut map = self.inner.write().await;
        if map.get(account_id).is_some_and(|e| e.generation == generation) {
            map.remove(account_id)
        } else {
            None
        }
    }

    /// Empty the registry, returning every entry.
    pub async fn drain(&self) -> Vec<(String, SessionEntry)> {
        self.inner.write().await.drain().collect()
    }
}
