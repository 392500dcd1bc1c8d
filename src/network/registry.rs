use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A known peer. Created on JOIN, removed on LEAVE, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub addr: SocketAddr,
}

/// Shared map of known peers, keyed by handle. The only state shared between
/// the receive loops and external readers; the lock is held for single map
/// operations only, never across I/O.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<String, Participant>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the entry for `name`. Last writer wins.
    /// Returns true when the entry is new or its address changed.
    pub async fn upsert(&self, name: &str, addr: SocketAddr) -> bool {
        let mut map = self.inner.write().await;
        let previous = map.insert(
            name.to_string(),
            Participant {
                name: name.to_string(),
                addr,
            },
        );
        previous.map_or(true, |p| p.addr != addr)
    }

    /// Removes the entry for `name`. A miss is a no-op, not an error.
    /// Returns true when an entry was actually removed.
    pub async fn remove(&self, name: &str) -> bool {
        self.inner.write().await.remove(name).is_some()
    }

    pub async fn lookup(&self, name: &str) -> Option<SocketAddr> {
        self.inner.read().await.get(name).map(|p| p.addr)
    }

    /// Point-in-time copy of all participants, sorted by name. Concurrent
    /// mutation is never observable as a torn read.
    pub async fn snapshot(&self) -> Vec<Participant> {
        let mut participants: Vec<Participant> =
            self.inner.read().await.values().cloned().collect();
        participants.sort_by(|a, b| a.name.cmp(&b.name));
        participants
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
