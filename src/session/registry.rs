//! Session Registry
//!
//! Maps connection ids to live sessions of one kind. Membership is guarded by
//! a single `RwLock`; each session guards its own fields. Lock order is always
//! registry first, then session. Sessions are marked inactive while the
//! registry write lock is held, so no observer can see a registered session
//! that is already inactive. Remote teardown runs after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A session the registry can retire
#[async_trait]
pub trait ManagedSession: Send + Sync + 'static {
    /// Flip the session to inactive.
    ///
    /// Called with the registry write lock held; must only take the session's
    /// own lock and never perform remote I/O.
    async fn deactivate(&self);

    /// Release every resource the session owns. Idempotent and best-effort.
    async fn teardown(&self);
}

/// Connection id -> session, at most one per id
pub struct SessionRegistry<S> {
    kind: &'static str,
    sessions: RwLock<HashMap<String, Arc<S>>>,
}

impl<S: ManagedSession> SessionRegistry<S> {
    /// `kind` is used in log lines only
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<S>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Register `session` under `id`.
    ///
    /// A previous session for the same id is deactivated inside the same
    /// critical section and returned so the caller can tear it down.
    pub async fn replace(&self, id: &str, session: Arc<S>) -> Option<Arc<S>> {
        let mut sessions = self.sessions.write().await;
        let previous = sessions.insert(id.to_string(), session);
        if let Some(old) = &previous {
            old.deactivate().await;
            info!("Replaced {} session for {}", self.kind, id);
        } else {
            debug!("Registered {} session for {}", self.kind, id);
        }
        previous
    }

    /// Unregister and deactivate the session for `id`
    pub async fn remove(&self, id: &str) -> Option<Arc<S>> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(id);
        if let Some(session) = &removed {
            session.deactivate().await;
            debug!("Removed {} session for {}", self.kind, id);
        }
        removed
    }

    /// Unregister `id` only if it still maps to `session`.
    ///
    /// Used by background tasks that end on their own, so a stale task can
    /// never evict the session that replaced it.
    pub async fn remove_if_same(&self, id: &str, session: &Arc<S>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(id);
                session.deactivate().await;
                debug!("Removed {} session for {} (self-closed)", self.kind, id);
                true
            }
            _ => false,
        }
    }

    /// Remove and fully tear down the session for `id`
    pub async fn cleanup(&self, id: &str) -> bool {
        match self.remove(id).await {
            Some(session) => {
                session.teardown().await;
                info!("Cleaned up {} session for {}", self.kind, id);
                true
            }
            None => false,
        }
    }

    /// Remove and tear down every session
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<S>> = {
            let mut sessions = self.sessions.write().await;
            let drained: Vec<_> = sessions.drain().map(|(_, s)| s).collect();
            for session in &drained {
                session.deactivate().await;
            }
            drained
        };

        if !drained.is_empty() {
            info!("Shutting down {} {} session(s)", drained.len(), self.kind);
        }
        for session in drained {
            session.teardown().await;
        }
    }
}
