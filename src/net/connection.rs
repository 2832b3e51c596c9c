//! Session admission and lifecycle tracking.
//!
//! # Responsibilities
//! - Cap concurrent tunnel sessions
//! - Generate unique session IDs for tracing
//! - Let shutdown wait for open sessions to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::observability::metrics;

/// Relaxed ordering is enough: IDs only need to be unique.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a tunnel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Admits sessions up to a limit and counts the ones still open.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    limit: Arc<Semaphore>,
    max_sessions: usize,
    active: Arc<AtomicU64>,
}

impl SessionTracker {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            limit: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            active: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Reserve a slot, or `None` when the relay is full.
    pub fn try_admit(&self) -> Option<SessionGuard> {
        let permit = Arc::clone(&self.limit).try_acquire_owned().ok()?;
        self.active.fetch_add(1, Ordering::SeqCst);
        metrics::record_session_opened();
        Some(SessionGuard {
            _permit: permit,
            active: Arc::clone(&self.active),
            id: SessionId::new(),
        })
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Wait until every session has closed, giving up after `deadline`.
    ///
    /// Returns the number of sessions still open.
    pub async fn drain(&self, deadline: Duration) -> u64 {
        let waiting = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        if tokio::time::timeout(deadline, waiting).await.is_err() {
            tracing::warn!(remaining = self.active_count(), "Drain deadline reached");
        }
        self.active_count()
    }
}

/// Holds a session slot. Releases it when dropped.
#[derive(Debug)]
pub struct SessionGuard {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicU64>,
    id: SessionId,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        metrics::record_session_closed();
        tracing::trace!(session_id = %self.id, "Session released");
    }
}
