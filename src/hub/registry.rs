//! Process-wide table of live sessions, keyed by user.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use parking_lot::RwLock;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use crate::events::ServerEvent;

pub type ConnectionId = u64;

/// Asks a session to send a close frame and shut down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub code: u16,
    pub reason: String,
}

/// Routing handle for one live session. Cloning it never touches the stream.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: ConnectionId,
    pub user_id: Uuid,
    outbound: mpsc::Sender<ServerEvent>,
    close: mpsc::Sender<CloseRequest>,
}

impl SessionHandle {
    /// Non-blocking; a full queue hands the event back.
    pub fn try_enqueue(&self, event: ServerEvent) -> Result<(), mpsc::error::TrySendError<ServerEvent>> {
        self.outbound.try_send(event)
    }

    pub fn request_close(&self, code: u16, reason: &str) -> bool {
        self.close
            .try_send(CloseRequest {
                code,
                reason: reason.to_owned(),
            })
            .is_ok()
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<Uuid, Vec<SessionHandle>>>,
    next_id: AtomicU64,
    active: AtomicUsize,
    drained: Notify,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        user_id: Uuid,
        outbound: mpsc::Sender<ServerEvent>,
        close: mpsc::Sender<CloseRequest>,
    ) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = SessionHandle {
            id,
            user_id,
            outbound,
            close,
        };
        let mut sessions = self.sessions.write();
        sessions.entry(user_id).or_default().push(handle);
        let _ = self.active.fetch_add(1, Ordering::AcqRel);
        id
    }

    /// Idempotent. Drops the user's bucket once it is empty.
    pub fn remove(&self, user_id: Uuid, id: ConnectionId) -> bool {
        let removed = {
            let mut sessions = self.sessions.write();
            let Some(bucket) = sessions.get_mut(&user_id) else {
                return false;
            };
            let before = bucket.len();
            bucket.retain(|s| s.id != id);
            let removed = bucket.len() != before;
            if bucket.is_empty() {
                let _ = sessions.remove(&user_id);
            }
            removed
        };
        if removed && self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Snapshot of the user's sessions; the lock is released before returning.
    pub fn lookup(&self, user_id: Uuid) -> Vec<SessionHandle> {
        self.sessions
            .read()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.sessions.read().contains_key(&user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Asks every live session to close; returns how many accepted the request.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let snapshot: Vec<SessionHandle> = self.sessions.read().values().flatten().cloned().collect();
        snapshot
            .iter()
            .filter(|s| s.request_close(code, reason))
            .count()
    }

    /// Resolves once no session is registered.
    pub async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.connection_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}
