//! Live connection hub: who is connected, and how events reach them.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `registry` | user → live sessions table behind one reader/writer lock |
//! | `dispatch` | per-recipient fan-out with non-blocking enqueue |
//! | `session` | per-connection read/write loops, keepalive, cleanup |

pub mod dispatch;
pub mod registry;
pub mod session;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tracing::{info, warn};

pub use dispatch::Dispatcher;
pub use registry::{CloseRequest, ConnectionId, ConnectionRegistry, SessionHandle};
pub use session::{CLOSE_GOING_AWAY, SessionSettings};

#[derive(Debug, Clone)]
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    accepting: Arc<AtomicBool>,
    settings: SessionSettings,
}

impl Hub {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            accepting: Arc::new(AtomicBool::new(true)),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.registry.clone())
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stops new upgrades, asks every session to close, and waits up to
    /// `grace` for them to go. Stragglers are left to die with the process.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::Release);
        let closing = self.registry.close_all(CLOSE_GOING_AWAY, "server shutting down");
        info!(sessions = closing, "closing live sessions");

        if tokio::time::timeout(grace, self.registry.drained()).await.is_err() {
            warn!(
                remaining = self.registry.connection_count(),
                "grace period elapsed with sessions still open"
            );
        } else {
            info!("all connections closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn shutdown_stops_accepting_and_returns_after_grace() {
        let hub = Hub::new(SessionSettings::default());
        let (out_tx, _out_rx) = mpsc::channel(1);
        let (close_tx, mut close_rx) = mpsc::channel(1);
        let _ = hub.registry().register(Uuid::now_v7(), out_tx, close_tx);

        // nobody drives this session, so only the grace period ends the wait
        hub.shutdown(Duration::from_millis(20)).await;

        assert!(!hub.is_accepting());
        let request = close_rx.try_recv().unwrap();
        assert_eq!(request.code, CLOSE_GOING_AWAY);
        assert_eq!(hub.registry().connection_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_with_no_sessions_is_immediate() {
        let hub = Hub::new(SessionSettings::default());
        tokio::time::timeout(Duration::from_secs(1), hub.shutdown(Duration::from_secs(30)))
            .await
            .expect("shutdown waited on an empty registry");
    }
}
