//! Event fan-out to every live session of a set of users.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use super::registry::ConnectionRegistry;
use crate::events::ServerEvent;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Builds one event per session with `build(recipient)` and enqueues it
    /// without blocking. Full queues drop the new event; users without live
    /// sessions are skipped. Returns the number of events enqueued.
    pub fn broadcast<F>(&self, user_ids: &[Uuid], build: F) -> usize
    where
        F: Fn(Uuid) -> ServerEvent,
    {
        let mut delivered = 0;
        for &user_id in user_ids {
            let sessions = self.registry.lookup(user_id);
            if sessions.is_empty() {
                debug!(%user_id, "no live sessions for user");
                continue;
            }
            for session in sessions {
                match session.try_enqueue(build(user_id)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(event)) => {
                        warn!(conn_id = session.id, %user_id, event_type = %event.kind, "outbound queue full, dropping event");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(conn_id = session.id, %user_id, "session closed before delivery");
                    }
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::OffsetDateTime;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        db::{Message, MessageKind, User},
        events::{EventData, MessageView},
    };

    fn author() -> User {
        User {
            id: Uuid::now_v7(),
            name: "alice".to_owned(),
            email: "alice@example.com".to_owned(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn event_for(author: &User, viewer: Uuid) -> ServerEvent {
        let message = Message {
            id: 1,
            room_id: Uuid::now_v7(),
            created_by: author.id,
            content: "hi".to_owned(),
            kind: MessageKind::Text,
            created_at: OffsetDateTime::now_utc(),
            edited_at: None,
        };
        ServerEvent::message(MessageView::for_viewer(&message, author, viewer))
    }

    fn connect(registry: &ConnectionRegistry, user: Uuid) -> mpsc::Receiver<ServerEvent> {
        let (out_tx, out_rx) = mpsc::channel(1);
        let (close_tx, _close_rx) = mpsc::channel(1);
        let _ = registry.register(user, out_tx, close_tx);
        out_rx
    }

    fn my_message(event: &ServerEvent) -> bool {
        match &event.data {
            EventData::Message(view) => view.my_message,
            EventData::NewRoom(_) => panic!("expected a message event"),
        }
    }

    #[test]
    fn builds_per_recipient_events() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let alice = author();
        let bob = Uuid::now_v7();
        let mut alice_rx = connect(&registry, alice.id);
        let mut bob_rx = connect(&registry, bob);

        let delivered = dispatcher.broadcast(&[alice.id, bob], |viewer| event_for(&alice, viewer));

        assert_eq!(delivered, 2);
        assert!(my_message(&alice_rx.try_recv().unwrap()));
        assert!(!my_message(&bob_rx.try_recv().unwrap()));
    }

    #[test]
    fn offline_users_are_skipped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let alice = author();
        let offline = Uuid::now_v7();
        let online = Uuid::now_v7();
        let mut online_rx = connect(&registry, online);

        let delivered = dispatcher.broadcast(&[offline, online], |viewer| event_for(&alice, viewer));

        assert_eq!(delivered, 1);
        assert!(online_rx.try_recv().is_ok());
    }

    #[test]
    fn every_device_of_a_user_receives() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let alice = author();
        let bob = Uuid::now_v7();
        let mut phone = connect(&registry, bob);
        let mut laptop = connect(&registry, bob);

        assert_eq!(dispatcher.broadcast(&[bob], |viewer| event_for(&alice, viewer)), 2);
        assert!(phone.try_recv().is_ok());
        assert!(laptop.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let alice = author();
        let slow = Uuid::now_v7();
        let fast = Uuid::now_v7();
        let mut slow_rx = connect(&registry, slow);
        let mut fast_rx = connect(&registry, fast);

        // first broadcast fills the slow queue
        assert_eq!(dispatcher.broadcast(&[slow], |viewer| event_for(&alice, viewer)), 1);

        let second = tokio::time::timeout(Duration::from_secs(1), async {
            dispatcher.broadcast(&[slow, fast], |viewer| event_for(&alice, viewer))
        })
        .await
        .expect("broadcast blocked on a full queue");

        assert_eq!(second, 1);
        assert!(fast_rx.try_recv().is_ok());
        // the queued event survives, the new one was dropped
        assert!(slow_rx.try_recv().is_ok());
        assert!(slow_rx.try_recv().is_err());
    }

    #[test]
    fn closed_sessions_are_ignored() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let alice = author();
        let bob = Uuid::now_v7();
        drop(connect(&registry, bob));

        assert_eq!(dispatcher.broadcast(&[bob], |viewer| event_for(&alice, viewer)), 0);
    }
}
