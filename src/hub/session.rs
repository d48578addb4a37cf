//! One live connection: an inbound reader and an outbound writer that only
//! talk to each other through channels.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::ws::{CloseFrame, Message, WebSocket},
};
use futures_util::{SinkExt, Stream, StreamExt, stream::SplitSink};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    Hub,
    registry::{CloseRequest, ConnectionId, ConnectionRegistry},
};
use crate::{ChatError, db::User, events::ServerEvent, rooms::Chat};

/// At most one unsent event per session; further enqueues are dropped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1;
pub const CLOSE_GOING_AWAY: u16 = 1001;

const PING: &str = "ping";
const PONG: &str = "pong";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Reply owed for a keepalive. Browsers can't send control frames, so they
/// ping with a text payload and get a text reply.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Keepalive {
    Control(Bytes),
    Text,
}

impl Keepalive {
    fn reply(self) -> Message {
        match self {
            Keepalive::Control(payload) => Message::Pong(payload),
            Keepalive::Text => Message::Text(PONG.into()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Keepalive(Keepalive),
    /// Liveness only, nothing to answer.
    Refresh,
    Chat(Bytes),
    Close,
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) if text.as_str() == PING => Frame::Keepalive(Keepalive::Text),
            Message::Text(text) if text.as_str() == PONG => Frame::Refresh,
            Message::Text(text) => Frame::Chat(Bytes::copy_from_slice(text.as_str().as_bytes())),
            Message::Binary(data) => Frame::Chat(data),
            Message::Ping(payload) => Frame::Keepalive(Keepalive::Control(payload)),
            Message::Pong(_) => Frame::Refresh,
            Message::Close(_) => Frame::Close,
        }
    }
}

/// Why the reader gave up.
#[derive(Debug)]
enum ForceClose {
    IdleTimeout,
    Disconnected,
    /// The writer is gone; asked to stop between frames.
    Stopped,
    ReadFailed(axum::Error),
}

struct Queues {
    outbound: mpsc::Receiver<ServerEvent>,
    keepalive: mpsc::Receiver<Keepalive>,
    close: mpsc::Receiver<CloseRequest>,
    forced: oneshot::Receiver<ForceClose>,
}

/// Single exit path shared by both loops; only the first call does anything.
struct Cleanup {
    done: AtomicBool,
    registry: Arc<ConnectionRegistry>,
    user_id: Uuid,
    conn_id: ConnectionId,
}

impl Cleanup {
    fn run(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.registry.remove(self.user_id, self.conn_id);
        debug!(conn_id = self.conn_id, user_id = %self.user_id, "connection closed");
    }
}

/// Drives an upgraded socket for `user` until either side gives up.
pub async fn serve(socket: WebSocket, user: User, hub: Hub, chat: Chat) {
    let settings = *hub.settings();
    let registry = hub.registry().clone();

    let (outbound_tx, outbound) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let (close_tx, close) = mpsc::channel(1);
    let (keepalive_tx, keepalive) = mpsc::channel(1);
    let (forced_tx, forced) = oneshot::channel();
    let (stop_tx, stop) = oneshot::channel();

    let conn_id = registry.register(user.id, outbound_tx, close_tx);
    info!(conn_id, user_id = %user.id, "new ws connection");

    let cleanup = Arc::new(Cleanup {
        done: AtomicBool::new(false),
        registry,
        user_id: user.id,
        conn_id,
    });

    let (sink, stream) = socket.split();
    let queues = Queues {
        outbound,
        keepalive,
        close,
        forced,
    };

    let mut writer = tokio::spawn(write_loop(sink, queues, cleanup.clone(), settings, conn_id));
    let mut reader = tokio::spawn(read_loop(stream, stop, keepalive_tx, forced_tx, user, chat, settings, conn_id));

    tokio::select! {
        // a chat frame already being handled is stored and announced before the reader stops
        _ = &mut writer => {
            let _ = stop_tx.send(());
            let _ = (&mut reader).await;
        }
        // the reader hands its exit reason to the writer, which finishes on its own
        _ = &mut reader => { let _ = (&mut writer).await; }
    }

    cleanup.run();
}

#[allow(clippy::too_many_arguments)]
async fn read_loop<S>(
    mut stream: S,
    mut stop: oneshot::Receiver<()>,
    keepalive: mpsc::Sender<Keepalive>,
    forced: oneshot::Sender<ForceClose>,
    user: User,
    chat: Chat,
    settings: SessionSettings,
    conn_id: ConnectionId,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = &mut stop => break ForceClose::Stopped,
            next = tokio::time::timeout(settings.idle_timeout, stream.next()) => next,
        };
        let message = match next {
            Err(_) => break ForceClose::IdleTimeout,
            Ok(None) => break ForceClose::Disconnected,
            Ok(Some(Err(e))) => break ForceClose::ReadFailed(e),
            Ok(Some(Ok(message))) => message,
        };

        match Frame::from(message) {
            Frame::Keepalive(reply) => {
                if keepalive.try_send(reply).is_err() {
                    debug!(conn_id, "keepalive reply already pending");
                }
            }
            Frame::Refresh => {}
            Frame::Chat(payload) => {
                debug!(conn_id, bytes = payload.len(), "received chat payload");
                if let Err(e) = chat.receive(&user, &payload).await {
                    if e.is_rejection() {
                        warn!(conn_id, user_id = %user.id, error = %e, "rejected live message");
                    } else {
                        debug!(conn_id, user_id = %user.id, "live message dropped after a server error");
                    }
                }
            }
            Frame::Close => break ForceClose::Disconnected,
        }
    };

    match &reason {
        ForceClose::ReadFailed(e) => warn!(conn_id, user_id = %user.id, error = %e, "read failed"),
        other => debug!(conn_id, user_id = %user.id, reason = ?other, "reader stopped"),
    }
    let _ = forced.send(reason);
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut queues: Queues,
    cleanup: Arc<Cleanup>,
    settings: SessionSettings,
    conn_id: ConnectionId,
) {
    loop {
        tokio::select! {
            event = queues.outbound.recv() => {
                let Some(event) = event else {
                    error!(conn_id, "outbound queue was closed, forcefully closing");
                    break;
                };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(conn_id, error = %e, "failed to serialize event");
                        break;
                    }
                };
                let bytes = payload.len();
                if let Err(e) = write(&mut sink, Message::Text(payload.into()), settings.write_timeout).await {
                    error!(conn_id, error = %e, "write failed");
                    break;
                }
                debug!(conn_id, bytes, event_type = %event.kind, "event written");
            }
            Some(reply) = queues.keepalive.recv() => {
                if let Err(e) = write(&mut sink, reply.reply(), settings.write_timeout).await {
                    error!(conn_id, error = %e, "failed to send keepalive reply");
                    break;
                }
            }
            Some(request) = queues.close.recv() => {
                debug!(conn_id, code = request.code, "closing connection");
                let frame = CloseFrame {
                    code: request.code,
                    reason: request.reason.into(),
                };
                if let Err(e) = write(&mut sink, Message::Close(Some(frame)), settings.write_timeout).await {
                    error!(conn_id, error = %e, "failed to send close message");
                }
                break;
            }
            reason = &mut queues.forced => {
                debug!(conn_id, reason = ?reason.ok(), "handling forced close signal");
                break;
            }
        }
    }

    queues.outbound.close();
    queues.close.close();
    cleanup.run();
}

async fn write(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    deadline: Duration,
) -> Result<(), ChatError> {
    match tokio::time::timeout(deadline, sink.send(message)).await {
        Ok(sent) => sent.map_err(ChatError::from),
        Err(_) => Err(ChatError::Io(axum::Error::new("write deadline exceeded"))),
    }
}
