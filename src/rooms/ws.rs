use axum::{
    debug_handler,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::Chat;
use crate::{
    auth::AuthUser,
    hub::{Hub, session},
};

#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(
    State(hub): State<Hub>,
    State(chat): State<Chat>,
    AuthUser(user): AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    if !hub.is_accepting() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }

    let user_id = user.id;
    ws.on_failed_upgrade(move |e| warn!(%user_id, error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| session::serve(socket, user, hub, chat))
}
