mod msg;
mod new;
mod resolve;
mod room;
pub mod store;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};

use crate::{AppState, profiles};

pub use msg::{Chat, MAX_CONTENT_CHARS};
pub use new::{NewGroupRoom, create_group};
pub use resolve::{Resolution, Target, resolve};
pub use room::{discover, history, room_view};
pub use ws::chat_ws;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(room::rooms))
        .route("/room-messages/{room_id}", get(room::room_messages))
        .route("/create-group-room", post(new::create_group_room))
        .route("/send-message-sync", post(msg::send_message_sync))
        .route("/discover-users", get(profiles::discover_users))
        .route("/discover-rooms", get(room::discover_rooms))
}
