pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod hub;
pub mod profiles;
pub mod rooms;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tracing::error;

pub use config::Config;
pub use error::ChatError;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub hub: hub::Hub,
    pub chat: rooms::Chat,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config) -> Self {
        let hub = hub::Hub::new(config.session_settings());
        let chat = rooms::Chat::new(db_pool.clone(), hub.dispatcher(), config.new_room_message_delay);
        Self {
            db_pool,
            hub,
            chat,
            config: Arc::new(config),
        }
    }
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/api/v1/auth/me", get(profiles::me))
        .nest("/api/v1/chat", rooms::router())
        .route("/api/v1/ws/chat", get(rooms::chat_ws))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
}

async fn ping() -> Json<&'static str> {
    Json("pong")
}

/// `?limit&offset` paging for list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 10;
    pub const MAX_LIMIT: i64 = 100;

    /// `(limit, offset)` clamped to sane values.
    pub fn bounds(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0.downcast_ref::<ChatError>() {
            Some(err) if err.is_rejection() => (err.status(), err.to_string()),
            _ => {
                error!(error = %self.0, backtrace = %self.0.backtrace(), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
        };
        (
            status,
            Json(json!({ "status": status.as_u16(), "message": message })),
        )
            .into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(ChatError);
apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
