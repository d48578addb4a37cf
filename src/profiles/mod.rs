use axum::{
    Json, debug_handler,
    extract::{Query, State},
};
use sqlx::SqlitePool;

use crate::{AppResult, Page, auth::AuthUser, db::User};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

/// Everyone but the caller, in random order.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn discover_users(
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
    Query(page): Query<Page>,
) -> AppResult<Json<Vec<User>>> {
    let (limit, offset) = page.bounds();
    let users = sqlx::query_as("SELECT id,name,email,created_at FROM users WHERE id<>? ORDER BY RANDOM() LIMIT ? OFFSET ?")
        .bind(user.id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&db_pool)
        .await?;
    Ok(Json(users))
}
