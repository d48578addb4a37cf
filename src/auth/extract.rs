use axum::{
    extract::{FromRef, FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{AppError, ChatError, db::User};

/// The authenticated caller, from `Authorization: Bearer <token>` or `?token=<token>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl<S> FromRequestParts<S> for AuthUser
where
    SqlitePool: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer(parts).ok_or_else(|| {
            ChatError::unauthenticated("Authorization header or token query param is required")
        })?;
        let db_pool = SqlitePool::from_ref(state);
        let user = super::user_for_token(&db_pool, &token).await?;
        Ok(AuthUser(user))
    }
}

// the query parameter wins, browsers can't set headers on a websocket upgrade
fn bearer(parts: &Parts) -> Option<String> {
    let from_query = Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token);
    let from_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.trim().split_once(char::is_whitespace)?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.to_owned())
        });

    from_query
        .into_iter()
        .chain(from_header)
        .map(|token| token.trim().to_owned())
        .find(|token| !token.is_empty())
}
