use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use super::{cookies::ACCESS_COOKIE, jwt::JwtKeys};
use crate::{error::ApiError, state::AppState, users::repo_types::User};

/// Access token from the `accessToken` cookie, else `Authorization: Bearer`.
fn access_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(c) = jar.get(ACCESS_COOKIE).filter(|c| !c.value().is_empty()) {
        return Some(c.value().to_string());
    }
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<User, ApiError> {
    let token = access_token(parts).ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify_access(&token).map_err(|e| {
        warn!(error = %e, "invalid access token");
        ApiError::unauthorized("Invalid access token")
    })?;

    state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid access token"))
}

/// The authenticated user, loaded from the store.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve(parts, state).await.map(AuthUser)
    }
}

/// Like [`AuthUser`], but anonymous requests (or bad tokens) yield `None`.
pub struct MaybeAuthUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if access_token(parts).is_none() {
            return Ok(MaybeAuthUser(None));
        }
        match resolve(parts, state).await {
            Ok(user) => Ok(MaybeAuthUser(Some(user))),
            Err(e) if e.status.is_server_error() => Err(e),
            Err(_) => Ok(MaybeAuthUser(None)),
        }
    }
}
