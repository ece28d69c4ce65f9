use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};

use crate::state::AppState;

pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

#[cfg(test)]
pub(crate) mod memory;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    let uploads = Router::new()
        .route("/users/register", post(handlers::register))
        .route("/users/avatar", patch(handlers::update_user_avatar))
        .route("/users/cover-image", patch(handlers::update_user_cover_image))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    Router::new()
        .route("/users/login", post(handlers::login))
        .route("/users/logout", post(handlers::logout))
        .route("/users/refresh-token", post(handlers::refresh_access_token))
        .route("/users/change-password", post(handlers::change_current_password))
        .route("/users/current-user", get(handlers::get_current_user))
        .route("/users/update-account", patch(handlers::update_account_details))
        .route("/users/c/:username", get(handlers::get_user_channel_profile))
        .merge(uploads)
}
