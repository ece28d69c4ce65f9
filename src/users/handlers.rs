use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection},
        FromRef, Multipart, Path, State,
    },
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{
    dto::{
        ChangePasswordRequest, LoginRequest, LoginResponse, RefreshRequest, RegisterForm,
        UpdateAccountRequest,
    },
    repo_types::{MediaSlot, NewUser},
    services::{generate_access_and_refresh_tokens, is_valid_email, non_blank, replace_user_media},
};
use crate::{
    auth::{
        cookies::{with_token_cookies, without_token_cookies, REFRESH_COOKIE},
        password::{hash_password, verify_password},
        AuthUser, JwtKeys, MaybeAuthUser,
    },
    error::{ApiError, ApiResult},
    media::UploadedFile,
    response::ApiResponse,
    state::AppState,
};

/// Keeps the status axum picked, e.g. 413 past the body limit.
fn bad_multipart(e: MultipartError) -> ApiError {
    warn!(error = %e, "unreadable multipart body");
    ApiError::new(e.status(), e.body_text())
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(v)| v).map_err(|e| {
        warn!(error = %e, "rejected json body");
        ApiError::bad_request(e.body_text())
    })
}

fn path_param<T>(param: Result<Path<T>, PathRejection>) -> ApiResult<T> {
    param.map(|Path(v)| v).map_err(|e| {
        warn!(error = %e, "rejected path parameter");
        ApiError::bad_request(e.body_text())
    })
}

fn multipart_body(body: Result<Multipart, MultipartRejection>) -> ApiResult<Multipart> {
    body.map_err(|e| ApiError::bad_request(e.body_text()))
}

/// Empty file parts count as absent.
async fn read_file(field: Field<'_>) -> ApiResult<Option<UploadedFile>> {
    let file_name = field.file_name().map(str::to_string);
    let content_type = field.content_type().unwrap_or_default().to_string();
    let body = field.bytes().await.map_err(bad_multipart)?;
    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(UploadedFile {
        file_name,
        content_type,
        body,
    }))
}

async fn read_register_form(mut mp: Multipart) -> ApiResult<RegisterForm> {
    let mut form = RegisterForm::default();
    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "fullName" => form.full_name = Some(field.text().await.map_err(bad_multipart)?),
            "email" => form.email = Some(field.text().await.map_err(bad_multipart)?),
            "username" => form.username = Some(field.text().await.map_err(bad_multipart)?),
            "password" => form.password = Some(field.text().await.map_err(bad_multipart)?),
            "avatar" => form.avatar = read_file(field).await?,
            "coverImage" => form.cover_image = read_file(field).await?,
            _ => {}
        }
    }
    Ok(form)
}

/// First non-empty file part; `expected` wins if several are sent.
async fn read_single_file(mut mp: Multipart, expected: &str) -> ApiResult<Option<UploadedFile>> {
    let mut first = None;
    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        let named = field.name() == Some(expected);
        if !named && field.file_name().is_none() {
            continue;
        }
        if let Some(file) = read_file(field).await? {
            if named {
                return Ok(Some(file));
            }
            first.get_or_insert(file);
        }
    }
    Ok(first)
}

#[instrument(skip(state, multipart))]
pub async fn register(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<impl IntoResponse> {
    let RegisterForm {
        full_name,
        email,
        username,
        password,
        avatar,
        cover_image,
    } = read_register_form(multipart_body(multipart)?).await?;

    let username = non_blank(username.as_deref()).map(str::to_lowercase);
    let email = non_blank(email.as_deref()).map(str::to_string);
    let full_name = non_blank(full_name.as_deref()).map(str::to_string);
    let password = password.filter(|p| !p.trim().is_empty());

    if username.is_some() || email.is_some() {
        let existing = state
            .users
            .find_by_identity(username.as_deref(), email.as_deref())
            .await?;
        if existing.is_some() {
            warn!(?username, ?email, "username or email already registered");
            return Err(ApiError::conflict("User with email or username already exists"));
        }
    }

    let (Some(full_name), Some(email), Some(username), Some(password)) =
        (full_name.clone(), email.clone(), username.clone(), password.clone())
    else {
        let missing: Vec<String> = [
            ("fullName", full_name.is_none()),
            ("email", email.is_none()),
            ("username", username.is_none()),
            ("password", password.is_none()),
        ]
        .into_iter()
        .filter(|(_, missing)| *missing)
        .map(|(field, _)| field.to_string())
        .collect();
        return Err(ApiError::bad_request("Please fill in all fields").with_errors(missing));
    };

    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email"));
    }

    let Some(avatar) = avatar else {
        return Err(ApiError::bad_request("Avatar file is required"));
    };

    let password_hash = hash_password(&password)?;

    let avatar = state.media.upload(avatar).await.map_err(|e| {
        warn!(error = ?e, "avatar upload failed");
        ApiError::internal("Failed to upload avatar")
    })?;

    let cover_image = match cover_image {
        Some(file) => match state.media.upload(file).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(error = ?e, "cover image upload failed");
                state.media.delete(&avatar.public_id).await;
                return Err(ApiError::internal("Failed to upload cover image"));
            }
        },
        None => None,
    };

    let new_user = NewUser {
        username,
        email,
        full_name,
        password_hash,
        avatar: avatar.url.clone(),
        cover_image: cover_image.as_ref().map(|c| c.url.clone()),
    };
    let created = match state.users.create(new_user).await {
        Ok(user) => user,
        Err(e) => {
            state.media.delete(&avatar.public_id).await;
            if let Some(cover) = &cover_image {
                state.media.delete(&cover.public_id).await;
            }
            return Err(e.into());
        }
    };

    let user = state
        .users
        .find_by_id(created.id)
        .await?
        .ok_or_else(|| ApiError::internal("Failed to create user"))?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(ApiResponse::created(user, "User registered successfully"))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let payload = json_body(payload)?;
    let username = non_blank(payload.username.as_deref()).map(str::to_lowercase);
    let email = non_blank(payload.email.as_deref()).map(str::to_string);

    if username.is_none() && email.is_none() {
        return Err(ApiError::bad_request("username or email is required"));
    }

    let Some(user) = state
        .users
        .find_by_identity(username.as_deref(), email.as_deref())
        .await?
    else {
        warn!(?username, ?email, "login for unknown user");
        return Err(ApiError::bad_request("User not found"));
    };

    let password = payload.password.unwrap_or_default();
    if !verify_password(&password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with incorrect password");
        return Err(ApiError::unauthorized("Incorrect password"));
    }

    let tokens = generate_access_and_refresh_tokens(&state, user.id).await?;
    let jar = with_token_cookies(jar, &tokens);

    info!(user_id = %user.id, "user logged in");
    Ok((
        jar,
        ApiResponse::ok(LoginResponse { user, tokens }, "User logged in successfully"),
    ))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    AuthUser(user): AuthUser,
) -> ApiResult<impl IntoResponse> {
    state.users.set_refresh_token(user.id, None).await?;
    info!("user logged out");
    Ok((
        without_token_cookies(jar),
        ApiResponse::ok(json!({}), "User logged out"),
    ))
}

#[instrument(skip_all)]
pub async fn refresh_access_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> ApiResult<impl IntoResponse> {
    let from_cookie = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());
    let from_body = body.and_then(|Json(b)| b.refresh_token).filter(|v| !v.trim().is_empty());
    let Some(incoming) = from_cookie.or(from_body) else {
        return Err(ApiError::unauthorized("Unauthorized request"));
    };

    let claims = JwtKeys::from_ref(&state)
        .verify_refresh(&incoming)
        .map_err(|e| {
            warn!(error = %e, "refresh token rejected");
            ApiError::unauthorized("Invalid refresh token")
        })?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    // Only the most recently issued refresh token is honoured.
    if user.refresh_token.as_deref() != Some(incoming.as_str()) {
        warn!(user_id = %user.id, "superseded refresh token presented");
        return Err(ApiError::unauthorized("Refresh token expired or invalid"));
    }

    let tokens = generate_access_and_refresh_tokens(&state, user.id).await?;
    let jar = with_token_cookies(jar, &tokens);

    info!(user_id = %user.id, "tokens refreshed");
    Ok((
        jar,
        ApiResponse::ok(tokens, "Access token refreshed successfully"),
    ))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_current_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let payload = json_body(payload)?;

    let stored = state
        .users
        .find_by_id(user.id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid access token"))?;

    let old_password = payload.old_password.unwrap_or_default();
    if !verify_password(&old_password, &stored.password_hash)? {
        warn!("password change with wrong old password");
        return Err(ApiError::bad_request("Invalid password"));
    }

    let Some(new_password) = payload.new_password.filter(|p| !p.trim().is_empty()) else {
        return Err(ApiError::bad_request("New password is required"));
    };

    let hash = hash_password(&new_password)?;
    state.users.set_password_hash(user.id, &hash).await?;

    info!("password changed");
    Ok(ApiResponse::ok(json!({}), "Password changed successfully"))
}

pub async fn get_current_user(AuthUser(user): AuthUser) -> impl IntoResponse {
    ApiResponse::ok(user, "User fetched successfully")
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_account_details(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let payload = json_body(payload)?;
    let (Some(full_name), Some(email)) = (
        non_blank(payload.full_name.as_deref()),
        non_blank(payload.email.as_deref()),
    ) else {
        return Err(ApiError::bad_request("All fields are required"));
    };

    if !is_valid_email(email) {
        return Err(ApiError::bad_request("Invalid email"));
    }

    let updated = state
        .users
        .update_account(user.id, full_name, email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!("account details updated");
    Ok(ApiResponse::ok(updated, "Account details updated successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_user_avatar(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<impl IntoResponse> {
    let Some(file) = read_single_file(multipart_body(multipart)?, "avatar").await? else {
        return Err(ApiError::bad_request("File missing"));
    };
    let updated = replace_user_media(&state, user.id, MediaSlot::Avatar, file).await?;
    Ok(ApiResponse::ok(updated, "Avatar updated successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_user_cover_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<impl IntoResponse> {
    let Some(file) = read_single_file(multipart_body(multipart)?, "coverImage").await? else {
        return Err(ApiError::bad_request("File missing"));
    };
    let updated = replace_user_media(&state, user.id, MediaSlot::CoverImage, file).await?;
    Ok(ApiResponse::ok(updated, "Cover image updated successfully"))
}

#[instrument(skip_all, fields(username = tracing::field::Empty))]
pub async fn get_user_channel_profile(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    username: Result<Path<String>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let username = path_param(username)?;
    tracing::Span::current().record("username", username.as_str());
    let Some(username) = non_blank(Some(username.as_str())).map(str::to_lowercase) else {
        return Err(ApiError::bad_request("Username is required"));
    };

    let channel = state
        .users
        .channel_profile(&username, viewer.map(|v| v.id))
        .await?
        .ok_or_else(|| ApiError::not_found("Channel does not exist"))?;

    Ok(ApiResponse::ok(channel, "User channel fetched successfully"))
}
