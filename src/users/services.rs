use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dto::TokenPair;
use super::repo_types::{MediaSlot, User};
use crate::{
    auth::{claims::Subject, JwtKeys},
    error::ApiError,
    media::{extract_public_id, UploadedFile},
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trimmed value, or `None` when missing or blank.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Issues a new access/refresh pair and stores the refresh token on the user,
/// superseding whatever was stored before.
#[instrument(skip(state))]
pub async fn generate_access_and_refresh_tokens(
    state: &AppState,
    user_id: Uuid,
) -> Result<TokenPair, ApiError> {
    issue_pair(state, user_id).await.map_err(|e| {
        error!(error = ?e, %user_id, "token generation failed");
        ApiError::internal("Something went wrong while generating access and refresh token")
    })
}

async fn issue_pair(state: &AppState, user_id: Uuid) -> anyhow::Result<TokenPair> {
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user not found"))?;

    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(Subject {
        id: user.id,
        username: &user.username,
        email: &user.email,
    })?;
    let refresh_token = keys.sign_refresh(user.id)?;

    if !state.users.set_refresh_token(user.id, Some(&refresh_token)).await? {
        anyhow::bail!("user vanished while storing refresh token");
    }

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Uploads `file`, points `slot` at it, then drops the object it replaced.
#[instrument(skip(state, file), fields(size = file.body.len()))]
pub async fn replace_user_media(
    state: &AppState,
    user_id: Uuid,
    slot: MediaSlot,
    file: UploadedFile,
) -> Result<User, ApiError> {
    let stored = state.media.upload(file).await.map_err(|e| {
        error!(error = ?e, ?slot, "media upload failed");
        ApiError::internal(match slot {
            MediaSlot::Avatar => "Error while uploading avatar",
            MediaSlot::CoverImage => "Error while uploading cover image",
        })
    })?;

    let Some(swap) = state
        .users
        .replace_media_url(user_id, slot, &stored.url)
        .await?
    else {
        warn!(%user_id, "user disappeared before media update");
        state.media.delete(&stored.public_id).await;
        return Err(ApiError::not_found("User not found"));
    };

    if let Some(old_url) = swap.previous.as_deref().filter(|url| !url.is_empty()) {
        state.media.delete(extract_public_id(old_url)).await;
    }

    info!(%user_id, ?slot, public_id = %stored.public_id, "user media replaced");
    Ok(swap.user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::state::testing::{FakeStorage, TestContext};
    use crate::users::repo_types::NewUser;
    use axum::http::StatusCode;
    use bytes::Bytes;

    fn png() -> UploadedFile {
        UploadedFile {
            file_name: Some("pic.png".into()),
            content_type: "image/png".into(),
            body: Bytes::from_static(b"\x89PNG"),
        }
    }

    async fn seed(ctx: &TestContext, cover: Option<&str>) -> User {
        ctx.state
            .users
            .create(NewUser {
                username: "ada".into(),
                email: "ada@x.com".into(),
                full_name: "Ada Lovelace".into(),
                password_hash: hash_password("secret").unwrap(),
                avatar: "https://media.test/bucket/oldavatar".into(),
                cover_image: cover.map(str::to_string),
            })
            .await
            .unwrap()
    }

    #[test]
    fn email_pattern() {
        assert!(is_valid_email("ada@x.com"));
        assert!(!is_valid_email("ada@x"));
        assert!(!is_valid_email("ada x@x.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn blank_values() {
        assert_eq!(non_blank(Some("  ada ")), Some("ada"));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }

    #[tokio::test]
    async fn token_pair_is_stored_on_user() {
        let ctx = TestContext::new();
        let user = seed(&ctx, None).await;

        let pair = generate_access_and_refresh_tokens(&ctx.state, user.id).await.unwrap();
        let stored = ctx.users.get(user.id).unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));

        let keys = JwtKeys::from_ref(&ctx.state);
        assert_eq!(keys.verify_access(&pair.access_token).unwrap().sub, user.id);
    }

    #[tokio::test]
    async fn token_pair_for_unknown_user_is_masked() {
        let ctx = TestContext::new();
        let err = generate_access_and_refresh_tokens(&ctx.state, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message.contains("generating access and refresh token"));
    }

    #[tokio::test]
    async fn replacing_avatar_deletes_the_old_object_once() {
        let ctx = TestContext::new();
        let user = seed(&ctx, None).await;

        let updated = replace_user_media(&ctx.state, user.id, MediaSlot::Avatar, png())
            .await
            .unwrap();

        assert_ne!(updated.avatar, user.avatar);
        assert_eq!(ctx.storage.deletes(), vec!["oldavatar".to_string()]);
        assert_eq!(ctx.users.get(user.id).unwrap().avatar, updated.avatar);
    }

    #[tokio::test]
    async fn first_cover_image_deletes_nothing() {
        let ctx = TestContext::new();
        let user = seed(&ctx, None).await;

        let updated = replace_user_media(&ctx.state, user.id, MediaSlot::CoverImage, png())
            .await
            .unwrap();

        assert!(updated.cover_image.is_some());
        assert!(ctx.storage.deletes().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_does_not_fail_the_update() {
        let ctx = TestContext::with_storage(FakeStorage::failing_deletes());
        let user = seed(&ctx, Some("https://media.test/bucket/oldcover.jpg")).await;

        let updated = replace_user_media(&ctx.state, user.id, MediaSlot::CoverImage, png())
            .await
            .unwrap();

        assert_ne!(updated.cover_image, user.cover_image);
        assert_eq!(ctx.storage.deletes(), vec!["oldcover".to_string()]);
    }

    #[tokio::test]
    async fn failed_upload_leaves_record_alone() {
        let ctx = TestContext::with_storage(FakeStorage::failing_uploads());
        let user = seed(&ctx, None).await;

        let err = replace_user_media(&ctx.state, user.id, MediaSlot::Avatar, png())
            .await
            .unwrap_err();

        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.users.get(user.id).unwrap().avatar, user.avatar);
    }

    #[tokio::test]
    async fn successive_replacements_each_delete_their_predecessor() {
        let ctx = TestContext::new();
        let user = seed(&ctx, None).await;

        let first = replace_user_media(&ctx.state, user.id, MediaSlot::Avatar, png())
            .await
            .unwrap();
        replace_user_media(&ctx.state, user.id, MediaSlot::Avatar, png())
            .await
            .unwrap();

        assert_eq!(
            ctx.storage.deletes(),
            vec!["oldavatar".to_string(), extract_public_id(&first.avatar).to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let ctx = TestContext::new();
        let err = replace_user_media(&ctx.state, Uuid::new_v4(), MediaSlot::Avatar, png())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(ctx.storage.deletes(), ctx.storage.puts());
    }
}
