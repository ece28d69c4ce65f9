use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String, // always lowercase
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Fields needed to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub avatar: String,
    pub cover_image: Option<String>,
}

/// Which image column an upload replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSlot {
    Avatar,
    CoverImage,
}

impl MediaSlot {
    pub fn column(self) -> &'static str {
        match self {
            MediaSlot::Avatar => "avatar",
            MediaSlot::CoverImage => "cover_image",
        }
    }

    pub fn current(self, user: &User) -> Option<&str> {
        match self {
            MediaSlot::Avatar => Some(user.avatar.as_str()),
            MediaSlot::CoverImage => user.cover_image.as_deref(),
        }
    }
}

/// Result of pointing a media slot at a new URL.
#[derive(Debug, Clone, FromRow)]
pub struct MediaSwap {
    #[sqlx(flatten)]
    pub user: User,
    /// Slot value before the update.
    pub previous: Option<String>,
}

/// A user seen as the target of subscriptions.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    pub id: Uuid,
    pub full_name: String,
    pub username: String,
    pub subscribers_count: i64,
    pub channels_subscribed_to_count: i64,
    pub is_subscribed: bool,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub email: String,
}

/// A unique index rejected a write.
#[derive(Debug, thiserror::Error)]
#[error("duplicate key violates unique constraint {0}")]
pub struct DuplicateKey(pub String);
