use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{ChannelProfile, DuplicateKey, MediaSlot, MediaSwap, NewUser, User};

/// Persistence boundary for user records and the subscription read model.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    /// Match on username or email; `None` identifiers never match.
    async fn find_by_identity(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>>;

    async fn create(&self, new_user: NewUser) -> anyhow::Result<User>;

    /// Returns false when no such user exists.
    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> anyhow::Result<bool>;

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool>;

    async fn update_account(
        &self,
        id: Uuid,
        full_name: &str,
        email: &str,
    ) -> anyhow::Result<Option<User>>;

    /// Points `slot` at `url` and hands back what it held before, atomically.
    async fn replace_media_url(
        &self,
        id: Uuid,
        slot: MediaSlot,
        url: &str,
    ) -> anyhow::Result<Option<MediaSwap>>;

    async fn channel_profile(
        &self,
        username: &str,
        viewer: Option<Uuid>,
    ) -> anyhow::Result<Option<ChannelProfile>>;
}

const USER_COLUMNS: &str = "id, username, email, full_name, avatar, cover_image, \
                            password_hash, refresh_token, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_write_err(e: sqlx::Error, what: &'static str) -> anyhow::Error {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return DuplicateKey(db.constraint().unwrap_or("unknown").to_string()).into();
        }
    }
    anyhow::Error::new(e).context(what)
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        Ok(user)
    }

    async fn find_by_identity(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $2 LIMIT 1"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by username or email")?;
        Ok(user)
    }

    async fn create(&self, new_user: NewUser) -> anyhow::Result<User> {
        let sql = format!(
            r#"
            INSERT INTO users (username, email, full_name, password_hash, avatar, cover_image)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&new_user.username)
            .bind(&new_user.email)
            .bind(&new_user.full_name)
            .bind(&new_user.password_hash)
            .bind(&new_user.avatar)
            .bind(&new_user.cover_image)
            .fetch_one(&self.db)
            .await
            .map_err(|e| map_write_err(e, "insert user"))
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(&self.db)
            .await
            .context("store refresh token")?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await
        .context("store password hash")?;
        Ok(res.rows_affected() > 0)
    }

    async fn update_account(
        &self,
        id: Uuid,
        full_name: &str,
        email: &str,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users SET full_name = $2, email = $3, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(full_name)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_write_err(e, "update account details"))
    }

    async fn replace_media_url(
        &self,
        id: Uuid,
        slot: MediaSlot,
        url: &str,
    ) -> anyhow::Result<Option<MediaSwap>> {
        // The row lock serialises concurrent swaps so each old URL is returned once.
        let sql = format!(
            r#"
            UPDATE users u SET {col} = $2, updated_at = now()
              FROM (SELECT id AS locked_id, {col} AS previous
                      FROM users WHERE id = $1 FOR UPDATE) old
             WHERE u.id = old.locked_id
            RETURNING {USER_COLUMNS}, old.previous
            "#,
            col = slot.column()
        );
        let swap = sqlx::query_as::<_, MediaSwap>(&sql)
            .bind(id)
            .bind(url)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("update {}", slot.column()))?;
        Ok(swap)
    }

    async fn channel_profile(
        &self,
        username: &str,
        viewer: Option<Uuid>,
    ) -> anyhow::Result<Option<ChannelProfile>> {
        let profile = sqlx::query_as::<_, ChannelProfile>(
            r#"
            SELECT u.id, u.full_name, u.username, u.avatar, u.cover_image, u.email,
                   (SELECT COUNT(*) FROM subscriptions s WHERE s.channel_id = u.id)
                       AS subscribers_count,
                   (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber_id = u.id)
                       AS channels_subscribed_to_count,
                   EXISTS (
                       SELECT 1 FROM subscriptions s
                        WHERE s.channel_id = u.id AND s.subscriber_id = $2
                   ) AS is_subscribed
              FROM users u
             WHERE u.username = $1
            "#,
        )
        .bind(username)
        .bind(viewer)
        .fetch_optional(&self.db)
        .await
        .context("channel profile aggregation")?;
        Ok(profile)
    }
}
