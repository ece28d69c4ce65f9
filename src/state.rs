use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::media::MediaService;
use crate::storage::{Storage, StorageClient};
use crate::users::repo::{PgUserRepo, UserRepo};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepo>,
    pub media: MediaService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Connects to Postgres and object storage. Returns the pool too so the
    /// caller can run migrations.
    pub async fn init(config: AppConfig) -> anyhow::Result<(Self, sqlx::PgPool)> {
        let config = Arc::new(config);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let storage = Arc::new(Storage::new(&config.media).await?) as Arc<dyn StorageClient>;

        let state = Self::from_parts(
            Arc::new(PgUserRepo::new(db.clone())),
            storage,
            config,
        );
        Ok((state, db))
    }

    pub fn from_parts(
        users: Arc<dyn UserRepo>,
        storage: Arc<dyn StorageClient>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            users,
            media: MediaService::new(storage),
            config,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        testing::TestContext::new().state
    }
}
