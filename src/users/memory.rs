//! In-process `UserRepo` with the same uniqueness rules as the SQL schema.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::UserRepo;
use super::repo_types::{ChannelProfile, DuplicateKey, MediaSlot, MediaSwap, NewUser, User};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    // (subscriber, channel)
    subscriptions: Vec<(Uuid, Uuid)>,
}

#[derive(Default)]
pub struct MemoryUserRepo {
    tables: Mutex<Tables>,
    fail_inserts: AtomicBool,
}

impl MemoryUserRepo {
    /// Makes every later `create` fail as if the database were down.
    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    pub fn subscribe(&self, subscriber: Uuid, channel: Uuid) {
        self.tables.lock().unwrap().subscriptions.push((subscriber, channel));
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        let tables = self.tables.lock().unwrap();
        tables.users.iter().find(|u| u.id == id).cloned()
    }

    fn check_unique(tables: &Tables, id: Option<Uuid>, username: &str, email: &str) -> anyhow::Result<()> {
        for u in tables.users.iter().filter(|u| Some(u.id) != id) {
            if u.username == username {
                return Err(DuplicateKey("users_username_key".into()).into());
            }
            if u.email == email {
                return Err(DuplicateKey("users_email_key".into()).into());
            }
        }
        Ok(())
    }

    fn update<F>(&self, id: Uuid, f: F) -> anyhow::Result<Option<User>>
    where
        F: FnOnce(&mut User),
    {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables.users.iter_mut().find(|u| u.id == id).map(|u| {
            f(u);
            u.updated_at = OffsetDateTime::now_utc();
            u.clone()
        }))
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.get(id))
    }

    async fn find_by_identity(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .users
            .iter()
            .find(|u| username == Some(u.username.as_str()) || email == Some(u.email.as_str()))
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> anyhow::Result<User> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            anyhow::bail!("insert user: connection refused");
        }
        let mut tables = self.tables.lock().unwrap();
        Self::check_unique(&tables, None, &new_user.username, &new_user.email)?;
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            full_name: new_user.full_name,
            avatar: new_user.avatar,
            cover_image: new_user.cover_image,
            password_hash: new_user.password_hash,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> anyhow::Result<bool> {
        let mut tables = self.tables.lock().unwrap();
        match tables.users.iter_mut().find(|u| u.id == id) {
            Some(u) => {
                u.refresh_token = token.map(str::to_string);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let updated = self.update(id, |u| u.password_hash = password_hash.to_string())?;
        Ok(updated.is_some())
    }

    async fn update_account(
        &self,
        id: Uuid,
        full_name: &str,
        email: &str,
    ) -> anyhow::Result<Option<User>> {
        {
            let tables = self.tables.lock().unwrap();
            let Some(current) = tables.users.iter().find(|u| u.id == id) else {
                return Ok(None);
            };
            Self::check_unique(&tables, Some(id), &current.username, email)?;
        }
        self.update(id, |u| {
            u.full_name = full_name.to_string();
            u.email = email.to_string();
        })
    }

    async fn replace_media_url(
        &self,
        id: Uuid,
        slot: MediaSlot,
        url: &str,
    ) -> anyhow::Result<Option<MediaSwap>> {
        let mut previous = None;
        let user = self.update(id, |u| {
            previous = slot.current(u).map(str::to_string);
            match slot {
                MediaSlot::Avatar => u.avatar = url.to_string(),
                MediaSlot::CoverImage => u.cover_image = Some(url.to_string()),
            }
        })?;
        Ok(user.map(|user| MediaSwap { user, previous }))
    }

    async fn channel_profile(
        &self,
        username: &str,
        viewer: Option<Uuid>,
    ) -> anyhow::Result<Option<ChannelProfile>> {
        let tables = self.tables.lock().unwrap();
        let Some(user) = tables.users.iter().find(|u| u.username == username) else {
            return Ok(None);
        };
        let subscribers: Vec<Uuid> = tables
            .subscriptions
            .iter()
            .filter(|(_, channel)| *channel == user.id)
            .map(|(subscriber, _)| *subscriber)
            .collect();
        let subscribed_to = tables
            .subscriptions
            .iter()
            .filter(|(subscriber, _)| *subscriber == user.id)
            .count();
        Ok(Some(ChannelProfile {
            id: user.id,
            full_name: user.full_name.clone(),
            username: user.username.clone(),
            subscribers_count: subscribers.len() as i64,
            channels_subscribed_to_count: subscribed_to as i64,
            is_subscribed: viewer.is_some_and(|v| subscribers.contains(&v)),
            avatar: user.avatar.clone(),
            cover_image: user.cover_image.clone(),
            email: user.email.clone(),
        }))
    }
}
