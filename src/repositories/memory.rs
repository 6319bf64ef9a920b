//! In-process implementations of the repository traits.
//!
//! Each store keeps its data behind one async mutex, so every trait call is
//! atomic with respect to the others.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{cookie::CookieRepository, session::SessionStore, user::UserRepository};
use crate::{
    crypto::token::token_fingerprint,
    error::{AppError, Result},
    models::{
        cookie::{CookieBundle, CookieRecord, WebsiteCookieBundle},
        session::Session,
        user::{AccountUpdate, NewUser, User, UserStats, WebsitePermission},
    },
};

/// `UserRepository` over a `HashMap`.
#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: NewUser) -> Result<User> {
        let mut users = self.users.lock().await;
        if users.values().any(|u| u.username == user.username) {
            return Err(AppError::Conflict("Username already exists".to_string()));
        }

        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            password: user.password_hash,
            is_admin: user.is_admin,
            is_active: true,
            expiry_date: user.expiry_date,
            website_permissions: user.website_permissions,
            login_count: 0,
            last_login: None,
            token_version: 0,
            current_session_id: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.lock().await.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<UserStats> {
        let users = self.users.lock().await;
        Ok(UserStats {
            total_users: users.len() as i64,
            active_users: users.values().filter(|u| u.is_active).count() as i64,
            admin_users: users.values().filter(|u| u.is_admin).count() as i64,
            expired_users: users.values().filter(|u| u.plan_expired(now)).count() as i64,
            total_logins: users.values().map(|u| i64::from(u.login_count)).sum(),
        })
    }

    async fn record_login(&self, id: Uuid, session_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(AppError::NotFound)?;
        user.login_count += 1;
        user.last_login = Some(now);
        user.current_session_id = Some(session_id);
        user.updated_at = now;
        Ok(())
    }

    async fn set_current_session(&self, id: Uuid, session_id: Option<Uuid>) -> Result<()> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(AppError::NotFound)?;
        user.current_session_id = session_id;
        Ok(())
    }

    async fn bump_token_version(&self, id: Uuid) -> Result<i32> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(AppError::NotFound)?;
        user.token_version += 1;
        user.current_session_id = None;
        user.updated_at = Utc::now();
        Ok(user.token_version)
    }

    async fn update_account(&self, id: Uuid, update: AccountUpdate) -> Result<Option<User>> {
        let mut users = self.users.lock().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(is_active) = update.is_active {
            user.is_active = is_active;
        }
        if let Some(is_admin) = update.is_admin {
            user.is_admin = is_admin;
        }
        if let Some(expiry_date) = update.expiry_date {
            user.expiry_date = expiry_date;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn replace_permissions(&self, id: Uuid, permissions: Vec<WebsitePermission>) -> Result<()> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(AppError::NotFound)?;
        user.website_permissions = permissions;
        Ok(())
    }

    async fn upsert_permission(&self, id: Uuid, permission: WebsitePermission) -> Result<()> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(AppError::NotFound)?;
        match user
            .website_permissions
            .iter_mut()
            .find(|p| p.website == permission.website)
        {
            Some(existing) => {
                existing.has_access = permission.has_access;
                existing.expires_at = permission.expires_at;
            }
            None => user.website_permissions.push(permission),
        }
        Ok(())
    }

    async fn remove_permission(&self, id: Uuid, website: &str) -> Result<bool> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(AppError::NotFound)?;
        let before = user.website_permissions.len();
        user.website_permissions.retain(|p| p.website != website);
        Ok(user.website_permissions.len() != before)
    }

    async fn record_access(
        &self,
        id: Uuid,
        website: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebsitePermission>> {
        let mut users = self.users.lock().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        let Some(permission) = user
            .website_permissions
            .iter_mut()
            .find(|p| p.website == website && p.is_live(now))
        else {
            return Ok(None);
        };
        permission.last_accessed = Some(now);
        permission.access_count += 1;
        Ok(Some(permission.clone()))
    }
}

#[derive(Default)]
struct CookieTables {
    bundles: Vec<CookieBundle>,
    website_bundles: HashMap<String, WebsiteCookieBundle>,
}

/// `CookieRepository` over in-process collections.
#[derive(Default)]
pub struct MemoryCookieRepository {
    tables: Mutex<CookieTables>,
}

impl MemoryCookieRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CookieRepository for MemoryCookieRepository {
    async fn insert_bundle(&self, uploaded_by: Uuid, cookies: Vec<CookieRecord>) -> Result<CookieBundle> {
        let bundle = CookieBundle {
            id: Uuid::new_v4(),
            uploaded_by,
            cookies,
            created_at: Utc::now(),
        };
        self.tables.lock().await.bundles.push(bundle.clone());
        Ok(bundle)
    }

    async fn latest_bundle(&self) -> Result<Option<CookieBundle>> {
        Ok(self.tables.lock().await.bundles.last().cloned())
    }

    async fn find_bundle(&self, id: Uuid) -> Result<Option<CookieBundle>> {
        Ok(self
            .tables
            .lock()
            .await
            .bundles
            .iter()
            .find(|b| b.id == id)
            .cloned())
    }

    async fn list_bundles(&self, limit: i64) -> Result<Vec<CookieBundle>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .tables
            .lock()
            .await
            .bundles
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save_website_bundle(
        &self,
        website: &str,
        cookies: Vec<CookieRecord>,
        uploaded_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WebsiteCookieBundle> {
        let mut tables = self.tables.lock().await;
        let bundle = match tables.website_bundles.get_mut(website) {
            Some(bundle) => {
                bundle.roll_forward(cookies, uploaded_by, now);
                bundle.clone()
            }
            None => {
                let bundle = WebsiteCookieBundle::new(website.to_string(), cookies, uploaded_by, now);
                tables.website_bundles.insert(website.to_string(), bundle.clone());
                bundle
            }
        };
        Ok(bundle)
    }

    async fn find_website_bundle(&self, website: &str) -> Result<Option<WebsiteCookieBundle>> {
        Ok(self.tables.lock().await.website_bundles.get(website).cloned())
    }

    async fn list_website_bundles(&self) -> Result<Vec<WebsiteCookieBundle>> {
        let mut bundles: Vec<WebsiteCookieBundle> =
            self.tables.lock().await.website_bundles.values().cloned().collect();
        bundles.sort_by(|a, b| a.website.cmp(&b.website));
        Ok(bundles)
    }

    async fn delete_website_bundle(&self, website: &str) -> Result<bool> {
        Ok(self.tables.lock().await.website_bundles.remove(website).is_some())
    }
}

/// `SessionStore` over a `HashMap` keyed by token fingerprint.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, token: &str, session: &Session, _ttl_seconds: u64) -> Result<()> {
        self.sessions
            .lock()
            .await
            .insert(token_fingerprint(token), session.clone());
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<Session>> {
        let mut sessions = self.sessions.lock().await;
        let key = token_fingerprint(token);
        let expired = sessions
            .get(&key)
            .is_some_and(|session| Utc::now() > session.expires_at);
        if expired {
            sessions.remove(&key);
            return Ok(None);
        }
        Ok(sessions.get(&key).cloned())
    }

    async fn delete(&self, token: &str) -> Result<()> {
        self.sessions.lock().await.remove(&token_fingerprint(token));
        Ok(())
    }
}
