use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::{Row, Transaction, error::SqlState};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::user::{AccountUpdate, NewUser, User, UserStats, WebsitePermission},
};

/// Data-access contract for users and their website permissions.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Inserts a user with its initial permissions.
    async fn create(&self, user: NewUser) -> Result<User>;

    /// Finds a user by ID.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Finds a user by username.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Lists every user, oldest first.
    async fn list(&self) -> Result<Vec<User>>;

    /// Aggregate counts for the admin dashboard.
    async fn stats(&self, now: DateTime<Utc>) -> Result<UserStats>;

    /// Bumps the login counter and makes `session_id` the only live session.
    async fn record_login(&self, id: Uuid, session_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// Replaces (or clears) the user's live session.
    async fn set_current_session(&self, id: Uuid, session_id: Option<Uuid>) -> Result<()>;

    /// Increments the token version, invalidating every issued session.
    async fn bump_token_version(&self, id: Uuid) -> Result<i32>;

    /// Applies a partial account update and returns the updated user.
    async fn update_account(&self, id: Uuid, update: AccountUpdate) -> Result<Option<User>>;

    /// Replaces the user's whole permission list.
    async fn replace_permissions(&self, id: Uuid, permissions: Vec<WebsitePermission>) -> Result<()>;

    /// Inserts or updates the grant for `permission.website`.
    async fn upsert_permission(&self, id: Uuid, permission: WebsitePermission) -> Result<()>;

    /// Deletes the grant for `website`; returns whether one existed.
    async fn remove_permission(&self, id: Uuid, website: &str) -> Result<bool>;

    /// Atomically checks that the grant for `website` is live at `now` and,
    /// if so, records the access. Returns the updated grant, or `None` when
    /// the grant is missing, switched off, or expired.
    async fn record_access(
        &self,
        id: Uuid,
        website: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebsitePermission>>;
}

/// PostgreSQL-backed `UserRepository`.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool,
}

impl PgUserRepository {
    /// Creates a repository over `pool`.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, username, password, is_admin, is_active, expiry_date, \
    login_count, last_login, token_version, current_session_id, created_at, updated_at";

const PERMISSION_COLUMNS: &str =
    "website, has_access, expires_at, last_accessed, access_count, granted_at";

/// A helper function to map a `tokio_postgres::Row` to a `User` without permissions.
fn row_to_user(row: &Row) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        is_admin: row.try_get("is_admin")?,
        is_active: row.try_get("is_active")?,
        expiry_date: row.try_get("expiry_date")?,
        website_permissions: Vec::new(),
        login_count: row.try_get("login_count")?,
        last_login: row.try_get("last_login")?,
        token_version: row.try_get("token_version")?,
        current_session_id: row.try_get("current_session_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_permission(row: &Row) -> Result<WebsitePermission> {
    Ok(WebsitePermission {
        website: row.try_get("website")?,
        has_access: row.try_get("has_access")?,
        expires_at: row.try_get("expires_at")?,
        last_accessed: row.try_get("last_accessed")?,
        access_count: row.try_get("access_count")?,
        granted_at: row.try_get("granted_at")?,
    })
}

fn map_unique_violation(e: tokio_postgres::Error, what: &str) -> AppError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        AppError::Conflict(format!("{} already exists", what))
    } else {
        AppError::Database(e)
    }
}

async fn load_permissions(
    client: &tokio_postgres::Client,
    user_id: &Uuid,
) -> Result<Vec<WebsitePermission>> {
    let rows = client
        .query(
            &format!(
                "SELECT {PERMISSION_COLUMNS} FROM website_permissions \
                 WHERE user_id = $1 ORDER BY website ASC"
            ),
            &[user_id],
        )
        .await?;
    rows.iter().map(row_to_permission).collect()
}

async fn insert_permission(
    tx: &Transaction<'_>,
    user_id: &Uuid,
    permission: &WebsitePermission,
) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO website_permissions
            (user_id, website, has_access, expires_at, last_accessed, access_count, granted_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id, website) DO UPDATE
        SET has_access = EXCLUDED.has_access, expires_at = EXCLUDED.expires_at
        "#,
        &[
            user_id,
            &permission.website,
            &permission.has_access,
            &permission.expires_at,
            &permission.last_accessed,
            &permission.access_count,
            &permission.granted_at,
        ],
    )
    .await?;
    Ok(())
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: NewUser) -> Result<User> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let id = Uuid::new_v4();
        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO users (id, username, password, is_admin, expiry_date) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
                ),
                &[
                    &id,
                    &user.username,
                    &user.password_hash,
                    &user.is_admin,
                    &user.expiry_date,
                ],
            )
            .await
            .map_err(|e| map_unique_violation(e, "Username"))?;

        let mut created = row_to_user(&row)?;
        for permission in &user.website_permissions {
            insert_permission(&tx, &id, permission).await?;
        }
        tx.commit().await?;

        created.website_permissions = user.website_permissions;
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"),
                &[&id],
            )
            .await?;
        match row {
            Some(row) => {
                let mut user = row_to_user(&row)?;
                user.website_permissions = load_permissions(&client, &user.id).await?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"),
                &[&username],
            )
            .await?;
        match row {
            Some(row) => {
                let mut user = row_to_user(&row)?;
                user.website_permissions = load_permissions(&client, &user.id).await?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<User>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"),
                &[],
            )
            .await?;
        let mut users = rows.iter().map(row_to_user).collect::<Result<Vec<_>>>()?;

        let permission_rows = client
            .query(
                &format!(
                    "SELECT user_id, {PERMISSION_COLUMNS} FROM website_permissions \
                     ORDER BY website ASC"
                ),
                &[],
            )
            .await?;
        let mut by_user: HashMap<Uuid, Vec<WebsitePermission>> = HashMap::new();
        for row in &permission_rows {
            let user_id: Uuid = row.try_get("user_id")?;
            by_user.entry(user_id).or_default().push(row_to_permission(row)?);
        }
        for user in &mut users {
            user.website_permissions = by_user.remove(&user.id).unwrap_or_default();
        }
        Ok(users)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<UserStats> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                SELECT
                    COUNT(*) AS total_users,
                    COUNT(*) FILTER (WHERE is_active) AS active_users,
                    COUNT(*) FILTER (WHERE is_admin) AS admin_users,
                    COUNT(*) FILTER (
                        WHERE NOT is_admin AND expiry_date IS NOT NULL AND expiry_date <= $1
                    ) AS expired_users,
                    COALESCE(SUM(login_count), 0)::BIGINT AS total_logins
                FROM users
                "#,
                &[&now],
            )
            .await?;
        Ok(UserStats {
            total_users: row.try_get("total_users")?,
            active_users: row.try_get("active_users")?,
            admin_users: row.try_get("admin_users")?,
            expired_users: row.try_get("expired_users")?,
            total_logins: row.try_get("total_logins")?,
        })
    }

    async fn record_login(&self, id: Uuid, session_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                UPDATE users
                SET login_count = login_count + 1, last_login = $2,
                    current_session_id = $3, updated_at = $2
                WHERE id = $1
                "#,
                &[&id, &now, &session_id],
            )
            .await?;
        Ok(())
    }

    async fn set_current_session(&self, id: Uuid, session_id: Option<Uuid>) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE users SET current_session_id = $2 WHERE id = $1",
                &[&id, &session_id],
            )
            .await?;
        Ok(())
    }

    async fn bump_token_version(&self, id: Uuid) -> Result<i32> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                UPDATE users
                SET token_version = token_version + 1, current_session_id = NULL, updated_at = NOW()
                WHERE id = $1
                RETURNING token_version
                "#,
                &[&id],
            )
            .await?
            .ok_or(AppError::NotFound)?;
        Ok(row.try_get("token_version")?)
    }

    async fn update_account(&self, id: Uuid, update: AccountUpdate) -> Result<Option<User>> {
        let set_expiry = update.expiry_date.is_some();
        let expiry = update.expiry_date.flatten();
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE users
                SET is_active = COALESCE($2, is_active),
                    is_admin = COALESCE($3, is_admin),
                    expiry_date = CASE WHEN $4::BOOLEAN THEN $5::TIMESTAMPTZ ELSE expiry_date END,
                    updated_at = NOW()
                WHERE id = $1
                "#,
                &[&id, &update.is_active, &update.is_admin, &set_expiry, &expiry],
            )
            .await?;
        drop(client);

        if updated == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    async fn replace_permissions(&self, id: Uuid, permissions: Vec<WebsitePermission>) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute("DELETE FROM website_permissions WHERE user_id = $1", &[&id])
            .await?;
        for permission in &permissions {
            insert_permission(&tx, &id, permission).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_permission(&self, id: Uuid, permission: WebsitePermission) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        insert_permission(&tx, &id, &permission).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_permission(&self, id: Uuid, website: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM website_permissions WHERE user_id = $1 AND website = $2",
                &[&id, &website],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn record_access(
        &self,
        id: Uuid,
        website: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebsitePermission>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE website_permissions \
                     SET last_accessed = $3, access_count = access_count + 1 \
                     WHERE user_id = $1 AND website = $2 AND has_access = true \
                       AND (expires_at IS NULL OR expires_at > $3) \
                     RETURNING {PERMISSION_COLUMNS}"
                ),
                &[&id, &website, &now],
            )
            .await?;
        row.as_ref().map(row_to_permission).transpose()
    }
}
