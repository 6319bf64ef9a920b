use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A per-user, per-website access grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsitePermission {
    /// The normalized hostname this grant covers.
    pub website: String,
    /// Whether the grant is currently switched on.
    pub has_access: bool,
    /// When the grant stops being valid; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// The last time the grant was used.
    pub last_accessed: Option<DateTime<Utc>>,
    /// How many times the grant was used.
    pub access_count: i32,
    /// When the grant was created.
    pub granted_at: DateTime<Utc>,
}

impl WebsitePermission {
    /// Creates an unused grant.
    pub fn new(website: String, has_access: bool, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            website,
            has_access,
            expires_at,
            last_accessed: None,
            access_count: 0,
            granted_at: now,
        }
    }

    /// Whether the grant is switched on and not expired at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.has_access && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// Represents a user in the system.
///
/// The password hash is redacted in `Debug` output.
#[derive(Clone)]
pub struct User {
    /// The unique identifier for the user.
    pub id: Uuid,
    /// The user's username.
    pub username: String,
    /// The user's hashed password.
    pub password: String,
    /// Whether the user bypasses website permissions.
    pub is_admin: bool,
    /// Whether the user is active.
    pub is_active: bool,
    /// The end of the user's plan; `None` never expires.
    pub expiry_date: Option<DateTime<Utc>>,
    /// The user's website grants.
    pub website_permissions: Vec<WebsitePermission>,
    /// The number of successful logins.
    pub login_count: i32,
    /// The timestamp of the last login.
    pub last_login: Option<DateTime<Utc>>,
    /// Sessions issued under an older version are rejected.
    pub token_version: i32,
    /// The only session allowed to act for this user.
    pub current_session_id: Option<Uuid>,
    /// The timestamp when the user was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the user was last updated.
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("is_admin", &self.is_admin)
            .field("is_active", &self.is_active)
            .field("expiry_date", &self.expiry_date)
            .field("website_permissions", &self.website_permissions)
            .field("login_count", &self.login_count)
            .field("last_login", &self.last_login)
            .field("token_version", &self.token_version)
            .field("current_session_id", &self.current_session_id)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl User {
    /// Whether the user's plan has lapsed at `now`. Admins never expire.
    pub fn plan_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_admin && self.expiry_date.is_some_and(|exp| exp <= now)
    }

    /// Whole days left on the plan, if it has an end.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiry_date
            .map(|exp| (exp - now).num_days().max(0))
    }

    /// The public view of this user.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            is_admin: self.is_admin,
            is_active: self.is_active,
            expiry_date: self.expiry_date,
            website_permissions: self.website_permissions.clone(),
            login_count: self.login_count,
            last_login: self.last_login,
            created_at: self.created_at,
        }
    }
}

/// The fields needed to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub expiry_date: Option<DateTime<Utc>>,
    pub website_permissions: Vec<WebsitePermission>,
}

/// A partial admin update of a user's account flags.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
    /// `Some(None)` clears the expiry.
    pub expiry_date: Option<Option<DateTime<Utc>>>,
}

/// The user as exposed over the API; never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub expiry_date: Option<DateTime<Utc>>,
    pub website_permissions: Vec<WebsitePermission>,
    pub login_count: i32,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate user counts for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_users: i64,
    pub active_users: i64,
    pub admin_users: i64,
    pub expired_users: i64,
    pub total_logins: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_password_hash() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            password: "$argon2id$v=19$secret-hash".into(),
            is_admin: false,
            is_active: true,
            expiry_date: None,
            website_permissions: vec![],
            login_count: 0,
            last_login: None,
            token_version: 0,
            current_session_id: None,
            created_at: now,
            updated_at: now,
        };
        let rendered = format!("{:?}", user);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("secret-hash"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
