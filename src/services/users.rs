//! Admin account management.
//!
//! Any change that takes access away (deactivation, a plan moved into the
//! past, a lost admin flag, a revoked or switched-off grant) bumps the user's
//! token version so the sessions they already hold stop working.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::user::{AccountUpdate, User, UserProfile, UserStats, WebsitePermission},
    services::auth::PermissionGrant,
    state::AppState,
    validation::cookies::validate_website,
};

/// An admin's requested account change.
#[derive(Debug, Clone, Default)]
pub struct AccountChange {
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
    /// `Some(None)` clears the plan expiry.
    pub expiry_date: Option<Option<DateTime<Utc>>>,
    /// Pushes the plan out by this many days, counted from the later of now
    /// and the current expiry. Applied after `expiry_date`.
    pub extend_days: Option<i64>,
}

/// A grant as shown to its owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionView {
    #[serde(flatten)]
    pub permission: WebsitePermission,
    pub active: bool,
}

async fn load(state: &AppState, id: Uuid) -> Result<User> {
    state.users.find_by_id(id).await?.ok_or(AppError::NotFound)
}

async fn revoke_sessions(state: &AppState, id: Uuid, why: &str) -> Result<()> {
    let version = state.users.bump_token_version(id).await?;
    tracing::info!(user_id = %id, token_version = version, "🔒 Sessions revoked: {}", why);
    Ok(())
}

fn lost_live_grant(before: &[WebsitePermission], after: &[WebsitePermission], now: DateTime<Utc>) -> bool {
    before.iter().filter(|p| p.is_live(now)).any(|old| {
        !after
            .iter()
            .any(|new| new.website == old.website && new.is_live(now))
    })
}

pub async fn list_users(state: &AppState) -> Result<Vec<UserProfile>> {
    let users = state.users.list().await?;
    Ok(users.iter().map(User::profile).collect())
}

pub async fn stats(state: &AppState) -> Result<UserStats> {
    state.users.stats(Utc::now()).await
}

pub async fn get_user(state: &AppState, id: Uuid) -> Result<UserProfile> {
    Ok(load(state, id).await?.profile())
}

/// Applies an admin's account change.
pub async fn update_account(state: &AppState, id: Uuid, change: AccountChange) -> Result<UserProfile> {
    let now = Utc::now();
    let before = load(state, id).await?;

    if let Some(days) = change.extend_days {
        if days <= 0 {
            return Err(AppError::Validation("extendDays must be positive".to_string()));
        }
    }

    let mut expiry = change.expiry_date;
    if let Some(days) = change.extend_days {
        let current = expiry.unwrap_or(before.expiry_date);
        let base = current.filter(|exp| *exp > now).unwrap_or(now);
        expiry = Some(Some(base + Duration::days(days)));
    }

    let updated = state
        .users
        .update_account(
            id,
            AccountUpdate {
                is_active: change.is_active,
                is_admin: change.is_admin,
                expiry_date: expiry,
            },
        )
        .await?
        .ok_or(AppError::NotFound)?;

    if before.is_active && !updated.is_active {
        revoke_sessions(state, id, "account deactivated").await?;
    } else if before.is_admin && !updated.is_admin {
        revoke_sessions(state, id, "admin role removed").await?;
    } else if expiry.is_some() && updated.plan_expired(now) {
        revoke_sessions(state, id, "plan moved into the past").await?;
    }

    tracing::info!(user_id = %id, "✅ Account updated");
    get_user(state, id).await
}

/// Deactivates a user; accounts are never hard-deleted.
pub async fn deactivate(state: &AppState, acting: &User, id: Uuid) -> Result<UserProfile> {
    if acting.id == id {
        return Err(AppError::Validation(
            "You cannot deactivate your own account".to_string(),
        ));
    }

    update_account(
        state,
        id,
        AccountChange {
            is_active: Some(false),
            ..Default::default()
        },
    )
    .await
}

/// Replaces the user's whole permission list.
pub async fn replace_permissions(state: &AppState, id: Uuid, grants: Vec<PermissionGrant>) -> Result<UserProfile> {
    let now = Utc::now();
    let before = load(state, id).await?;

    let mut permissions: Vec<WebsitePermission> = Vec::with_capacity(grants.len());
    for grant in grants {
        let mut permission = grant.into_permission(now)?;
        if let Some(existing) = before
            .website_permissions
            .iter()
            .find(|p| p.website == permission.website)
        {
            permission.last_accessed = existing.last_accessed;
            permission.access_count = existing.access_count;
            permission.granted_at = existing.granted_at;
        }
        permissions.retain(|p| p.website != permission.website);
        permissions.push(permission);
    }

    let revoked = lost_live_grant(&before.website_permissions, &permissions, now);
    state.users.replace_permissions(id, permissions).await?;
    if revoked {
        revoke_sessions(state, id, "website permissions reduced").await?;
    }

    tracing::info!(user_id = %id, "✅ Permissions replaced");
    get_user(state, id).await
}

/// Adds or updates one grant.
pub async fn grant_permission(state: &AppState, id: Uuid, grant: PermissionGrant) -> Result<UserProfile> {
    let now = Utc::now();
    let before = load(state, id).await?;
    let mut permission = grant.into_permission(now)?;

    if let Some(existing) = before
        .website_permissions
        .iter()
        .find(|p| p.website == permission.website)
    {
        permission.last_accessed = existing.last_accessed;
        permission.access_count = existing.access_count;
        permission.granted_at = existing.granted_at;
    }

    let revoked = lost_live_grant(
        &before.website_permissions,
        &before
            .website_permissions
            .iter()
            .filter(|p| p.website != permission.website)
            .cloned()
            .chain(std::iter::once(permission.clone()))
            .collect::<Vec<_>>(),
        now,
    );

    let website = permission.website.clone();
    state.users.upsert_permission(id, permission).await?;
    if revoked {
        revoke_sessions(state, id, "website permission switched off").await?;
    }

    tracing::info!(user_id = %id, website = %website, "✅ Permission granted");
    get_user(state, id).await
}

/// Removes one grant.
pub async fn revoke_permission(state: &AppState, id: Uuid, website: &str) -> Result<UserProfile> {
    let website = validate_website(website)?;
    load(state, id).await?;

    if !state.users.remove_permission(id, &website).await? {
        return Err(AppError::NotFound);
    }
    revoke_sessions(state, id, "website permission revoked").await?;

    tracing::info!(user_id = %id, website = %website, "✅ Permission revoked");
    get_user(state, id).await
}

/// The caller's own grants, flagged with whether each is usable now.
pub fn my_permissions(user: &User) -> Vec<PermissionView> {
    let now = Utc::now();
    user.website_permissions
        .iter()
        .map(|permission| PermissionView {
            active: user.is_admin || permission.is_live(now),
            permission: permission.clone(),
        })
        .collect()
}
