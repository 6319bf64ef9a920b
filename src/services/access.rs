//! The website permission gate and plan checks.
//!
//! The gate compares the normalized website against each grant with exact
//! equality. It deliberately does not do the subdomain matching the cookie
//! matcher does: a grant for `chatgpt.com` does not open `chat.chatgpt.com`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    cookies::normalize_domain,
    error::{AccessReason, AppError, Result},
    models::user::User,
    state::AppState,
};

/// The outcome of evaluating a user against a website.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Admins pass without a grant.
    Admin,
    /// A live grant matched.
    Granted,
    /// No live grant matched.
    Denied(AccessReason),
}

/// Evaluates `user` against `website` at `now` without side effects.
pub fn evaluate_access(user: &User, website: &str, now: DateTime<Utc>) -> AccessDecision {
    if user.is_admin {
        return AccessDecision::Admin;
    }

    let target = normalize_domain(website);
    match user
        .website_permissions
        .iter()
        .find(|permission| permission.website == target)
    {
        None => AccessDecision::Denied(AccessReason::NoPermission),
        Some(permission) if permission.is_live(now) => AccessDecision::Granted,
        Some(_) => AccessDecision::Denied(AccessReason::WebsiteAccessExpired),
    }
}

/// Whether `user` may use `website` at `now`.
pub fn has_access(user: &User, website: &str, now: DateTime<Utc>) -> bool {
    !matches!(evaluate_access(user, website, now), AccessDecision::Denied(_))
}

/// Whether `user` holds at least one live grant.
pub fn has_active_permissions(user: &User, now: DateTime<Utc>) -> bool {
    user.website_permissions.iter().any(|p| p.is_live(now))
}

fn denial(reason: AccessReason, website: &str) -> AppError {
    let message = match reason {
        AccessReason::NoPermission => format!("You do not have access to {}", website),
        AccessReason::WebsiteAccessExpired => format!("Your access to {} has expired", website),
        _ => format!("Access to {} denied", website),
    };
    AppError::forbidden(reason, message)
}

/// Gates `user` on `website` and records the access when granted.
///
/// The grant check and the `lastAccessed`/`accessCount` update happen in one
/// repository call, so a grant revoked or expiring in between is refused.
pub async fn authorize_website(state: &AppState, user: &User, website: &str) -> Result<()> {
    let now = Utc::now();
    let target = normalize_domain(website);

    match evaluate_access(user, &target, now) {
        AccessDecision::Admin => Ok(()),
        AccessDecision::Denied(reason) => Err(denial(reason, &target)),
        AccessDecision::Granted => {
            match state.users.record_access(user.id, &target, now).await? {
                Some(permission) => {
                    tracing::debug!(
                        user_id = %user.id,
                        website = %target,
                        access_count = permission.access_count,
                        "website access recorded"
                    );
                    Ok(())
                }
                None => Err(denial(AccessReason::WebsiteAccessExpired, &target)),
            }
        }
    }
}

/// Refuses deactivated users and users whose plan has lapsed.
///
/// A lapsed plan bumps the user's token version first, so every session
/// the user holds anywhere stops working.
pub async fn enforce_account_standing(state: &AppState, user: &User) -> Result<()> {
    if !user.is_active {
        return Err(AppError::forbidden(
            AccessReason::AccountDeactivated,
            "Your account has been deactivated",
        ));
    }

    if user.plan_expired(Utc::now()) {
        let version = state.users.bump_token_version(user.id).await?;
        tracing::info!(user_id = %user.id, token_version = version, "plan expired; sessions invalidated");
        return Err(AppError::forbidden(
            AccessReason::PlanExpired,
            "Your plan has expired",
        ));
    }

    Ok(())
}

/// The answer to a successful plan check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReport {
    pub valid: bool,
    pub is_admin: bool,
    pub expiry_date: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub active_websites: Vec<String>,
}

/// Checks the user's standing, optionally for one website.
pub async fn check_plan(state: &AppState, user: &User, website: Option<&str>) -> Result<PlanReport> {
    enforce_account_standing(state, user).await?;

    let now = Utc::now();
    if !user.is_admin && !has_active_permissions(user, now) {
        return Err(AppError::forbidden(
            AccessReason::NoActivePermissions,
            "You have no active website permissions",
        ));
    }

    if let Some(website) = website {
        if let AccessDecision::Denied(reason) = evaluate_access(user, website, now) {
            let target = normalize_domain(website);
            let reason = match reason {
                AccessReason::NoPermission => AccessReason::WebsiteAccessExpired,
                other => other,
            };
            return Err(denial(reason, &target));
        }
    }

    Ok(PlanReport {
        valid: true,
        is_admin: user.is_admin,
        expiry_date: user.expiry_date,
        days_remaining: user.days_remaining(now),
        active_websites: user
            .website_permissions
            .iter()
            .filter(|p| p.is_live(now))
            .map(|p| p.website.clone())
            .collect(),
    })
}
