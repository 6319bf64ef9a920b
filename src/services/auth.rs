use argon2::{
    Argon2, ParamsBuilder,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::config::AdminSeed;
use crate::crypto::token::generate_session_token;
use crate::error::{AppError, Result};
use crate::models::session::Session;
use crate::models::user::{NewUser, User, WebsitePermission};
use crate::services::access;
use crate::state::AppState;

/// The memory cost for Argon2 in MB.
const ARGON2_MEMORY_MB: u32 = 19;
/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 3;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 1;

/// Hashes a password using Argon2id.
///
/// # Arguments
///
/// * `password` - The password to hash.
///
/// # Returns
///
/// A `Result` containing the hashed password.
pub fn hash_password(password: &str) -> Result<String> {
    let mut password_bytes = password.as_bytes().to_vec();

    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);

    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(format!("Salt encoding error: {}", e)))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        ParamsBuilder::new()
            .m_cost(ARGON2_MEMORY_MB * 1024)
            .t_cost(ARGON2_ITERATIONS)
            .p_cost(ARGON2_PARALLELISM)
            .build()
            .map_err(|e| AppError::Internal(format!("Argon2 params: {}", e)))?,
    );

    let password_hash = argon2
        .hash_password(&password_bytes, &salt)
        .map_err(|e| AppError::Internal(format!("Argon2 hash error: {}", e)))?
        .to_string();

    password_bytes.zeroize();
    tracing::debug!("Password hashed successfully with Argon2");
    Ok(password_hash)
}

/// Verifies a password against a hash.
///
/// # Arguments
///
/// * `password` - The password to verify.
/// * `hash` - The hash to verify against.
///
/// # Returns
///
/// A `Result` containing `true` if the password is valid, `false` otherwise.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let mut password_bytes = password.as_bytes().to_vec();
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Hash parse error: {}", e)))?;
    let result = Argon2::default()
        .verify_password(&password_bytes, &parsed_hash)
        .is_ok();

    password_bytes.zeroize();
    tracing::debug!("Password verification completed");
    Ok(result)
}

/// The input for creating a user.
#[derive(Debug, Clone, Default)]
pub struct CreateUserInput {
    pub username: String,
    pub password: String,
    pub is_admin: bool,
    pub expiry_date: Option<DateTime<Utc>>,
    pub websites: Vec<PermissionGrant>,
}

/// A website grant as requested by an admin; `website` is normalized on save.
#[derive(Debug, Clone)]
pub struct PermissionGrant {
    pub website: String,
    pub has_access: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionGrant {
    /// Builds the stored permission, normalizing the website.
    pub fn into_permission(self, now: DateTime<Utc>) -> Result<WebsitePermission> {
        let website = crate::validation::cookies::validate_website(&self.website)?;
        Ok(WebsitePermission::new(website, self.has_access, self.expires_at, now))
    }
}

/// A freshly issued bearer session.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// The bearer token handed to the client.
    pub token: String,
    /// The stored session record.
    pub session: Session,
}

/// Creates a new user.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `input` - The new user's credentials, role, plan and grants.
///
/// # Returns
///
/// A `Result` containing the created `User`.
pub async fn create_user(state: &AppState, input: CreateUserInput) -> Result<User> {
    tracing::debug!("🔐 Creating user: {}", input.username);
    let now = Utc::now();
    let password_hash = hash_password(&input.password)?;

    let mut permissions: Vec<WebsitePermission> = Vec::with_capacity(input.websites.len());
    for grant in input.websites {
        let permission = grant.into_permission(now)?;
        permissions.retain(|p| p.website != permission.website);
        permissions.push(permission);
    }

    let user = state
        .users
        .create(NewUser {
            username: input.username,
            password_hash,
            is_admin: input.is_admin,
            expiry_date: input.expiry_date,
            website_permissions: permissions,
        })
        .await?;

    tracing::info!("✅ User created with ID: {}", user.id);
    Ok(user)
}

/// Authenticates a user.
///
/// Deactivated accounts and lapsed plans are refused even with the right
/// password; a lapsed plan also invalidates every outstanding session.
///
/// # Returns
///
/// A `Result` containing the authenticated `User`.
pub async fn authenticate_user(state: &AppState, username: &str, password: &str) -> Result<User> {
    tracing::debug!("🔐 Authenticating user: {}", username);

    let user = state
        .users
        .find_by_username(username)
        .await?
        .ok_or_else(|| AppError::Authentication("Invalid username or password".to_string()))?;

    if !verify_password(password, &user.password)? {
        return Err(AppError::Authentication(
            "Invalid username or password".to_string(),
        ));
    }

    access::enforce_account_standing(state, &user).await?;

    tracing::info!("✅ User authenticated: {}", user.id);
    Ok(user)
}

async fn store_new_session(state: &AppState, user: &User, now: DateTime<Utc>) -> Result<IssuedSession> {
    let session = Session {
        session_id: Uuid::new_v4(),
        user_id: user.id,
        token_version: user.token_version,
        created_at: now,
        expires_at: now + chrono::Duration::days(state.config.session_duration_days),
    };
    let token = generate_session_token();
    let ttl = u64::try_from(state.config.session_duration_days * 86400).unwrap_or(86400);

    state.sessions.create(&token, &session, ttl).await?;
    Ok(IssuedSession { token, session })
}

/// Issues a new session for `user`, superseding any previous one.
pub async fn issue_session(state: &AppState, user: &User) -> Result<IssuedSession> {
    let now = Utc::now();
    let IssuedSession { token, session } = store_new_session(state, user, now).await?;
    state.users.record_login(user.id, session.session_id, now).await?;

    tracing::info!("✅ Session {} issued for user {}", session.session_id, user.id);
    Ok(IssuedSession { token, session })
}

/// Swaps `old_token` for a new session without counting a login.
pub async fn refresh_session(state: &AppState, user: &User, old_token: &str) -> Result<IssuedSession> {
    let now = Utc::now();
    let IssuedSession { token, session } = store_new_session(state, user, now).await?;
    state.users.set_current_session(user.id, Some(session.session_id)).await?;
    state.sessions.delete(old_token).await?;

    tracing::info!("🔄 Session refreshed for user {}", user.id);
    Ok(IssuedSession { token, session })
}

/// Ends the session behind `token`.
pub async fn end_session(state: &AppState, user: &User, token: &str) -> Result<()> {
    state.sessions.delete(token).await?;
    state.users.set_current_session(user.id, None).await?;
    tracing::info!("👋 Session ended for user {}", user.id);
    Ok(())
}

/// Makes sure the configured admin account exists and is an active admin.
pub async fn ensure_admin(state: &AppState, seed: &AdminSeed) -> Result<User> {
    if let Some(existing) = state.users.find_by_username(&seed.username).await? {
        if existing.is_admin && existing.is_active {
            tracing::info!("✅ Admin account '{}' present", seed.username);
            return Ok(existing);
        }
        let update = crate::models::user::AccountUpdate {
            is_active: Some(true),
            is_admin: Some(true),
            expiry_date: None,
        };
        tracing::warn!("Promoting '{}' back to an active admin", seed.username);
        return state
            .users
            .update_account(existing.id, update)
            .await?
            .ok_or(AppError::NotFound);
    }

    create_user(
        state,
        CreateUserInput {
            username: seed.username.clone(),
            password: seed.password.as_str().to_string(),
            is_admin: true,
            ..Default::default()
        },
    )
    .await
}
