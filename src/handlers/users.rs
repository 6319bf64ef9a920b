use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use crate::{
    error::Result,
    middleware_layer::auth::AuthUser,
    services::{
        auth::{self as auth_service, CreateUserInput, PermissionGrant},
        users::{self as users_service, AccountChange},
    },
    state::AppState,
    validation::auth::{password_rule, username_rule},
};

/// Distinguishes an absent field from an explicit `null`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn default_true() -> bool {
    true
}

/// One website grant in a request body.
#[derive(Deserialize, Validate, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    #[garde(length(min = 1, max = 2048))]
    pub website: String,
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub has_access: bool,
    #[serde(default)]
    #[garde(skip)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<GrantRequest> for PermissionGrant {
    fn from(request: GrantRequest) -> Self {
        PermissionGrant {
            website: request.website,
            has_access: request.has_access,
            expires_at: request.expires_at,
        }
    }
}

/// The request payload for creating a user as an admin.
#[derive(Deserialize, Validate, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[garde(custom(username_rule))]
    pub username: String,
    #[garde(custom(password_rule))]
    pub password: String,
    #[serde(default)]
    #[garde(skip)]
    pub is_admin: bool,
    #[serde(default)]
    #[garde(skip)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    #[garde(dive)]
    pub websites: Vec<GrantRequest>,
}

impl From<CreateUserRequest> for CreateUserInput {
    fn from(request: CreateUserRequest) -> Self {
        CreateUserInput {
            username: request.username,
            password: request.password,
            is_admin: request.is_admin,
            expiry_date: request.expiry_date,
            websites: request.websites.into_iter().map(PermissionGrant::from).collect(),
        }
    }
}

/// The request payload for an account update.
#[derive(Deserialize, Validate, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(default)]
    #[garde(skip)]
    pub is_active: Option<bool>,
    #[serde(default)]
    #[garde(skip)]
    pub is_admin: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    #[garde(skip)]
    pub expiry_date: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    #[garde(range(min = 1, max = 3650))]
    pub extend_days: Option<i64>,
}

/// The request payload for replacing a user's permissions.
#[derive(Deserialize, Validate, Debug)]
pub struct ReplacePermissionsRequest {
    #[garde(dive)]
    pub permissions: Vec<GrantRequest>,
}

/// Creates a user; admin only.
#[axum::debug_handler]
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    tracing::info!("📝 Admin creating user: {}", payload.username);

    let user = auth_service::create_user(&state, payload.into()).await?;
    Ok((StatusCode::CREATED, Json(user.profile())))
}

#[axum::debug_handler]
pub async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(users_service::list_users(&state).await?))
}

#[axum::debug_handler]
pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(users_service::stats(&state).await?))
}

#[axum::debug_handler]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(users_service::get_user(&state, id).await?))
}

/// Updates account flags, plan expiry, or extends the plan.
#[axum::debug_handler]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let profile = users_service::update_account(
        &state,
        id,
        AccountChange {
            is_active: payload.is_active,
            is_admin: payload.is_admin,
            expiry_date: payload.expiry_date,
            extend_days: payload.extend_days,
        },
    )
    .await?;
    Ok(Json(profile))
}

/// "Deletes" a user by deactivating the account.
#[axum::debug_handler]
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let profile = users_service::deactivate(&state, &auth.user, id).await?;
    tracing::info!("🗑️ User {} deactivated by {}", id, auth.user.id);
    Ok(Json(profile))
}

#[axum::debug_handler]
pub async fn replace_permissions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReplacePermissionsRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let grants = payload.permissions.into_iter().map(PermissionGrant::from).collect();
    Ok(Json(users_service::replace_permissions(&state, id, grants).await?))
}

#[axum::debug_handler]
pub async fn grant_permission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<GrantRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    Ok(Json(users_service::grant_permission(&state, id, payload.into()).await?))
}

#[axum::debug_handler]
pub async fn revoke_permission(
    State(state): State<AppState>,
    Path((id, website)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse> {
    Ok(Json(users_service::revoke_permission(&state, id, &website).await?))
}

/// The caller's own permissions.
#[axum::debug_handler]
pub async fn my_permissions(Extension(auth): Extension<AuthUser>) -> Result<impl IntoResponse> {
    Ok(Json(users_service::my_permissions(&auth.user)))
}
