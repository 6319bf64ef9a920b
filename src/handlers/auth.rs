use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};

use crate::{
    error::{AppError, Result},
    middleware_layer::auth::{AuthUser, SESSION_COOKIE},
    models::user::UserProfile,
    services::{access, auth as auth_service},
    state::AppState,
    validation::auth::{password_rule, username_rule},
};

/// The request payload for self-registration.
#[derive(Deserialize, Validate, Debug)]
pub struct RegisterRequest {
    #[garde(custom(username_rule))]
    pub username: String,
    #[garde(custom(password_rule))]
    pub password: String,
}

/// The request payload for user login.
#[derive(Deserialize, Validate, Debug)]
pub struct LoginRequest {
    #[garde(length(min = 1, max = 255))]
    pub username: String,
    #[garde(length(min = 1, max = 128))]
    pub password: String,
}

/// The optional request payload for a plan check.
#[derive(Deserialize, Debug, Default)]
pub struct CheckPlanRequest {
    #[serde(default)]
    pub website: Option<String>,
}

/// The response payload for requests that issue a session.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

/// The response payload for authentication-related requests.
#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

/// The response payload for a session check.
#[derive(Serialize)]
pub struct ValidateSessionResponse {
    pub valid: bool,
    pub user: UserProfile,
}

/// Creates a secure cookie with the given name, value, and max age.
fn create_secure_cookie(name: &'static str, value: String, max_age_days: i64, production: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);

    cookie.set_http_only(true);

    if production {
        cookie.set_secure(true);
    }

    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    let duration_secs = max_age_days * 86400;
    cookie.set_max_age(Duration::seconds(duration_secs));
    cookie.set_path("/");

    cookie
}

fn set_session_cookie(state: &AppState, cookies: &Cookies, token: &str) {
    cookies.add(create_secure_cookie(
        SESSION_COOKIE,
        token.to_string(),
        state.config.session_duration_days,
        state.config.production,
    ));
}

/// Handles self-registration; new accounts start without website access.
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    tracing::info!("📝 Register attempt: {}", payload.username);
    payload.validate()?;

    let user = auth_service::create_user(
        &state,
        auth_service::CreateUserInput {
            username: payload.username,
            password: payload.password,
            ..Default::default()
        },
    )
    .await?;

    tracing::info!("✅ User registered: {}", user.id);
    Ok((StatusCode::CREATED, Json(user.profile())))
}

/// Handles user login.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    tracing::info!("🔑 Login attempt: {}", payload.username);
    payload.validate()?;

    let user = auth_service::authenticate_user(&state, &payload.username, &payload.password).await?;
    let issued = auth_service::issue_session(&state, &user).await?;
    set_session_cookie(&state, &cookies, &issued.token);

    let user = state
        .users
        .find_by_id(user.id)
        .await?
        .ok_or(AppError::NotFound)?;

    tracing::info!("✅ User logged in: {}", user.id);
    Ok(Json(SessionResponse {
        success: true,
        token: issued.token,
        expires_at: issued.session.expires_at,
        user: user.profile(),
    }))
}

/// Swaps the caller's token for a fresh one.
#[axum::debug_handler]
pub async fn refresh(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    cookies: Cookies,
) -> Result<impl IntoResponse> {
    let issued = auth_service::refresh_session(&state, &auth.user, &auth.token).await?;
    set_session_cookie(&state, &cookies, &issued.token);

    Ok(Json(SessionResponse {
        success: true,
        token: issued.token,
        expires_at: issued.session.expires_at,
        user: auth.user.profile(),
    }))
}

/// Handles user logout.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    cookies: Cookies,
) -> Result<impl IntoResponse> {
    tracing::info!("👋 Logout for user: {}", auth.user.id);

    auth_service::end_session(&state, &auth.user, &auth.token).await?;

    let mut session_cookie = Cookie::new(SESSION_COOKIE, "");
    session_cookie.set_max_age(Duration::seconds(0));
    session_cookie.set_path("/");
    cookies.remove(session_cookie);

    Ok(Json(AuthResponse {
        success: true,
        message: "Logout successful".to_string(),
    }))
}

/// Checks the plan and, when a website is given, the grant for it.
///
/// The body is optional; an empty body checks the plan alone.
#[axum::debug_handler]
pub async fn check_plan(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let request: CheckPlanRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CheckPlanRequest::default()
    } else {
        sonic_rs::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e)))?
    };

    let report = access::check_plan(&state, &auth.user, request.website.as_deref()).await?;
    Ok(Json(report))
}

#[axum::debug_handler]
pub async fn validate_session(Extension(auth): Extension<AuthUser>) -> Result<impl IntoResponse> {
    Ok(Json(ValidateSessionResponse {
        valid: true,
        user: auth.user.profile(),
    }))
}

#[axum::debug_handler]
pub async fn me(Extension(auth): Extension<AuthUser>) -> Result<impl IntoResponse> {
    Ok(Json(auth.user.profile()))
}
