use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;

use crate::{
    error::AppError,
    models::{session::Session, user::User},
    services::access,
    state::AppState,
};

/// The cookie carrying the bearer token for browser clients.
pub const SESSION_COOKIE: &str = "session_token";

/// The authenticated caller, inserted as a request extension.
#[derive(Clone, Debug)]
pub struct AuthUser {
    /// The user as loaded for this request.
    pub user: User,
    /// The session the token resolved to.
    pub session: Session,
    /// The raw bearer token, needed to refresh or end the session.
    pub token: String,
}

/// Extracts the bearer token from the `Authorization` header, falling back
/// to the session cookie.
///
/// # Arguments
///
/// * `request` - The incoming request.
/// * `cookies` - The request cookies.
///
/// # Returns
///
/// An `Option` containing the token if found.
fn extract_bearer_token(request: &Request<Body>, cookies: &Cookies) -> Option<String> {
    let from_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    from_header.or_else(|| {
        cookies
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// A middleware that requires a valid session to be present.
///
/// Rejects with 401 when the token is missing or unknown, when it was issued
/// under an older token version, or when a newer login superseded it. Account
/// standing is checked afterwards, so deactivated users and lapsed plans get
/// a 403 with a reason.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an `AppError`.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    tracing::debug!("🔐 Checking authentication...");

    let token = extract_bearer_token(&request, &cookies).ok_or_else(|| {
        tracing::warn!("❌ No bearer token found");
        AppError::Authentication("Authentication required".to_string())
    })?;

    let session = state.sessions.get(&token).await?.ok_or_else(|| {
        tracing::warn!("❌ Session not found or expired");
        AppError::Authentication("Invalid or expired session".to_string())
    })?;

    let user = state.users.find_by_id(session.user_id).await?.ok_or_else(|| {
        tracing::warn!("❌ Session points at a missing user: {}", session.user_id);
        AppError::Authentication("Invalid or expired session".to_string())
    })?;

    if session.token_version != user.token_version {
        tracing::warn!("❌ Stale token version for user: {}", user.id);
        state.sessions.delete(&token).await?;
        return Err(AppError::Authentication("Session has been revoked".to_string()));
    }

    if user.current_session_id != Some(session.session_id) {
        tracing::warn!("❌ Superseded session for user: {}", user.id);
        state.sessions.delete(&token).await?;
        return Err(AppError::Authentication(
            "Session ended by a newer login".to_string(),
        ));
    }

    access::enforce_account_standing(&state, &user).await?;

    tracing::debug!("✅ User authenticated: {}", user.id);

    request.extensions_mut().insert(AuthUser {
        user,
        session,
        token,
    });

    Ok(next.run(request).await)
}

/// A middleware that lets only admins through; runs after `require_auth`.
pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response, AppError> {
    let is_admin = request
        .extensions()
        .get::<AuthUser>()
        .is_some_and(|auth| auth.user.is_admin);

    if !is_admin {
        tracing::warn!("❌ Admin route refused");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}
