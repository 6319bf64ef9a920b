use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Serialize;

use crate::{
    error::Result,
    middleware_layer::auth::AuthUser,
    services::cookies as cookie_service,
    state::AppState,
};

#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub website: String,
}

#[axum::debug_handler]
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(cookie_service::list_website_bundles(&state).await?))
}

/// The current bundle for a website, gated on the caller's grant.
#[axum::debug_handler]
pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(website): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(cookie_service::website_bundle(&state, &auth.user, &website).await?))
}

#[axum::debug_handler]
pub async fn history(
    State(state): State<AppState>,
    Path(website): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(cookie_service::website_history(&state, &website).await?))
}

#[axum::debug_handler]
pub async fn delete(
    State(state): State<AppState>,
    Path(website): Path<String>,
) -> Result<impl IntoResponse> {
    cookie_service::delete_website_bundle(&state, &website).await?;
    Ok(Json(DeleteResponse {
        success: true,
        website,
    }))
}
