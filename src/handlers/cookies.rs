use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::Result,
    middleware_layer::auth::AuthUser,
    models::cookie::{CookieBundleSummary, CookieRecord},
    services::cookies as cookie_service,
    state::AppState,
};

/// The request payload for a flat bundle upload.
#[derive(Deserialize, Validate, Debug)]
pub struct UploadCookiesRequest {
    #[garde(length(min = 1))]
    pub cookies: Vec<CookieRecord>,
}

/// The request payload for a website bundle upload.
#[derive(Deserialize, Validate, Debug)]
pub struct WebsiteUploadRequest {
    #[garde(length(min = 1, max = 2048))]
    pub website: String,
    #[garde(length(min = 1))]
    pub cookies: Vec<CookieRecord>,
}

#[derive(Deserialize, Debug)]
pub struct WebsiteQuery {
    pub website: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub bundle: CookieBundleSummary,
}

/// Stores a flat cookie bundle; admin only.
#[axum::debug_handler]
pub async fn upload(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<UploadCookiesRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let bundle = cookie_service::upload_bundle(&state, &auth.user, payload.cookies).await?;
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            success: true,
            bundle: CookieBundleSummary::from(&bundle),
        }),
    ))
}

/// Imports a raw persisted cookie file; admin only.
///
/// Malformed entries are skipped and reported back as warnings.
#[axum::debug_handler]
pub async fn insert(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    body: String,
) -> Result<impl IntoResponse> {
    let report = cookie_service::import_cookie_file(&state, &auth.user, &body).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// Creates or versions a website bundle; admin only.
#[axum::debug_handler]
pub async fn website_upload(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<WebsiteUploadRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let bundle =
        cookie_service::upload_website_bundle(&state, &auth.user, &payload.website, payload.cookies).await?;
    Ok((StatusCode::CREATED, Json(bundle)))
}

#[axum::debug_handler]
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(cookie_service::list_bundles(&state).await?))
}

/// The cookies the caller may use on `?website=`.
#[axum::debug_handler]
pub async fn get_for_website(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<WebsiteQuery>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        cookie_service::cookies_for_website(&state, &auth.user, &query.website).await?,
    ))
}

#[axum::debug_handler]
pub async fn get_bundle(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    Ok(Json(cookie_service::find_bundle(&state, id).await?))
}
