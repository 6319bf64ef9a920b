use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    cookies::{CookieFileError, match_cookies, parse_cookie_file},
    error::{AppError, Result},
    models::{
        cookie::{CookieBundle, CookieBundleSummary, CookieRecord, CookieVersion, WebsiteCookieBundle},
        user::User,
    },
    services::access,
    state::AppState,
    validation::cookies::{validate_cookies, validate_website},
};

/// How many flat bundles the admin listing returns.
const BUNDLE_LIST_LIMIT: i64 = 50;

/// The result of importing a persisted cookie file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub bundle: CookieBundleSummary,
    /// Skipped entries as `(index, reason)`.
    pub warnings: Vec<(usize, String)>,
}

/// The cookies served for one website.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedCookies {
    pub website: String,
    pub cookies: Vec<CookieRecord>,
    pub count: usize,
}

/// A website bundle's retained history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleHistory {
    pub website: String,
    pub current_version: i32,
    pub previous_versions: Vec<CookieVersion>,
}

fn prepare(cookies: Vec<CookieRecord>) -> Result<Vec<CookieRecord>> {
    let cookies: Vec<CookieRecord> = cookies.into_iter().map(CookieRecord::normalized).collect();
    validate_cookies(&cookies)?;
    Ok(cookies)
}

/// Stores a flat bundle uploaded by an admin.
pub async fn upload_bundle(state: &AppState, uploader: &User, cookies: Vec<CookieRecord>) -> Result<CookieBundle> {
    let cookies = prepare(cookies)?;
    let bundle = state.cookies.insert_bundle(uploader.id, cookies).await?;
    tracing::info!(
        bundle_id = %bundle.id,
        uploaded_by = %uploader.id,
        count = bundle.cookies.len(),
        "🍪 Cookie bundle stored"
    );
    Ok(bundle)
}

/// Imports a raw persisted cookie file as a new flat bundle.
pub async fn import_cookie_file(state: &AppState, uploader: &User, raw: &str) -> Result<ImportReport> {
    let parsed = parse_cookie_file(raw).map_err(|e: CookieFileError| AppError::Validation(e.to_string()))?;

    let bundle = upload_bundle(state, uploader, parsed.cookies).await?;
    if !parsed.warnings.is_empty() {
        tracing::warn!(
            bundle_id = %bundle.id,
            skipped = parsed.warnings.len(),
            "Cookie file imported with skipped entries"
        );
    }

    Ok(ImportReport {
        bundle: CookieBundleSummary::from(&bundle),
        warnings: parsed.warnings,
    })
}

/// Creates or versions the bundle for `website`.
pub async fn upload_website_bundle(
    state: &AppState,
    uploader: &User,
    website: &str,
    cookies: Vec<CookieRecord>,
) -> Result<WebsiteCookieBundle> {
    let website = validate_website(website)?;
    let cookies = prepare(cookies)?;
    let bundle = state
        .cookies
        .save_website_bundle(&website, cookies, uploader.id, Utc::now())
        .await?;

    tracing::info!(
        website = %bundle.website,
        version = bundle.version,
        retained = bundle.previous_versions.len(),
        "🍪 Website cookie bundle saved"
    );
    Ok(bundle)
}

/// Returns the cookies `user` may use on `website`.
///
/// The website's own bundle comes first; cookies matched out of the latest
/// flat bundle are added unless a cookie with the same name, domain and path
/// is already present.
pub async fn cookies_for_website(state: &AppState, user: &User, website: &str) -> Result<MatchedCookies> {
    let website = validate_website(website)?;
    access::authorize_website(state, user, &website).await?;

    let mut cookies = match state.cookies.find_website_bundle(&website).await? {
        Some(bundle) => bundle.cookies,
        None => Vec::new(),
    };

    if let Some(latest) = state.cookies.latest_bundle().await? {
        for cookie in match_cookies(&latest.cookies, &website) {
            let duplicate = cookies.iter().any(|c| {
                c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path
            });
            if !duplicate {
                cookies.push(cookie);
            }
        }
    }

    if cookies.is_empty() {
        tracing::debug!(website = %website, "No cookies stored for website");
        return Err(AppError::NotFound);
    }

    tracing::info!(user_id = %user.id, website = %website, count = cookies.len(), "🍪 Cookies served");
    Ok(MatchedCookies {
        website,
        count: cookies.len(),
        cookies,
    })
}

/// The current bundle stored for `website`, gated like any other read.
pub async fn website_bundle(state: &AppState, user: &User, website: &str) -> Result<WebsiteCookieBundle> {
    let website = validate_website(website)?;
    access::authorize_website(state, user, &website).await?;
    state
        .cookies
        .find_website_bundle(&website)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn website_history(state: &AppState, website: &str) -> Result<BundleHistory> {
    let website = validate_website(website)?;
    let bundle = state
        .cookies
        .find_website_bundle(&website)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(BundleHistory {
        website: bundle.website,
        current_version: bundle.version,
        previous_versions: bundle.previous_versions,
    })
}

pub async fn list_website_bundles(state: &AppState) -> Result<Vec<WebsiteCookieBundle>> {
    state.cookies.list_website_bundles().await
}

pub async fn delete_website_bundle(state: &AppState, website: &str) -> Result<()> {
    let website = validate_website(website)?;
    if !state.cookies.delete_website_bundle(&website).await? {
        return Err(AppError::NotFound);
    }
    tracing::info!(website = %website, "🗑️ Website cookie bundle deleted");
    Ok(())
}

pub async fn list_bundles(state: &AppState) -> Result<Vec<CookieBundleSummary>> {
    let bundles = state.cookies.list_bundles(BUNDLE_LIST_LIMIT).await?;
    Ok(bundles.iter().map(CookieBundleSummary::from).collect())
}

pub async fn find_bundle(state: &AppState, id: Uuid) -> Result<CookieBundle> {
    state.cookies.find_bundle(id).await?.ok_or(AppError::NotFound)
}
