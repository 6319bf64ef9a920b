//! Writes stored cookie records into a [`CookieStore`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::{AppliedCookie, CookieStore, SetCookieDetails, StoreError};
use crate::cookies::normalize_domain;
use crate::models::cookie::{CookieRecord, Expiry, parse_expiry_text};

/// The site cookies go to when neither the caller nor the cookie names one.
const DEFAULT_SITE: &str = "chatgpt.com";

/// Cookie domains that are addressed through their own host.
const SESSION_DOMAINS: &[&str] = &["openai.com", "chatgpt.com"];

/// How far out an unreadable expiry is pushed.
const FALLBACK_LIFETIME_DAYS: i64 = 365;

/// Why a single cookie could not be applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApplyError {
    /// Host permission was refused for the origin.
    #[error("host permission denied for {0}")]
    PermissionDenied(String),

    /// The store raised an error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The store accepted the call but holds no cookie afterwards.
    #[error("cookie store did not keep the cookie")]
    NotSet,
}

/// One failed cookie in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchError {
    pub name: String,
    pub domain: String,
    pub error: String,
}

/// The outcome of [`CookieApplier::apply_batch`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// `true` only when no cookie failed.
    pub success: bool,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<BatchError>,
}

/// Resolves a record's expiry to epoch seconds.
///
/// A numeric value passes through, a readable date string is converted, an
/// unreadable one becomes `now` plus a year, and an absent one stays absent.
pub fn resolve_expiration(cookie: &CookieRecord, now: DateTime<Utc>) -> Option<f64> {
    if let Some(seconds) = cookie.expiration_date {
        return Some(seconds);
    }
    match &cookie.expiry {
        None => None,
        Some(Expiry::Epoch(seconds)) => Some(*seconds),
        Some(Expiry::Text(text)) => Some(
            parse_expiry_text(text)
                .unwrap_or_else(|| now + Duration::days(FALLBACK_LIFETIME_DAYS))
                .timestamp() as f64,
        ),
    }
}

fn cookie_path(cookie: &CookieRecord) -> String {
    if cookie.path.starts_with('/') {
        cookie.path.clone()
    } else {
        format!("/{}", cookie.path)
    }
}

/// Translates a stored record into the store's set call.
pub fn build_details(cookie: &CookieRecord, target: Option<&str>, now: DateTime<Utc>) -> SetCookieDetails {
    let target = target.map(normalize_domain).filter(|t| !t.is_empty());
    let cookie_host = cookie.domain.trim().trim_start_matches('.').to_ascii_lowercase();
    let host_prefixed = cookie.name.starts_with("__Host-");

    let path = if host_prefixed {
        "/".to_string()
    } else {
        cookie_path(cookie)
    };

    let url_host = match &target {
        Some(target) => target.clone(),
        None if SESSION_DOMAINS.iter().any(|d| cookie_host.contains(d)) => cookie_host.clone(),
        None => DEFAULT_SITE.to_string(),
    };

    let domain = if host_prefixed {
        None
    } else {
        target.clone().or_else(|| (!cookie_host.is_empty()).then(|| cookie_host.clone()))
    };

    SetCookieDetails {
        url: format!("https://{}{}", url_host, path),
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain,
        path,
        secure: cookie.secure != Some(false),
        http_only: cookie.http_only != Some(false),
        same_site: cookie.same_site.unwrap_or_default(),
        expiration_date: resolve_expiration(cookie, now),
    }
}

/// Applies cookie records to a store, asking for host permission once per host.
pub struct CookieApplier {
    store: Arc<dyn CookieStore>,
    granted: Mutex<HashSet<String>>,
}

impl CookieApplier {
    pub fn new(store: Arc<dyn CookieStore>) -> Self {
        Self {
            store,
            granted: Mutex::default(),
        }
    }

    /// The store this applier writes to.
    pub fn store(&self) -> &Arc<dyn CookieStore> {
        &self.store
    }

    async fn ensure_permission(&self, url: &str) -> Result<(), ApplyError> {
        let host = normalize_domain(url);
        let mut granted = self.granted.lock().await;
        if granted.contains(&host) {
            return Ok(());
        }

        let origin = format!("https://*.{}/*", host);
        if !self.store.request_host_permission(&origin).await? {
            warn!(origin = %origin, "host permission refused");
            return Err(ApplyError::PermissionDenied(origin));
        }
        debug!(origin = %origin, "host permission granted");
        granted.insert(host);
        Ok(())
    }

    /// Writes one cookie, optionally scoped to `target`.
    pub async fn apply(&self, cookie: &CookieRecord, target: Option<&str>) -> Result<AppliedCookie, ApplyError> {
        let details = build_details(cookie, target, Utc::now());
        self.ensure_permission(&details.url).await?;

        debug!(name = %details.name, url = %details.url, "setting cookie");
        self.store.set(details).await?.ok_or(ApplyError::NotSet)
    }

    /// Writes every cookie in order; a failure is recorded and the rest still run.
    pub async fn apply_batch(&self, cookies: &[CookieRecord], target: Option<&str>) -> BatchReport {
        let mut success_count = 0;
        let mut errors = Vec::new();

        for cookie in cookies {
            match self.apply(cookie, target).await {
                Ok(_) => success_count += 1,
                Err(e) => {
                    warn!(name = %cookie.name, domain = %cookie.domain, error = %e, "cookie not applied");
                    errors.push(BatchError {
                        name: cookie.name.clone(),
                        domain: cookie.domain.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let report = BatchReport {
            success: errors.is_empty(),
            success_count,
            error_count: errors.len(),
            errors,
        };
        info!(
            success_count = report.success_count,
            error_count = report.error_count,
            "cookie batch applied"
        );
        report
    }
}
