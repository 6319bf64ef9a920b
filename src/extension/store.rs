//! The browser cookie store capability and an in-process implementation.
//!
//! [`CookieStore`] mirrors what a browser extension can do with cookies:
//! ask for host permission, then set, read and remove cookies by URL.
//! [`JarCookieStore`] keeps cookies in memory under a [`HostPolicy`] and can
//! hand its contents to a `reqwest` client as a cookie jar.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::cookie::Jar;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::cookies::normalize_domain;
use crate::models::cookie::SameSite;

/// Errors raised by a cookie store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The extension holds no host permission for the URL.
    #[error("no host permission for {0}")]
    PermissionDenied(String),

    /// The URL could not be parsed or has no host.
    #[error("invalid cookie url: {0}")]
    InvalidUrl(String),

    /// The store refused the cookie.
    #[error("cookie rejected: {0}")]
    Rejected(String),
}

/// What the applier asks the store to write.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCookieDetails {
    pub url: String,
    pub name: String,
    pub value: String,
    /// `None` makes a host-only cookie.
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    /// Epoch seconds; `None` is a session cookie.
    pub expiration_date: Option<f64>,
}

impl fmt::Debug for SetCookieDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetCookieDetails")
            .field("url", &self.url)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("same_site", &self.same_site)
            .field("expiration_date", &self.expiration_date)
            .finish()
    }
}

/// A cookie as the store holds it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCookie {
    pub name: String,
    pub value: String,
    /// The bare host for host-only cookies, `.`-prefixed otherwise.
    pub domain: String,
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub expiration_date: Option<f64>,
}

impl AppliedCookie {
    /// The domain without the leading dot.
    pub fn host(&self) -> &str {
        self.domain.trim_start_matches('.')
    }

    /// Whether the cookie would be sent to `host` at `path`.
    fn applies_to(&self, host: &str, path: &str) -> bool {
        let domain_ok = if self.host_only {
            host == self.host()
        } else {
            is_same_or_subdomain(host, self.host())
        };
        domain_ok && path_matches(path, &self.path)
    }

    /// The URL a browser would use to address this cookie.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.host(), self.path)
    }
}

impl fmt::Debug for AppliedCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppliedCookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("host_only", &self.host_only)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("same_site", &self.same_site)
            .field("expiration_date", &self.expiration_date)
            .finish()
    }
}

/// The browser cookie API, injected so the applier can run anywhere.
#[async_trait]
pub trait CookieStore: Send + Sync {
    /// Asks for permission on an origin pattern such as `https://*.example.com/*`.
    async fn request_host_permission(&self, origin: &str) -> Result<bool, StoreError>;

    /// Writes a cookie; `Ok(None)` means the store accepted the call but
    /// holds no cookie afterwards.
    async fn set(&self, details: SetCookieDetails) -> Result<Option<AppliedCookie>, StoreError>;

    /// The cookie named `name` that would be sent to `url`.
    async fn get(&self, url: &str, name: &str) -> Result<Option<AppliedCookie>, StoreError>;

    /// Every cookie whose domain is `domain` or one of its subdomains.
    async fn get_all(&self, domain: &str) -> Result<Vec<AppliedCookie>, StoreError>;

    /// Removes the cookie named `name` for `url`; returns whether one existed.
    async fn remove(&self, url: &str, name: &str) -> Result<bool, StoreError>;
}

/// Which hosts a [`JarCookieStore`] grants permission for.
#[derive(Debug, Clone, Default)]
pub enum HostPolicy {
    /// Every permission request succeeds.
    #[default]
    AllowAll,
    /// Every permission request fails.
    DenyAll,
    /// Requests succeed for these hosts and their subdomains.
    Allow(Vec<String>),
}

impl HostPolicy {
    fn allows(&self, host: &str) -> bool {
        match self {
            HostPolicy::AllowAll => true,
            HostPolicy::DenyAll => false,
            HostPolicy::Allow(hosts) => hosts
                .iter()
                .any(|allowed| is_same_or_subdomain(host, &normalize_domain(allowed))),
        }
    }
}

fn is_same_or_subdomain(host: &str, parent: &str) -> bool {
    !parent.is_empty()
        && (host == parent
            || host
                .strip_suffix(parent)
                .is_some_and(|rest| rest.ends_with('.')))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

/// Extracts the host from an origin pattern like `https://*.example.com/*`.
fn pattern_host(origin: &str) -> Option<String> {
    let rest = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    let host = rest.split('/').next()?.trim_start_matches("*.");
    let host = host.trim().to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

fn parse_url(url: &str) -> Result<(String, String), StoreError> {
    let parsed = Url::parse(url).map_err(|_| StoreError::InvalidUrl(url.to_string()))?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| StoreError::InvalidUrl(url.to_string()))?
        .to_ascii_lowercase();
    Ok((host, parsed.path().to_string()))
}

#[derive(Default)]
struct JarState {
    granted: HashSet<String>,
    permission_requests: usize,
    cookies: Vec<AppliedCookie>,
}

impl JarState {
    fn is_granted(&self, host: &str) -> bool {
        self.granted.iter().any(|g| is_same_or_subdomain(host, g))
    }
}

/// An in-memory [`CookieStore`] that behaves like a browser's cookie jar.
#[derive(Default)]
pub struct JarCookieStore {
    policy: HostPolicy,
    state: Mutex<JarState>,
}

impl JarCookieStore {
    /// Creates an empty store governed by `policy`.
    pub fn new(policy: HostPolicy) -> Self {
        Self {
            policy,
            state: Mutex::default(),
        }
    }

    /// How many times host permission was requested.
    pub async fn permission_requests(&self) -> usize {
        self.state.lock().await.permission_requests
    }

    /// A snapshot of every stored cookie.
    pub async fn cookies(&self) -> Vec<AppliedCookie> {
        self.state.lock().await.cookies.clone()
    }

    /// Copies the stored cookies into a `reqwest` cookie jar.
    pub async fn to_reqwest_jar(&self) -> Arc<Jar> {
        let jar = Arc::new(Jar::default());
        for cookie in self.state.lock().await.cookies.iter() {
            match cookie.url().parse::<Url>() {
                Ok(url) => {
                    jar.add_cookie_str(&set_cookie_header(cookie), &url);
                    debug!(domain = %cookie.domain, name = %cookie.name, "exported cookie to jar");
                }
                Err(_) => {
                    warn!(domain = %cookie.domain, name = %cookie.name, "skipping cookie with unusable domain");
                }
            }
        }
        jar
    }
}

/// Renders `cookie` as a `Set-Cookie` header value.
fn set_cookie_header(cookie: &AppliedCookie) -> String {
    let mut parts = vec![format!("{}={}", cookie.name, cookie.value)];
    if !cookie.host_only {
        parts.push(format!("Domain={}", cookie.host()));
    }
    parts.push(format!("Path={}", cookie.path));
    if cookie.secure {
        parts.push("Secure".to_string());
    }
    if cookie.http_only {
        parts.push("HttpOnly".to_string());
    }
    if cookie.same_site != SameSite::Unspecified {
        parts.push(format!("SameSite={}", cookie.same_site.as_str()));
    }
    if let Some(seconds) = cookie.expiration_date.filter(|s| *s > 0.0) {
        if let Some(time) = UNIX_EPOCH.checked_add(Duration::from_secs(seconds as u64)) {
            parts.push(format!("Expires={}", httpdate::fmt_http_date(time)));
        }
    }
    parts.join("; ")
}

#[async_trait]
impl CookieStore for JarCookieStore {
    async fn request_host_permission(&self, origin: &str) -> Result<bool, StoreError> {
        let host = pattern_host(origin).ok_or_else(|| StoreError::InvalidUrl(origin.to_string()))?;
        let mut state = self.state.lock().await;
        state.permission_requests += 1;

        if !self.policy.allows(&host) {
            debug!(origin, "host permission refused");
            return Ok(false);
        }
        state.granted.insert(host);
        Ok(true)
    }

    async fn set(&self, details: SetCookieDetails) -> Result<Option<AppliedCookie>, StoreError> {
        let (host, _) = parse_url(&details.url)?;
        let mut state = self.state.lock().await;

        if !state.is_granted(&host) {
            return Err(StoreError::PermissionDenied(host));
        }

        if details.name.starts_with("__Host-")
            && (details.domain.is_some() || details.path != "/" || !details.secure)
        {
            return Err(StoreError::Rejected(format!(
                "{} must be secure, host-only and scoped to /",
                details.name
            )));
        }
        if details.name.starts_with("__Secure-") && !details.secure {
            return Err(StoreError::Rejected(format!("{} must be secure", details.name)));
        }

        let (domain, host_only) = match &details.domain {
            Some(domain) => {
                let bare = domain.trim_start_matches('.').to_ascii_lowercase();
                if !is_same_or_subdomain(&host, &bare) {
                    return Err(StoreError::Rejected(format!(
                        "domain {} does not cover {}",
                        bare, host
                    )));
                }
                (format!(".{}", bare), false)
            }
            None => (host.clone(), true),
        };
        let path = if details.path.starts_with('/') {
            details.path.clone()
        } else {
            "/".to_string()
        };

        state
            .cookies
            .retain(|c| !(c.name == details.name && c.domain == domain && c.path == path));

        let now = Utc::now().timestamp() as f64;
        if details.expiration_date.is_some_and(|exp| exp <= now) {
            debug!(name = %details.name, domain = %domain, "expired cookie removed instead of set");
            return Ok(None);
        }

        let cookie = AppliedCookie {
            name: details.name,
            value: details.value,
            domain,
            host_only,
            path,
            secure: details.secure,
            http_only: details.http_only,
            same_site: details.same_site,
            expiration_date: details.expiration_date,
        };
        state.cookies.push(cookie.clone());
        Ok(Some(cookie))
    }

    async fn get(&self, url: &str, name: &str) -> Result<Option<AppliedCookie>, StoreError> {
        let (host, path) = parse_url(url)?;
        let state = self.state.lock().await;
        Ok(state
            .cookies
            .iter()
            .filter(|c| c.name == name && c.applies_to(&host, &path))
            .max_by_key(|c| c.path.len())
            .cloned())
    }

    async fn get_all(&self, domain: &str) -> Result<Vec<AppliedCookie>, StoreError> {
        let target = normalize_domain(domain);
        let state = self.state.lock().await;
        Ok(state
            .cookies
            .iter()
            .filter(|c| is_same_or_subdomain(c.host(), &target))
            .cloned()
            .collect())
    }

    async fn remove(&self, url: &str, name: &str) -> Result<bool, StoreError> {
        let (host, path) = parse_url(url)?;
        let mut state = self.state.lock().await;
        let before = state.cookies.len();
        state
            .cookies
            .retain(|c| !(c.name == name && c.applies_to(&host, &path)));
        Ok(state.cookies.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore as _;

    fn details(name: &str, url: &str, domain: Option<&str>) -> SetCookieDetails {
        SetCookieDetails {
            url: url.to_string(),
            name: name.to_string(),
            value: "v".to_string(),
            domain: domain.map(str::to_string),
            path: "/".to_string(),
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            expiration_date: None,
        }
    }

    async fn granted_store() -> JarCookieStore {
        let store = JarCookieStore::new(HostPolicy::AllowAll);
        store
            .request_host_permission("https://*.chatgpt.com/*")
            .await
            .unwrap();
        store
    }

    #[test]
    fn pattern_host_strips_wildcards() {
        assert_eq!(pattern_host("https://*.chatgpt.com/*").as_deref(), Some("chatgpt.com"));
        assert_eq!(pattern_host("https://example.org/").as_deref(), Some("example.org"));
        assert_eq!(pattern_host("https:///"), None);
    }

    #[tokio::test]
    async fn set_requires_host_permission() {
        let store = JarCookieStore::new(HostPolicy::AllowAll);
        let err = store
            .set(details("a", "https://chatgpt.com/", Some("chatgpt.com")))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::PermissionDenied("chatgpt.com".into()));
    }

    #[tokio::test]
    async fn policy_can_refuse() {
        let store = JarCookieStore::new(HostPolicy::Allow(vec!["openai.com".into()]));
        assert!(!store.request_host_permission("https://*.chatgpt.com/*").await.unwrap());
        assert!(store.request_host_permission("https://*.auth.openai.com/*").await.unwrap());
        assert_eq!(store.permission_requests().await, 2);
    }

    #[tokio::test]
    async fn domain_cookie_reaches_subdomains() {
        let store = granted_store().await;
        let set = store
            .set(details("s", "https://chatgpt.com/", Some(".chatgpt.com")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(set.domain, ".chatgpt.com");
        assert!(!set.host_only);

        assert!(store.get("https://chat.chatgpt.com/c", "s").await.unwrap().is_some());
        assert!(store.get("https://notchatgpt.com/", "s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn host_prefix_rules_are_enforced() {
        let store = granted_store().await;
        assert!(matches!(
            store
                .set(details("__Host-x", "https://chatgpt.com/", Some("chatgpt.com")))
                .await,
            Err(StoreError::Rejected(_))
        ));

        let ok = store
            .set(details("__Host-x", "https://chatgpt.com/", None))
            .await
            .unwrap()
            .unwrap();
        assert!(ok.host_only);
        assert!(store.get("https://sub.chatgpt.com/", "__Host-x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn foreign_domain_is_rejected() {
        let store = granted_store().await;
        assert!(matches!(
            store
                .set(details("a", "https://chatgpt.com/", Some("openai.com")))
                .await,
            Err(StoreError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn expired_cookie_yields_nothing() {
        let store = granted_store().await;
        let mut expired = details("old", "https://chatgpt.com/", None);
        expired.expiration_date = Some(1.0);
        assert!(store.set(expired).await.unwrap().is_none());
        assert!(store.cookies().await.is_empty());
    }

    #[tokio::test]
    async fn remove_and_get_all() {
        let store = granted_store().await;
        store.set(details("a", "https://chatgpt.com/", Some("chatgpt.com"))).await.unwrap();
        store.set(details("b", "https://chat.chatgpt.com/", None)).await.unwrap();

        assert_eq!(store.get_all("chatgpt.com").await.unwrap().len(), 2);
        assert!(store.remove("https://chatgpt.com/", "a").await.unwrap());
        assert!(!store.remove("https://chatgpt.com/", "a").await.unwrap());
        assert_eq!(store.get_all("chatgpt.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exports_to_reqwest_jar() {
        let store = granted_store().await;
        store.set(details("s", "https://chatgpt.com/", Some(".chatgpt.com"))).await.unwrap();

        let jar = store.to_reqwest_jar().await;
        let url: Url = "https://chatgpt.com/backend".parse().unwrap();
        let header = jar.cookies(&url).expect("cookie header");
        assert_eq!(header.to_str().unwrap(), "s=v");
    }
}
