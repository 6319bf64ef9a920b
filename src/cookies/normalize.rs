//! Website string normalization.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static LEADING_SCHEME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://").expect("leading scheme regex is valid"));

static SCHEME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://").expect("scheme regex is valid"));

static WWW_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^www\.").expect("www regex is valid"));

static TRAILING_SLASH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/+$").expect("trailing slash regex is valid"));

/// Reduces a hostname, dotted cookie domain, or URL to a bare lowercase hostname.
///
/// Scheme, port, path, a leading `www.` and a leading `.` are dropped. Input
/// that does not parse as a URL goes through plain pattern stripping instead;
/// this never fails.
pub fn normalize_domain(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let candidate = if LEADING_SCHEME_PATTERN.is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed.trim_start_matches('.'))
    };

    let host = Url::parse(&candidate)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .filter(|host| !host.is_empty());

    let host = match host {
        Some(host) => host,
        None => fallback_strip(trimmed),
    };

    strip_prefixes(&host.to_ascii_lowercase())
}

fn fallback_strip(raw: &str) -> String {
    let without_scheme = SCHEME_PATTERN.replace(raw, "");
    let without_www = WWW_PATTERN.replace(&without_scheme, "");
    TRAILING_SLASH_PATTERN.replace(&without_www, "").into_owned()
}

fn strip_prefixes(host: &str) -> String {
    let host = host.trim_start_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);
    host.trim_end_matches('.').to_string()
}
