//! Selects the stored cookies that belong to a requested website.

use tracing::debug;

use super::normalize::normalize_domain;
use crate::models::cookie::CookieRecord;

/// A business rule pairing a target site with the cookie domains that may
/// stand in for it when nothing matches directly.
struct SessionFamily {
    /// The target host (or any subdomain of it) the rule applies to.
    target: &'static str,
    /// Cookie domains accepted by substring when the rule applies.
    accepts: &'static [&'static str],
}

/// ChatGPT sessions are issued across both of these domains.
static SESSION_FAMILIES: &[SessionFamily] = &[SessionFamily {
    target: "chatgpt.com",
    accepts: &["openai.com", "chatgpt.com"],
}];

fn is_same_or_subdomain(host: &str, parent: &str) -> bool {
    !parent.is_empty()
        && (host == parent
            || host
                .strip_suffix(parent)
                .is_some_and(|rest| rest.ends_with('.')))
}

/// Whether `cookie` belongs to the already-normalized `website`.
///
/// Matches when the domains are equal, when the cookie is a dotted
/// parent-domain cookie covering the website, or when the website is a
/// subdomain of the cookie's domain.
pub fn cookie_matches(cookie: &CookieRecord, website: &str) -> bool {
    let cookie_domain = normalize_domain(&cookie.domain);
    if cookie_domain.is_empty() || website.is_empty() {
        return false;
    }

    if cookie_domain == website {
        return true;
    }

    if cookie.domain.trim().starts_with('.') && is_same_or_subdomain(website, &cookie_domain) {
        return true;
    }

    website.ends_with(&format!(".{cookie_domain}"))
}

/// Filters `all` down to the cookies for `website`.
///
/// When nothing matches and the website falls under a session family, any
/// cookie from that family's domains is returned instead.
pub fn match_cookies(all: &[CookieRecord], website: &str) -> Vec<CookieRecord> {
    let target = normalize_domain(website);

    let matched: Vec<CookieRecord> = all
        .iter()
        .filter(|cookie| cookie_matches(cookie, &target))
        .cloned()
        .collect();

    if !matched.is_empty() {
        debug!(website = %target, count = matched.len(), "matched cookies by domain");
        return matched;
    }

    let Some(family) = SESSION_FAMILIES
        .iter()
        .find(|family| is_same_or_subdomain(&target, family.target))
    else {
        return matched;
    };

    let fallback: Vec<CookieRecord> = all
        .iter()
        .filter(|cookie| {
            let domain = normalize_domain(&cookie.domain);
            family.accepts.iter().any(|accepted| domain.contains(accepted))
        })
        .cloned()
        .collect();

    debug!(
        website = %target,
        count = fallback.len(),
        "no direct cookie match; using session family fallback"
    );
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: &str) -> CookieRecord {
        CookieRecord::new(name, "v", domain)
    }

    fn names(cookies: &[CookieRecord]) -> Vec<&str> {
        cookies.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn dotted_parent_cookie_matches_apex_and_subdomains_only() {
        let c = cookie("s", ".chatgpt.com");
        assert!(cookie_matches(&c, "chatgpt.com"));
        assert!(cookie_matches(&c, "chat.chatgpt.com"));
        assert!(!cookie_matches(&c, "notchatgpt.com"));
    }

    #[test]
    fn host_cookie_matches_subdomain_of_website() {
        let c = cookie("s", "example.com");
        assert!(cookie_matches(&c, "example.com"));
        assert!(cookie_matches(&c, "api.example.com"));
        assert!(!cookie_matches(&c, "badexample.com"));
    }

    #[test]
    fn subdomain_cookie_does_not_match_parent_website() {
        let c = cookie("s", "auth.example.com");
        assert!(!cookie_matches(&c, "example.com"));
    }

    #[test]
    fn empty_domain_never_matches() {
        assert!(!cookie_matches(&cookie("s", ""), "example.com"));
    }

    #[test]
    fn match_cookies_normalizes_the_target() {
        let all = vec![cookie("a", ".example.com"), cookie("b", ".other.com")];
        let matched = match_cookies(&all, "https://www.example.com/path");
        assert_eq!(names(&matched), vec!["a"]);
    }

    #[test]
    fn chatgpt_falls_back_to_openai_cookies() {
        let all = vec![
            cookie("openai", ".auth.openai.com"),
            cookie("unrelated", ".example.com"),
        ];
        let matched = match_cookies(&all, "chatgpt.com");
        assert_eq!(names(&matched), vec!["openai"]);

        let matched = match_cookies(&all, "chat.chatgpt.com");
        assert_eq!(names(&matched), vec!["openai"]);
    }

    #[test]
    fn fallback_is_not_used_when_direct_matches_exist() {
        let all = vec![cookie("direct", ".chatgpt.com"), cookie("openai", ".openai.com")];
        let matched = match_cookies(&all, "chatgpt.com");
        assert_eq!(names(&matched), vec!["direct"]);
    }

    #[test]
    fn fallback_only_applies_to_chatgpt_targets() {
        let all = vec![cookie("c", ".chatgpt.com")];
        assert!(match_cookies(&all, "openai.com").is_empty());
        assert!(match_cookies(&all, "notchatgpt.com").is_empty());
    }
}
