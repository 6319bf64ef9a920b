//! The persisted cookie-file format: a JSON array of cookie objects.
//!
//! Entries carry `name, value, domain, path, secure, httpOnly, sameSite` and
//! either `expirationDate` (epoch seconds) or `expiry` (number or date string).
//! Malformed entries are skipped with a warning instead of failing the file.

use tracing::{debug, instrument, warn};

use crate::models::cookie::CookieRecord;

/// Errors that can occur while reading a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieFileError {
    /// The document is not valid JSON.
    #[error("cookie file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The top-level value is not an array.
    #[error("cookie file must be a JSON array of cookie objects")]
    NotAnArray,

    /// Every entry of a non-empty array was malformed.
    #[error("no valid cookies found in file ({malformed_count} entries failed to parse)")]
    NoCookiesFound {
        /// Number of malformed entries encountered.
        malformed_count: usize,
    },
}

/// Result of parsing a cookie file.
#[derive(Debug)]
pub struct ParseResult {
    /// Successfully parsed cookies, normalized.
    pub cookies: Vec<CookieRecord>,
    /// Warnings for skipped entries (0-based index and reason).
    pub warnings: Vec<(usize, String)>,
}

/// Parses a persisted cookie file.
///
/// # Errors
///
/// Returns [`CookieFileError::NoCookiesFound`] when a non-empty array yields
/// no usable cookie.
#[instrument(level = "debug", skip(input))]
pub fn parse_cookie_file(input: &str) -> Result<ParseResult, CookieFileError> {
    let document: serde_json::Value = serde_json::from_str(input)?;
    let entries = match document {
        serde_json::Value::Array(entries) => entries,
        _ => return Err(CookieFileError::NotAnArray),
    };

    let total = entries.len();
    let mut cookies = Vec::with_capacity(total);
    let mut warnings = Vec::new();

    for (index, entry) in entries.into_iter().enumerate() {
        match parse_entry(entry) {
            Ok(cookie) => {
                debug!(index, domain = %cookie.domain, name = %cookie.name, "parsed cookie");
                cookies.push(cookie);
            }
            Err(reason) => {
                warn!(index, reason = %reason, "skipping malformed cookie entry");
                warnings.push((index, reason));
            }
        }
    }

    if cookies.is_empty() && total > 0 {
        return Err(CookieFileError::NoCookiesFound {
            malformed_count: warnings.len(),
        });
    }

    Ok(ParseResult { cookies, warnings })
}

fn parse_entry(entry: serde_json::Value) -> Result<CookieRecord, String> {
    if !entry.is_object() {
        return Err("entry is not an object".to_string());
    }

    let cookie: CookieRecord =
        serde_json::from_value(entry).map_err(|e| format!("invalid cookie object: {e}"))?;

    if cookie.name.trim().is_empty() {
        return Err("cookie name is empty".to_string());
    }
    if cookie.domain.trim().is_empty() {
        return Err(format!("cookie '{}' has an empty domain", cookie.name));
    }

    Ok(cookie.normalized())
}

/// Serializes cookies back into the persisted format.
pub fn write_cookie_file(cookies: &[CookieRecord]) -> Result<String, CookieFileError> {
    Ok(serde_json::to_string_pretty(cookies)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cookie::SameSite;

    #[test]
    fn parses_browser_export() {
        let input = r#"[
            {"name":"__Secure-next-auth.session-token","value":"abc","domain":".chatgpt.com",
             "path":"/","secure":true,"httpOnly":true,"sameSite":"lax","expirationDate":1893456000},
            {"name":"oai-did","value":"xyz","domain":"chatgpt.com","expiry":"2030-01-01T00:00:00Z"}
        ]"#;
        let result = parse_cookie_file(input).unwrap();
        assert_eq!(result.cookies.len(), 2);
        assert!(result.warnings.is_empty());
        assert_eq!(result.cookies[0].same_site, Some(SameSite::Lax));
        assert_eq!(result.cookies[0].http_only, Some(true));
        assert_eq!(result.cookies[1].expiration_date, Some(1_893_456_000.0));
    }

    #[test]
    fn skips_malformed_entries_with_indexes() {
        let input = r#"[
            {"name":"good","value":"1","domain":".a.com"},
            "not an object",
            {"name":"","value":"2","domain":".a.com"},
            {"name":"nodomain","value":"3"}
        ]"#;
        let result = parse_cookie_file(input).unwrap();
        assert_eq!(result.cookies.len(), 1);
        let indexes: Vec<usize> = result.warnings.iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[test]
    fn all_malformed_is_an_error() {
        let err = parse_cookie_file(r#"[1, 2]"#).unwrap_err();
        assert!(matches!(err, CookieFileError::NoCookiesFound { malformed_count: 2 }));
    }

    #[test]
    fn empty_array_is_fine() {
        let result = parse_cookie_file("[]").unwrap();
        assert!(result.cookies.is_empty());
    }

    #[test]
    fn rejects_non_array_documents() {
        assert!(matches!(parse_cookie_file("{}"), Err(CookieFileError::NotAnArray)));
        assert!(matches!(parse_cookie_file("nope"), Err(CookieFileError::Json(_))));
    }

    #[test]
    fn written_file_parses_back() {
        let cookies = vec![CookieRecord::new("a", "b", ".x.com")];
        let text = write_cookie_file(&cookies).unwrap();
        let parsed = parse_cookie_file(&text).unwrap();
        assert_eq!(parsed.cookies, cookies);
    }
}
