use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// How many superseded cookie sets a website bundle keeps.
pub const MAX_RETAINED_VERSIONS: usize = 5;

/// The `SameSite` attribute of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
    Unspecified,
}

impl SameSite {
    /// Parses the spellings found in browser exports (`lax`, `Strict`,
    /// `no_restriction`, ...). Unknown values map to `Unspecified`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lax" => SameSite::Lax,
            "strict" => SameSite::Strict,
            "none" | "no_restriction" => SameSite::None,
            _ => SameSite::Unspecified,
        }
    }

    /// The canonical attribute spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
            SameSite::Unspecified => "Unspecified",
        }
    }
}

impl Serialize for SameSite {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SameSite {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SameSite::parse(&raw))
    }
}

/// The loosely-typed `expiry` field of exported cookies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expiry {
    /// Seconds since the Unix epoch.
    Epoch(f64),
    /// A date string in one of the formats `parse_expiry_text` understands.
    Text(String),
}

/// Parses a textual cookie expiry into a UTC timestamp.
pub fn parse_expiry_text(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    if let Ok(seconds) = raw.parse::<f64>() {
        return DateTime::from_timestamp(seconds as i64, 0);
    }
    None
}

fn default_path() -> String {
    "/".to_string()
}

/// A single stored cookie, as uploaded by an admin.
///
/// The value is redacted in `Debug` output.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<Expiry>,
}

impl CookieRecord {
    /// Creates a cookie with only the identifying fields set.
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            secure: None,
            http_only: None,
            same_site: None,
            expiration_date: None,
            expiry: None,
        }
    }

    /// Folds a parseable `expiry` into `expirationDate` and trims the domain.
    ///
    /// An unparseable `expiry` string is kept as-is so the applier can still
    /// tell "supplied but unreadable" apart from "absent".
    pub fn normalized(mut self) -> Self {
        self.domain = self.domain.trim().to_string();
        if self.path.is_empty() {
            self.path = default_path();
        }
        if self.expiration_date.is_none() {
            match &self.expiry {
                Some(Expiry::Epoch(seconds)) => {
                    self.expiration_date = Some(*seconds);
                    self.expiry = None;
                }
                Some(Expiry::Text(text)) => {
                    if let Some(ts) = parse_expiry_text(text) {
                        self.expiration_date = Some(ts.timestamp() as f64);
                        self.expiry = None;
                    }
                }
                None => {}
            }
        }
        self
    }
}

impl fmt::Debug for CookieRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieRecord")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("same_site", &self.same_site)
            .field("expiration_date", &self.expiration_date)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// A flat, timestamped snapshot of uploaded cookies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieBundle {
    pub id: Uuid,
    pub uploaded_by: Uuid,
    pub cookies: Vec<CookieRecord>,
    pub created_at: DateTime<Utc>,
}

/// A bundle listing entry without cookie values.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieBundleSummary {
    pub id: Uuid,
    pub uploaded_by: Uuid,
    pub cookie_count: usize,
    pub domains: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&CookieBundle> for CookieBundleSummary {
    fn from(bundle: &CookieBundle) -> Self {
        let mut domains: Vec<String> = bundle.cookies.iter().map(|c| c.domain.clone()).collect();
        domains.sort();
        domains.dedup();
        Self {
            id: bundle.id,
            uploaded_by: bundle.uploaded_by,
            cookie_count: bundle.cookies.len(),
            domains,
            created_at: bundle.created_at,
        }
    }
}

/// A superseded cookie set kept in a website bundle's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieVersion {
    pub version: i32,
    pub cookies: Vec<CookieRecord>,
    pub replaced_at: DateTime<Utc>,
}

/// The current cookie set for one website, with a rolling history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteCookieBundle {
    pub website: String,
    pub cookies: Vec<CookieRecord>,
    pub version: i32,
    pub previous_versions: Vec<CookieVersion>,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebsiteCookieBundle {
    /// Creates the first version of a website bundle.
    pub fn new(website: String, cookies: Vec<CookieRecord>, uploaded_by: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            website,
            cookies,
            version: 1,
            previous_versions: Vec::new(),
            uploaded_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the current cookies, pushing the old set into history.
    ///
    /// History holds at most `MAX_RETAINED_VERSIONS` entries; the oldest go first.
    pub fn roll_forward(&mut self, cookies: Vec<CookieRecord>, uploaded_by: Uuid, now: DateTime<Utc>) {
        let previous = std::mem::replace(&mut self.cookies, cookies);
        self.previous_versions.push(CookieVersion {
            version: self.version,
            cookies: previous,
            replaced_at: now,
        });
        if self.previous_versions.len() > MAX_RETAINED_VERSIONS {
            let excess = self.previous_versions.len() - MAX_RETAINED_VERSIONS;
            self.previous_versions.drain(..excess);
        }
        self.version += 1;
        self.uploaded_by = uploaded_by;
        self.updated_at = now;
    }
}
