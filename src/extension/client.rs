//! A `reqwest` client for the relay's REST API, as used by the extension.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use url::Url;

use super::messages::{PlanChecker, PlanStatus};
use crate::models::cookie::{CookieRecord, WebsiteCookieBundle};
use crate::models::user::UserProfile;

/// Errors talking to the relay API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request never produced a response, or the body was unreadable.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The base URL or an endpoint could not be built.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// A call that needs a session was made before logging in.
    #[error("not logged in")]
    NotLoggedIn,

    /// The server answered 401.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The server answered 403.
    #[error("forbidden ({}): {message}", .reason.as_deref().unwrap_or("unspecified"))]
    Forbidden {
        reason: Option<String>,
        message: String,
    },

    /// Any other non-success status.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
}

impl ClientError {
    /// The `reason` of a 403, when there is one.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ClientError::Forbidden { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: Option<String>,
}

/// A successful login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub user: UserProfile,
}

/// The plan check answer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReport {
    pub valid: bool,
    #[serde(default)]
    pub expiry_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub days_remaining: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MatchedCookies {
    cookies: Vec<CookieRecord>,
}

/// Client for the relay API; holds the bearer token after login.
pub struct ApiClient {
    http: Client,
    base: Url,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// Creates a client for the API at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            http: Client::builder().build()?,
            base: Url::parse(base_url)?,
            token: RwLock::new(None),
        })
    }

    /// Uses an existing bearer token.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path)?)
    }

    async fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let token = self.token.read().await.clone().ok_or(ClientError::NotLoggedIn)?;
        Ok(builder.bearer_auth(token))
    }

    async fn check(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or(ErrorBody {
            error: text,
            reason: None,
        });

        Err(match status {
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized(body.error),
            StatusCode::FORBIDDEN => ClientError::Forbidden {
                reason: body.reason,
                message: body.error,
            },
            other => ClientError::Status {
                status: other.as_u16(),
                message: body.error,
            },
        })
    }

    /// Logs in and keeps the returned token.
    #[instrument(level = "debug", skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let response = self
            .http
            .post(self.endpoint("/api/auth/login")?)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;
        let login: LoginResponse = Self::check(response).await?.json().await?;
        self.set_token(Some(login.token.clone())).await;
        debug!(user_id = %login.user.id, "logged in");
        Ok(login)
    }

    /// Ends the session and forgets the token.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let request = self.authorized(self.http.post(self.endpoint("/api/auth/logout")?)).await?;
        Self::check(request.send().await?).await?;
        self.set_token(None).await;
        Ok(())
    }

    /// Asks the server whether the plan (and optionally `website`) is usable.
    pub async fn plan(&self, website: Option<&str>) -> Result<PlanReport, ClientError> {
        let request = self
            .authorized(self.http.post(self.endpoint("/api/auth/check-plan")?))
            .await?
            .json(&json!({ "website": website }));
        Ok(Self::check(request.send().await?).await?.json().await?)
    }

    /// The cookies the server hands out for `website`.
    pub async fn fetch_cookies(&self, website: &str) -> Result<Vec<CookieRecord>, ClientError> {
        let request = self
            .authorized(self.http.get(self.endpoint("/api/cookies/get")?))
            .await?
            .query(&[("website", website)]);
        let matched: MatchedCookies = Self::check(request.send().await?).await?.json().await?;
        Ok(matched.cookies)
    }

    /// Uploads a new version of `website`'s bundle; needs an admin session.
    pub async fn upload_website_cookies(
        &self,
        website: &str,
        cookies: &[CookieRecord],
    ) -> Result<WebsiteCookieBundle, ClientError> {
        let request = self
            .authorized(self.http.post(self.endpoint("/api/website-cookies")?))
            .await?
            .json(&json!({ "website": website, "cookies": cookies }));
        Ok(Self::check(request.send().await?).await?.json().await?)
    }
}

#[async_trait]
impl PlanChecker for ApiClient {
    /// Only transport failures and 5xx answers come back as `Err`; every
    /// other refusal is a definite status.
    async fn check_plan(&self, website: Option<&str>) -> Result<PlanStatus, ClientError> {
        match self.plan(website).await {
            Ok(report) if report.valid => Ok(PlanStatus::Valid),
            Ok(_) => Ok(PlanStatus::Denied {
                reason: None,
                message: "plan is not valid".to_string(),
            }),
            Err(ClientError::Forbidden { reason, message }) => {
                if reason.as_deref() == Some("plan_expired") {
                    Ok(PlanStatus::Expired)
                } else {
                    Ok(PlanStatus::Denied { reason, message })
                }
            }
            Err(ClientError::Unauthorized(_)) => Ok(PlanStatus::SignedOut),
            Err(ClientError::NotLoggedIn) => Ok(PlanStatus::Denied {
                reason: Some("not_logged_in".to_string()),
                message: ClientError::NotLoggedIn.to_string(),
            }),
            Err(ClientError::Status { status, message }) if status < 500 => Ok(PlanStatus::Denied {
                reason: None,
                message,
            }),
            Err(e) => Err(e),
        }
    }
}
