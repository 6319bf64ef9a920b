use std::sync::LazyLock;

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

static IS_PRODUCTION: LazyLock<bool> = LazyLock::new(|| {
    std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()) == "production"
});

/// Discriminator carried by 403 bodies so clients can branch on the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    /// The user's subscription expiry date has passed.
    PlanExpired,
    /// The per-website permission is expired or revoked.
    WebsiteAccessExpired,
    /// The account has been deactivated by an admin.
    AccountDeactivated,
    /// The user holds no live website permission at all.
    NoActivePermissions,
    /// The user was never granted the requested website.
    NoPermission,
}

impl AccessReason {
    /// The wire value of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::PlanExpired => "plan_expired",
            AccessReason::WebsiteAccessExpired => "website_access_expired",
            AccessReason::AccountDeactivated => "account_deactivated",
            AccessReason::NoActivePermissions => "no_active_permissions",
            AccessReason::NoPermission => "no_permission",
        }
    }
}

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An authentication error.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Access denied for a reason the client can act on.
    #[error("Access denied ({reason:?}): {message}")]
    Forbidden {
        reason: AccessReason,
        message: String,
    },

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A uniqueness conflict.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Builds a 403 carrying `reason`.
    pub fn forbidden(reason: AccessReason, message: impl Into<String>) -> Self {
        AppError::Forbidden {
            reason,
            message: message.into(),
        }
    }

    /// The reason discriminator, if this is an access denial.
    pub fn reason(&self) -> Option<AccessReason> {
        match self {
            AppError::Forbidden { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl From<garde::Report> for AppError {
    fn from(report: garde::Report) -> Self {
        AppError::Validation(report.to_string())
    }
}

fn infrastructure_message(public: &str, detail: &dyn std::fmt::Display) -> String {
    if *IS_PRODUCTION {
        public.to_string()
    } else {
        format!("{}: {}", public, detail)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut reason = None;
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, infrastructure_message("Database error", e))
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, infrastructure_message("Database error", e))
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, infrastructure_message("Session store error", e))
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }

            AppError::Forbidden { reason: r, ref message } => {
                tracing::warn!(reason = r.as_str(), "Access denied: {}", message);
                reason = Some(r);
                (StatusCode::FORBIDDEN, message.clone())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::Conflict(ref msg) => {
                tracing::debug!("Conflict: {}", msg);
                (StatusCode::CONFLICT, msg.clone())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, infrastructure_message("Internal server error", msg))
            }
        };

        let body = match reason {
            Some(reason) => sonic_rs::to_string(&sonic_rs::json!({
                "error": message,
                "reason": reason.as_str(),
            })),
            None => sonic_rs::to_string(&sonic_rs::json!({
                "error": message
            })),
        }
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
