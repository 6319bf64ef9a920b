use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a user session.
///
/// Stored under the SHA-256 of the bearer token, never under the token itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The identifier compared against the user's `current_session_id`.
    pub session_id: Uuid,
    /// The ID of the user this session belongs to.
    pub user_id: Uuid,
    /// The user's token version when the session was issued.
    pub token_version: i32,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the session expires.
    pub expires_at: DateTime<Utc>,
}
