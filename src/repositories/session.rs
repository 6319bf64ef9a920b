use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    crypto::token::token_fingerprint,
    error::{AppError, Result},
    models::session::Session,
};

/// Storage for issued bearer sessions, keyed by token.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores `session` for `token` with a time-to-live.
    async fn create(&self, token: &str, session: &Session, ttl_seconds: u64) -> Result<()>;

    /// Looks up the session for `token`; expired sessions read as `None`.
    async fn get(&self, token: &str) -> Result<Option<Session>>;

    /// Deletes the session for `token`.
    async fn delete(&self, token: &str) -> Result<()>;
}

fn session_key(token: &str) -> String {
    format!("session:{}", token_fingerprint(token))
}

/// Redis-backed `SessionStore`.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
}

impl RedisSessionStore {
    /// Creates a store over a pooled Redis connection.
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, token: &str, session: &Session, ttl_seconds: u64) -> Result<()> {
        let session_json = sonic_rs::to_string(session)
            .map_err(|e| AppError::Internal(format!("Session serialization failed: {}", e)))?;

        let mut redis = self.redis.clone();
        let _: () = redis
            .set_ex(session_key(token), &session_json, ttl_seconds)
            .await
            .map_err(|e| {
                tracing::error!("❌ Redis set_ex failed: {}", e);
                AppError::Redis(e)
            })?;

        tracing::debug!("✅ Session saved to Redis for user {}", session.user_id);
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<Session>> {
        let mut redis = self.redis.clone();
        let session_json: Option<String> = redis.get(session_key(token)).await?;

        let Some(session_json) = session_json else {
            return Ok(None);
        };

        let session: Session = match sonic_rs::from_str(&session_json) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("❌ Invalid session JSON: {}", e);
                return Ok(None);
            }
        };

        if chrono::Utc::now() > session.expires_at {
            let _: () = redis.del(session_key(token)).await.unwrap_or(());
            return Ok(None);
        }

        Ok(Some(session))
    }

    async fn delete(&self, token: &str) -> Result<()> {
        let mut redis = self.redis.clone();
        let _: () = redis.del(session_key(token)).await?;
        Ok(())
    }
}
