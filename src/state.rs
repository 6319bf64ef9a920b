use redis::aio::ConnectionManager;
use std::sync::Arc;
use crate::config::Config;
use crate::error::Result;
use crate::repositories::{
    cookie::{CookieRepository, PgCookieRepository},
    memory::{MemoryCookieRepository, MemorySessionStore, MemoryUserRepository},
    session::{RedisSessionStore, SessionStore},
    user::{PgUserRepository, UserRepository},
};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// Users and their website permissions.
    pub users: Arc<dyn UserRepository>,
    /// Uploaded cookie bundles.
    pub cookies: Arc<dyn CookieRepository>,
    /// Bearer sessions.
    pub sessions: Arc<dyn SessionStore>,
    /// The application's configuration.
    pub config: Config,
}

impl AppState {
    /// Creates a new `AppState` backed by PostgreSQL and Redis.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        crate::db::migrate(&db).await?;

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");

        Ok(AppState {
            users: Arc::new(PgUserRepository::new(db.clone())),
            cookies: Arc::new(PgCookieRepository::new(db)),
            sessions: Arc::new(RedisSessionStore::new(redis)),
            config: config.clone(),
        })
    }

    /// Creates an `AppState` that keeps everything in process memory.
    pub fn in_memory(config: Config) -> Self {
        AppState {
            users: Arc::new(MemoryUserRepository::new()),
            cookies: Arc::new(MemoryCookieRepository::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            config,
        }
    }
}
