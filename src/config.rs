use std::env;
use std::net::SocketAddr;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// Credentials for the admin account seeded at startup.
#[derive(Clone)]
pub struct AdminSeed {
    /// The admin's username.
    pub username: String,
    /// The admin's plain-text password, wiped on drop.
    pub password: Zeroizing<String>,
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The duration of a session in days.
    pub session_duration_days: i64,
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Whether the server runs in production mode.
    pub production: bool,
    /// The largest request body accepted, in bytes.
    pub max_body_bytes: usize,
    /// Optional admin account ensured at startup.
    pub admin_seed: Option<AdminSeed>,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let admin_seed = match (env::var("ADMIN_USERNAME"), env::var("ADMIN_PASSWORD")) {
            (Ok(username), Ok(password)) => Some(AdminSeed {
                username,
                password: Zeroizing::new(password),
            }),
            (Ok(_), Err(_)) => anyhow::bail!("ADMIN_PASSWORD must be set when ADMIN_USERNAME is"),
            _ => None,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            session_duration_days: env::var("SESSION_DURATION_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .context("Invalid SESSION_DURATION_DAYS")?,
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
                .parse()
                .context("Invalid BIND_ADDR")?,
            production: env::var("APP_ENV")
                .map(|v| v == "production")
                .unwrap_or(false),
            max_body_bytes: env::var("MAX_BODY_BYTES")
                .unwrap_or_else(|_| (2 * 1024 * 1024).to_string())
                .parse()
                .context("Invalid MAX_BODY_BYTES")?,
            admin_seed,
        })
    }

    /// A configuration for in-process use without any backing services.
    pub fn in_memory() -> Self {
        Self {
            database_url: String::new(),
            redis_url: String::new(),
            session_duration_days: 7,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            production: false,
            max_body_bytes: 2 * 1024 * 1024,
            admin_seed: None,
        }
    }
}
