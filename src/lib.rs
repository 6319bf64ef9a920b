//! Cookie relay: a backend that stores browser session cookies and hands
//! them out to permitted users, plus the extension-side logic that writes
//! them back into a browser cookie store.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod cookies;
pub mod extension;

pub mod crypto {
    pub mod token;
}

pub mod models {
    pub mod cookie;
    pub mod session;
    pub mod user;
}

pub mod repositories {
    pub mod cookie;
    pub mod memory;
    pub mod session;
    pub mod user;
}

pub mod services {
    pub mod access;
    pub mod auth;
    pub mod cookies;
    pub mod users;
}

pub mod handlers {
    pub mod auth;
    pub mod cookies;
    pub mod users;
    pub mod website_cookies;
}

pub mod middleware_layer {
    pub mod auth;
}

pub mod validation {
    pub mod auth;
    pub mod cookies;
}
