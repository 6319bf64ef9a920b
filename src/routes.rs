use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::{
    handlers::{auth, cookies, users, website_cookies},
    middleware_layer::auth::{require_admin, require_auth},
    state::AppState,
};

/// Builds the full REST router.
///
/// Routes come in three groups: public (login, register), authenticated,
/// and admin. Admin routes run `require_auth` first and `require_admin`
/// second.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/register", post(auth::register))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/check-plan", post(auth::check_plan))
        .route("/api/auth/validate-session", post(auth::validate_session))
        .route("/api/auth/me", get(auth::me))
        .route("/api/cookies/get", get(cookies::get_for_website))
        .route("/api/users/me/permissions", get(users::my_permissions))
        .route(
            "/api/website-cookies/{website}",
            get(website_cookies::get).merge(delete(website_cookies::delete).route_layer(from_fn(require_admin))),
        )
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/api/auth/create", post(users::create_user))
        .route("/api/auth/users", get(users::list_users))
        .route("/api/cookies", get(cookies::list))
        .route("/api/cookies/upload", post(cookies::upload))
        .route("/api/cookies/insert", post(cookies::insert))
        .route("/api/cookies/website-upload", post(cookies::website_upload))
        .route("/api/cookies/{id}", get(cookies::get_bundle))
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route("/api/users/stats", get(users::stats))
        .route(
            "/api/users/{id}",
            get(users::get_user).put(users::update_user).delete(users::delete_user),
        )
        .route(
            "/api/users/{id}/permissions",
            put(users::replace_permissions).post(users::grant_permission),
        )
        .route(
            "/api/users/{id}/permissions/{website}",
            delete(users::revoke_permission),
        )
        .route(
            "/api/website-cookies",
            get(website_cookies::list).post(cookies::website_upload),
        )
        .route("/api/website-cookies/{website}/history", get(website_cookies::history))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
}
