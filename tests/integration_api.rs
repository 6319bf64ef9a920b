use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use cookie_relay::{
    config::Config,
    routes::build_router,
    services::auth::{CreateUserInput, PermissionGrant, create_user},
    state::AppState,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

// Shared test context
struct TestContext {
    app: Router,
    state: AppState,
}

impl TestContext {
    fn new() -> Self {
        let state = AppState::in_memory(Config::in_memory());
        Self {
            app: build_router(state.clone()),
            state,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    async fn seed_user(&self, username: &str, is_admin: bool, websites: Vec<PermissionGrant>) {
        create_user(
            &self.state,
            CreateUserInput {
                username: username.to_string(),
                password: format!("{}-password", username),
                is_admin,
                websites,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    async fn login(&self, username: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "username": username, "password": format!("{}-password", username) })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    async fn admin(&self) -> String {
        self.seed_user("admin", true, vec![]).await;
        self.login("admin").await
    }
}

fn grant(website: &str) -> PermissionGrant {
    PermissionGrant {
        website: website.to_string(),
        has_access: true,
        expires_at: None,
    }
}

fn cookies_payload() -> Value {
    json!({
        "cookies": [
            { "name": "__Secure-next-auth.session-token", "value": "abc", "domain": ".chatgpt.com", "path": "/", "secure": true, "httpOnly": true, "sameSite": "lax", "expirationDate": 1900000000 },
            { "name": "oai-did", "value": "xyz", "domain": ".openai.com" },
            { "name": "unrelated", "value": "q", "domain": "example.org" }
        ]
    })
}

#[tokio::test]
async fn test_register_login_and_me() {
    let context = TestContext::new();

    // Step 1: Registration
    let (status, body) = context
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "username": "newbie", "password": "newbie-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["username"], "newbie");
    assert_eq!(body["isAdmin"], false);
    assert!(body.get("password").is_none());

    // Step 2: Login
    let token = context.login("newbie").await;

    // Step 3: Profile
    let (status, body) = context.call(Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loginCount"], 1);

    let (status, body) = context
        .call(Method::POST, "/api/auth/validate-session", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn test_bad_registration_and_credentials() {
    let context = TestContext::new();

    let (status, _) = context
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "username": "x", "password": "short" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    context.seed_user("dup", false, vec![]).await;
    let (status, _) = context
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "username": "dup", "password": "another-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = context
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": "dup", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_missing_or_unknown_token_is_unauthorized() {
    let context = TestContext::new();

    let (status, _) = context.call(Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = context
        .call(Method::GET, "/api/auth/me", Some("not-a-real-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_cookie_works_without_header() {
    let context = TestContext::new();
    context.seed_user("browser", false, vec![]).await;
    let token = context.login("browser").await;

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/auth/me")
        .header(header::COOKIE, format!("session_token={}", token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = context.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "browser");
}

#[tokio::test]
async fn test_gate_serves_granted_website_only() {
    let context = TestContext::new();
    let admin = context.admin().await;
    context.seed_user("member", false, vec![grant("https://www.chatgpt.com/")]).await;
    let member = context.login("member").await;

    // Step 1: Admin uploads a flat bundle
    let (status, body) = context
        .call(Method::POST, "/api/cookies/upload", Some(&admin), Some(cookies_payload()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["bundle"]["cookieCount"], 3);

    // Step 2: Member gets only the chatgpt.com cookie
    let (status, body) = context
        .call(Method::GET, "/api/cookies/get?website=chatgpt.com", Some(&member), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["cookies"][0]["domain"], ".chatgpt.com");

    // Step 3: No grant for openai.com
    let (status, body) = context
        .call(Method::GET, "/api/cookies/get?website=openai.com", Some(&member), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "no_permission");

    // Step 4: The gate is exact-match, a subdomain is not covered
    let (status, _) = context
        .call(Method::GET, "/api/cookies/get?website=chat.chatgpt.com", Some(&member), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Step 5: Access was recorded
    let (_, body) = context
        .call(Method::GET, "/api/users/me/permissions", Some(&member), None)
        .await;
    assert_eq!(body[0]["website"], "chatgpt.com");
    assert_eq!(body[0]["accessCount"], 1);
    assert_eq!(body[0]["active"], true);
}

#[tokio::test]
async fn test_admin_override_without_grants() {
    let context = TestContext::new();
    let admin = context.admin().await;

    context
        .call(Method::POST, "/api/cookies/upload", Some(&admin), Some(cookies_payload()))
        .await;

    let (status, body) = context
        .call(Method::GET, "/api/cookies/get?website=example.org", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cookies"][0]["name"], "unrelated");

    let (status, body) = context
        .call(Method::POST, "/api/auth/check-plan", Some(&admin), Some(json!({ "website": "anything.com" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn test_expired_permission_is_denied() {
    let context = TestContext::new();
    let admin = context.admin().await;
    context
        .seed_user(
            "lapsed",
            false,
            vec![PermissionGrant {
                website: "chatgpt.com".into(),
                has_access: true,
                expires_at: Some(Utc::now() - Duration::hours(1)),
            }],
        )
        .await;
    let lapsed = context.login("lapsed").await;

    context
        .call(Method::POST, "/api/cookies/upload", Some(&admin), Some(cookies_payload()))
        .await;

    let (status, body) = context
        .call(Method::GET, "/api/cookies/get?website=chatgpt.com", Some(&lapsed), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "website_access_expired");

    let (status, body) = context
        .call(Method::POST, "/api/auth/check-plan", Some(&lapsed), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "no_active_permissions");
}

#[tokio::test]
async fn test_check_plan_reports_expiry() {
    let context = TestContext::new();
    let admin = context.admin().await;
    context.seed_user("planned", false, vec![grant("chatgpt.com")]).await;
    let token = context.login("planned").await;

    let (_, users) = context.call(Method::GET, "/api/users", Some(&admin), None).await;
    let id = users
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["username"] == "planned")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, _) = context
        .call(Method::PUT, &format!("/api/users/{}", id), Some(&admin), Some(json!({ "extendDays": 10 })))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = context
        .call(Method::POST, "/api/auth/check-plan", Some(&token), Some(json!({ "website": "chatgpt.com" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert!(body["daysRemaining"].as_i64().unwrap() >= 9);

    let (status, body) = context
        .call(Method::POST, "/api/auth/check-plan", Some(&token), Some(json!({ "website": "openai.com" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "website_access_expired");
}

#[tokio::test]
async fn test_expired_plan_refuses_login() {
    let context = TestContext::new();
    create_user(
        &context.state,
        CreateUserInput {
            username: "former".into(),
            password: "former-password".into(),
            expiry_date: Some(Utc::now() - Duration::days(1)),
            websites: vec![grant("chatgpt.com")],
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let (status, body) = context
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": "former", "password": "former-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "plan_expired");
}

#[tokio::test]
async fn test_second_login_supersedes_first() {
    let context = TestContext::new();
    context.seed_user("twice", false, vec![]).await;

    let first = context.login("twice").await;
    let second = context.login("twice").await;
    assert_ne!(first, second);

    let (status, _) = context.call(Method::GET, "/api/auth/me", Some(&first), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = context.call(Method::GET, "/api/auth/me", Some(&second), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loginCount"], 2);
}

#[tokio::test]
async fn test_deactivation_ends_sessions() {
    let context = TestContext::new();
    let admin = context.admin().await;
    context.seed_user("victim", false, vec![grant("chatgpt.com")]).await;
    let token = context.login("victim").await;

    let (_, me) = context.call(Method::GET, "/api/auth/me", Some(&token), None).await;
    let id = me["id"].as_str().unwrap().to_string();

    // Step 1: Admin "deletes" the user
    let (status, body) = context
        .call(Method::DELETE, &format!("/api/users/{}", id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isActive"], false);

    // Step 2: The old token is dead
    let (status, _) = context.call(Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Step 3: Logging in again is refused with a reason
    let (status, body) = context
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": "victim", "password": "victim-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "account_deactivated");

    // Step 4: Stats reflect it
    let (_, stats) = context.call(Method::GET, "/api/users/stats", Some(&admin), None).await;
    assert_eq!(stats["totalUsers"], 2);
    assert_eq!(stats["activeUsers"], 1);
    assert_eq!(stats["adminUsers"], 1);
}

#[tokio::test]
async fn test_permission_revocation_ends_sessions() {
    let context = TestContext::new();
    let admin = context.admin().await;
    context.seed_user("granted", false, vec![grant("chatgpt.com")]).await;
    let token = context.login("granted").await;
    let (_, me) = context.call(Method::GET, "/api/auth/me", Some(&token), None).await;
    let id = me["id"].as_str().unwrap().to_string();

    let (status, body) = context
        .call(
            Method::POST,
            &format!("/api/users/{}/permissions", id),
            Some(&admin),
            Some(json!({ "website": "https://openai.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["websitePermissions"].as_array().unwrap().len(), 2);

    // Adding a grant keeps the session
    let (status, _) = context.call(Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = context
        .call(
            Method::DELETE,
            &format!("/api/users/{}/permissions/chatgpt.com", id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = context.call(Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_rotates_and_logout_ends() {
    let context = TestContext::new();
    context.seed_user("rotator", false, vec![]).await;
    let old = context.login("rotator").await;

    let (status, body) = context.call(Method::POST, "/api/auth/refresh", Some(&old), None).await;
    assert_eq!(status, StatusCode::OK);
    let new = body["token"].as_str().unwrap().to_string();
    assert_ne!(old, new);

    let (status, _) = context.call(Method::GET, "/api/auth/me", Some(&old), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = context.call(Method::GET, "/api/auth/me", Some(&new), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loginCount"], 1);

    let (status, _) = context.call(Method::POST, "/api/auth/logout", Some(&new), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = context.call(Method::GET, "/api/auth/me", Some(&new), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_refuse_members() {
    let context = TestContext::new();
    context.seed_user("plain", false, vec![grant("chatgpt.com")]).await;
    let token = context.login("plain").await;

    for (method, uri) in [
        (Method::GET, "/api/users"),
        (Method::GET, "/api/users/stats"),
        (Method::GET, "/api/auth/users"),
        (Method::GET, "/api/cookies"),
        (Method::GET, "/api/website-cookies"),
        (Method::DELETE, "/api/website-cookies/chatgpt.com"),
    ] {
        let (status, _) = context.call(method.clone(), uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{} {}", method, uri);
    }

    let (status, _) = context
        .call(Method::POST, "/api/cookies/upload", Some(&token), Some(cookies_payload()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_website_bundle_versions_are_capped() {
    let context = TestContext::new();
    let admin = context.admin().await;
    context.seed_user("reader", false, vec![grant("chatgpt.com")]).await;
    let reader = context.login("reader").await;

    for i in 1..=7 {
        let (status, body) = context
            .call(
                Method::POST,
                "/api/website-cookies",
                Some(&admin),
                Some(json!({
                    "website": "https://chatgpt.com",
                    "cookies": [{ "name": "session", "value": format!("v{}", i), "domain": ".chatgpt.com" }]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["version"], i);
    }

    let (status, body) = context
        .call(Method::GET, "/api/website-cookies/chatgpt.com/history", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentVersion"], 7);
    let history = body["previousVersions"].as_array().unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0]["version"], 2);
    assert_eq!(history[4]["version"], 6);

    let (status, body) = context
        .call(Method::GET, "/api/website-cookies/chatgpt.com", Some(&reader), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cookies"][0]["value"], "v7");

    let (status, _) = context
        .call(Method::DELETE, "/api/website-cookies/chatgpt.com", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = context
        .call(Method::GET, "/api/website-cookies/chatgpt.com", Some(&reader), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_insert_cookie_file_reports_warnings() {
    let context = TestContext::new();
    let admin = context.admin().await;

    let raw = r#"[
        {"name":"a","value":"1","domain":".chatgpt.com","expiry":"2030-01-01 00:00:00"},
        {"value":"missing name"},
        {"name":"b","value":"2","domain":".openai.com","expiry":1900000000}
    ]"#;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/cookies/insert")
        .header(header::AUTHORIZATION, format!("Bearer {}", admin))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(raw))
        .unwrap();
    let (status, body) = context.send(request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["bundle"]["cookieCount"], 2);
    assert_eq!(body["warnings"].as_array().unwrap().len(), 1);

    let id = body["bundle"]["id"].as_str().unwrap().to_string();
    let (status, body) = context
        .call(Method::GET, &format!("/api/cookies/{}", id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cookies"][0]["expirationDate"], 1893456000.0);

    let (status, body) = context.call(Method::GET, "/api/cookies", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_admin_create_and_replace_permissions() {
    let context = TestContext::new();
    let admin = context.admin().await;

    let (status, body) = context
        .call(
            Method::POST,
            "/api/auth/create",
            Some(&admin),
            Some(json!({
                "username": "created",
                "password": "created-password",
                "websites": [{ "website": "www.ChatGPT.com" }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["websitePermissions"][0]["website"], "chatgpt.com");
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = context
        .call(
            Method::PUT,
            &format!("/api/users/{}/permissions", id),
            Some(&admin),
            Some(json!({ "permissions": [
                { "website": "openai.com" },
                { "website": "chatgpt.com", "hasAccess": false }
            ] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["websitePermissions"].as_array().unwrap().len(), 2);

    let (status, body) = context
        .call(Method::GET, &format!("/api/users/{}", id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "created");

    let (status, _) = context
        .call(Method::GET, &format!("/api/users/{}", uuid::Uuid::new_v4()), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
