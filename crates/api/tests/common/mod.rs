#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tidings_core::config::ActivityConfig;
use tidings_core::entity::EntityRef;
use tidings_db::Storage;
use tidings_events::{ActivityServices, NotifiableRegistry, OptionalTargetRegistry};
use tower::ServiceExt;

use tidings_api::auth::jwt::{generate_access_token, JwtConfig};
use tidings_api::auth::{ROLE_ADMIN, ROLE_SERVICE, ROLE_TARGET};
use tidings_api::config::ServerConfig;
use tidings_api::router::build_app_router;
use tidings_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults and no database.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        database_url: None,
        notifiable_config_path: None,
        template_dir: None,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough".to_string(),
            access_token_expiry_mins: 5,
        },
    }
}

/// Full application router over in-memory storage.
///
/// `Router` is cheap to clone and every clone shares the same storage, so a
/// test can build one app and `.clone()` it per request.
pub fn build_test_app() -> Router {
    build_test_app_with(ActivityConfig {
        subscription_enabled: true,
        ..ActivityConfig::default()
    })
}

pub fn build_test_app_with(activity: ActivityConfig) -> Router {
    let config = test_config();
    let services = ActivityServices::new(
        Arc::new(activity),
        Storage::in_memory(),
        NotifiableRegistry::new(),
        OptionalTargetRegistry::new(),
        None,
    );
    let state = AppState {
        config: Arc::new(config.clone()),
        services,
    };
    build_app_router(state, &config)
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

pub fn token(subject: &EntityRef, role: &str) -> String {
    generate_access_token(subject, role, &test_config().jwt).unwrap()
}

pub fn target_token(target_type: &str, id: i64) -> String {
    token(&EntityRef::new(target_type, id), ROLE_TARGET)
}

pub fn service_token() -> String {
    token(&EntityRef::new("Service", 1), ROLE_SERVICE)
}

pub fn admin_token() -> String {
    token(&EntityRef::new("Admin", 1), ROLE_ADMIN)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };
    app.oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn post_json(
    app: Router,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn post(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), None).await
}

pub async fn put(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::PUT, uri, Some(token), None).await
}

pub async fn put_json(
    app: Router,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Response<Body> {
    send(app, Method::PUT, uri, Some(token), Some(body)).await
}

pub async fn delete(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, Some(token), None).await
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Register `User#id` in the target directory.
pub async fn register_user(app: &Router, id: i64) {
    let response = put_json(
        app.clone(),
        &format!("/api/v1/targets/User/{id}/profile"),
        &service_token(),
        serde_json::json!({ "email": format!("user{id}@example.com") }),
    )
    .await;
    assert_eq!(response.status(), 200);
}

/// Notify `User#user_id` about `Comment#comment_id` under `key`.
pub async fn notify_user(
    app: &Router,
    user_id: i64,
    comment_id: i64,
    key: &str,
) -> serde_json::Value {
    let response = post_json(
        app.clone(),
        "/api/v1/notify",
        &service_token(),
        serde_json::json!({
            "targets": [{ "type": "User", "id": user_id }],
            "notifiable": { "type": "Comment", "id": comment_id },
            "key": key,
        }),
    )
    .await;
    assert_eq!(response.status(), 201);
    body_json(response).await
}
