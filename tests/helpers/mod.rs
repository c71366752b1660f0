#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use atrium::config::{AppEnv, Config};
use atrium::identity::VerifyMode;
use atrium::identity::local::LocalIdentity;
use atrium::rbac::cache::PermissionCache;
use atrium::store::AppState;

pub fn test_config() -> Config {
    Config {
        app_env: AppEnv::Development,
        listen_addr: "127.0.0.1:0".into(),
        database_url: String::new(),
        identity_connection_uri: "embedded".into(),
        identity_api_key: "test-signing-key".into(),
        access_token_validity_human_seconds: 3600,
        access_token_validity_system_seconds: 86400,
        token_mode: VerifyMode::Stateless,
        invitation_base_url: "http://localhost:8080".into(),
        invitation_ttl_hours: 72,
        credential_grace_period_days: 7,
        tenant_init_services: Vec::new(),
        smtp_host: None,
        smtp_port: 587,
        smtp_from: "test@localhost".into(),
        smtp_username: None,
        smtp_password: None,
        queue_poll_interval_ms: 50,
    }
}

/// Build a test `AppState` on the given pool with the RBAC vocabulary seeded.
pub async fn test_state(pool: PgPool) -> AppState {
    test_state_with(pool, test_config()).await
}

pub async fn test_state_with(pool: PgPool, config: Config) -> AppState {
    atrium::store::bootstrap::run(&pool)
        .await
        .expect("bootstrap failed");

    let identity = Arc::new(LocalIdentity::new(pool.clone(), &config));

    AppState {
        pool,
        identity,
        config: Arc::new(config),
        rbac_cache: Arc::new(PermissionCache::new()),
        http: reqwest::Client::new(),
    }
}

pub fn test_router(state: AppState) -> Router {
    atrium::api::router().with_state(state)
}

/// Run every due queued task inline (no background worker in tests).
pub async fn drain_jobs(state: &AppState) {
    atrium::queue::worker::drain(state, &atrium::jobs::registry())
        .await
        .expect("drain failed");
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

async fn send(
    app: &Router,
    method: &str,
    token: Option<&str>,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub async fn get_json(app: &Router, token: &str, path: &str) -> (StatusCode, Value) {
    send(app, "GET", Some(token), path, None).await
}

pub async fn get_json_anon(app: &Router, path: &str) -> (StatusCode, Value) {
    send(app, "GET", None, path, None).await
}

pub async fn post_json(app: &Router, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", Some(token), path, Some(body)).await
}

pub async fn post_json_anon(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", None, path, Some(body)).await
}

pub async fn patch_json(app: &Router, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    send(app, "PATCH", Some(token), path, Some(body)).await
}

pub async fn delete_json(app: &Router, token: &str, path: &str) -> (StatusCode, Value) {
    send(app, "DELETE", Some(token), path, None).await
}

pub async fn delete_json_with_body(
    app: &Router,
    token: &str,
    path: &str,
    body: Value,
) -> (StatusCode, Value) {
    send(app, "DELETE", Some(token), path, Some(body)).await
}

// ---------------------------------------------------------------------------
// Scenario helpers
// ---------------------------------------------------------------------------

/// Sign up a user; returns `(user_id, access_token)`.
pub async fn signup(app: &Router, email: &str, password: &str) -> (Uuid, String) {
    let (status, body) = post_json_anon(
        app,
        "/auth/signup",
        serde_json::json!({ "email": email, "password": password }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "signup failed: {body}");
    let user_id: Uuid = body["data"]["user_id"].as_str().unwrap().parse().unwrap();
    let token = body["data"]["access_token"].as_str().unwrap().to_owned();
    (user_id, token)
}

/// Sign in; returns the access token.
pub async fn signin(app: &Router, email: &str, password: &str) -> String {
    let (status, body) = post_json_anon(
        app,
        "/auth/signin",
        serde_json::json!({ "email": email, "password": password }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "signin failed: {body}");
    body["data"]["access_token"].as_str().unwrap().to_owned()
}

/// Create a tenant; returns its id.
pub async fn create_tenant(app: &Router, token: &str, name: &str, slug: &str) -> Uuid {
    let (status, body) = post_json(
        app,
        token,
        "/api/v1/tenants",
        serde_json::json!({ "name": name, "slug": slug }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create tenant failed: {body}");
    body["data"]["id"].as_str().unwrap().parse().unwrap()
}

/// Tests grant the first platform admin directly; in production this is an
/// operational seeding step.
pub async fn grant_platform_admin(pool: &PgPool, user_id: Uuid) {
    sqlx::query("INSERT INTO platform_admins (user_id, created_by) VALUES ($1, $1) ON CONFLICT DO NOTHING")
        .bind(user_id)
        .execute(pool)
        .await
        .expect("grant platform admin failed");
}

/// Global role id by name (seeded by bootstrap).
pub async fn role_id(pool: &PgPool, name: &str) -> Uuid {
    sqlx::query_scalar("SELECT id FROM roles WHERE name = $1 AND tenant_id IS NULL")
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("role lookup failed")
}

/// Raw invitation token straight from the store, standing in for the email
/// link the invitee would click.
pub async fn invitation_token(pool: &PgPool, invitation_id: Uuid) -> String {
    sqlx::query_scalar("SELECT token FROM invitations WHERE id = $1")
        .bind(invitation_id)
        .fetch_one(pool)
        .await
        .expect("invitation token lookup failed")
}
