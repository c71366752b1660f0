pub mod auth;
pub mod authorize;
pub mod invitations;
pub mod members;
pub mod platform;
pub mod rbac_admin;
pub mod system_users;
pub mod tenants;

use axum::http::StatusCode;
use axum::{Json, Router};
use serde::Serialize;

use crate::store::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", axum::routing::get(health))
        .merge(auth::router())
        .merge(tenants::router())
        .merge(members::router())
        .merge(invitations::router())
        .merge(authorize::router())
        .merge(platform::router())
        .merge(rbac_admin::router())
        .merge(system_users::router())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

pub fn ok<T: Serialize>(data: T) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "success": true, "data": data })),
    )
}

pub fn ok_message(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "success": true, "message": message })),
    )
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": data })),
    )
}

/// Paged list payload nested under `data`.
#[derive(Debug, Serialize)]
pub struct ListData<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, serde::Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}
