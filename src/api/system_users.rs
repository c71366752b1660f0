//! Machine-credential administration. Platform-admin gated with stateful
//! verification: a revoked operator cannot keep minting credentials on a
//! not-yet-expired token.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{self, ListData};
use crate::auth::gate::{StatefulAuthUser, require_platform_admin};
use crate::error::ApiError;
use crate::store::system_users::{ListFilter, ServiceType};
use crate::store::{AppState, system_users as store};
use crate::system_users;
use crate::validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/platform/system-users",
            get(list_system_users).post(create_system_user),
        )
        .route(
            "/api/v1/platform/system-users/revoke-old",
            post(revoke_old),
        )
        .route(
            "/api/v1/platform/system-users/applications/{name}",
            get(list_for_application),
        )
        .route(
            "/api/v1/platform/system-users/{id}",
            get(get_system_user).patch(update_system_user),
        )
        .route("/api/v1/platform/system-users/{id}/rotate", post(rotate))
        .route(
            "/api/v1/platform/system-users/{id}/regenerate",
            post(regenerate_password),
        )
        .route(
            "/api/v1/platform/system-users/{id}/deactivate",
            post(deactivate),
        )
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSystemUserRequest {
    pub application_name: String,
    pub service_type: ServiceType,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSystemUserRequest {
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct RotateRequest {
    pub grace_period_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeOldRequest {
    pub application_name: String,
}

#[derive(Debug, Deserialize)]
pub struct SystemUserFilter {
    pub application_name: Option<String>,
    pub service_type: Option<ServiceType>,
    pub is_active: Option<bool>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id, application = %body.application_name), err)]
async fn create_system_user(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Json(body): Json<CreateSystemUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let metadata = if body.metadata.is_null() {
        serde_json::json!({})
    } else {
        body.metadata
    };
    let issued = system_users::create(
        &state,
        &body.application_name,
        body.service_type,
        metadata,
        auth.user_id,
    )
    .await?;
    Ok(api::created(issued))
}

async fn list_system_users(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Query(filter): Query<SystemUserFilter>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let (limit, offset) = validation::page_bounds(filter.page, filter.page_size);
    let (items, total) = store::list(
        &state.pool,
        &ListFilter {
            application_name: filter.application_name,
            service_type: filter.service_type,
            is_active: filter.is_active,
        },
        limit,
        offset,
    )
    .await?;

    Ok(api::ok(ListData {
        items,
        total,
        page: filter.page.unwrap_or(1).max(1),
        page_size: limit,
    }))
}

async fn get_system_user(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let credential = store::find(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("system user".into()))?;
    Ok(api::ok(credential))
}

async fn list_for_application(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let credentials = store::list_for_application(&state.pool, &name).await?;
    Ok(api::ok(credentials))
}

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id, %id), err)]
async fn update_system_user(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateSystemUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let credential = store::update_metadata(&state.pool, id, &body.metadata)
        .await?
        .ok_or_else(|| ApiError::NotFound("system user".into()))?;
    Ok(api::ok(credential))
}

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id, %id), err)]
async fn rotate(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RotateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let outcome = system_users::rotate(&state, id, body.grace_period_days, auth.user_id).await?;
    Ok(api::ok(outcome))
}

#[tracing::instrument(skip(state), fields(actor = %auth.user_id, %id), err)]
async fn regenerate_password(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let issued = system_users::regenerate_password(&state, id).await?;
    Ok(api::ok(issued))
}

#[tracing::instrument(skip(state), fields(actor = %auth.user_id, %id), err)]
async fn deactivate(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let credential = system_users::deactivate(&state, id).await?;
    Ok(api::ok(credential))
}

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id, application = %body.application_name), err)]
async fn revoke_old(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Json(body): Json<RevokeOldRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let retired = system_users::revoke_old(&state, &body.application_name).await?;
    Ok(api::ok(serde_json::json!({
        "revoked": retired.len(),
        "credentials": retired,
    })))
}
