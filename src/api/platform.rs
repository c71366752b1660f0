//! Platform-admin surface: cross-tenant reads, admin grants, and queue
//! introspection. Stateful verification throughout, so a revoked admin
//! loses access on the next request.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{self, ListData, PageParams};
use crate::auth::gate::{StatefulAuthUser, require_platform_admin};
use crate::error::ApiError;
use crate::queue;
use crate::store::{AppState, platform_admins, tenants};
use crate::validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/platform/tenants", get(list_all_tenants))
        .route("/api/v1/platform/tenants/{id}", get(get_any_tenant))
        .route(
            "/api/v1/platform/admins",
            get(list_admins).post(grant_admin),
        )
        .route(
            "/api/v1/platform/admins/{user_id}",
            axum::routing::delete(revoke_admin),
        )
        .route("/api/v1/platform/jobs", get(list_jobs))
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GrantAdminRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct JobsFilter {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_all_tenants(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let (limit, offset) = validation::page_bounds(params.page, params.page_size);
    let (items, total) = tenants::list_all(&state.pool, limit, offset).await?;

    Ok(api::ok(ListData {
        items,
        total,
        page: params.page.unwrap_or(1).max(1),
        page_size: limit,
    }))
}

async fn get_any_tenant(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let tenant = tenants::find(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("tenant".into()))?;
    Ok(api::ok(tenant))
}

async fn list_admins(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let (limit, offset) = validation::page_bounds(params.page, params.page_size);
    let (items, total) = platform_admins::list(&state.pool, limit, offset).await?;

    Ok(api::ok(ListData {
        items,
        total,
        page: params.page.unwrap_or(1).max(1),
        page_size: limit,
    }))
}

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id, grantee = %body.user_id), err)]
async fn grant_admin(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Json(body): Json<GrantAdminRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    platform_admins::grant(&state.pool, body.user_id, auth.user_id).await?;
    Ok(api::created(serde_json::json!({ "user_id": body.user_id })))
}

#[tracing::instrument(skip(state), fields(actor = %auth.user_id, %user_id), err)]
async fn revoke_admin(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    if !platform_admins::revoke(&state.pool, user_id).await? {
        return Err(ApiError::NotFound("platform admin".into()));
    }
    Ok(api::ok_message("platform admin revoked"))
}

/// Dead-lettered and in-flight tasks, for operators.
async fn list_jobs(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Query(filter): Query<JobsFilter>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let status = filter.status.as_deref().unwrap_or(queue::STATUS_DEAD);
    let (limit, offset) = validation::page_bounds(filter.page, filter.page_size);
    let (items, total) = queue::list_by_status(&state.pool, status, limit, offset).await?;

    Ok(api::ok(ListData {
        items,
        total,
        page: filter.page.unwrap_or(1).max(1),
        page_size: limit,
    }))
}
