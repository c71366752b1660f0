//! Tenant CRUD and initialization status.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{self, ListData, PageParams};
use crate::auth::gate::{AuthUser, require_permission, require_tenant_access};
use crate::error::ApiError;
use crate::rbac::PermissionKey;
use crate::store::tenants::TenantStatus;
use crate::store::{AppState, tenants as tenants_store};
use crate::tenants::{self, TenantPatch};
use crate::validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/tenants", get(list_tenants).post(create_tenant))
        .route(
            "/api/v1/tenants/{id}",
            get(get_tenant).patch(update_tenant).delete(delete_tenant),
        )
        .route("/api/v1/tenants/{id}/status", get(tenant_status))
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTenantRequest {
    pub name: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub status: Option<TenantStatus>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_tenants(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (limit, offset) = validation::page_bounds(params.page, params.page_size);
    let (items, total) =
        tenants_store::list_for_user(&state.pool, auth.user_id, limit, offset).await?;

    Ok(api::ok(ListData {
        items,
        total,
        page: params.page.unwrap_or(1).max(1),
        page_size: limit,
    }))
}

#[tracing::instrument(skip(state, body), fields(user_id = %auth.user_id, slug = %body.slug), err)]
async fn create_tenant(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateTenantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let metadata = if body.metadata.is_null() {
        serde_json::json!({})
    } else {
        body.metadata
    };
    let tenant = tenants::create(&state, auth.user_id, &body.name, &body.slug, metadata).await?;
    Ok(api::created(tenant))
}

async fn get_tenant(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_tenant_access(&state, auth.user_id, id).await?;

    let tenant = tenants_store::find(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("tenant".into()))?;
    Ok(api::ok(tenant))
}

#[tracing::instrument(skip(state, body), fields(user_id = %auth.user_id, %id), err)]
async fn update_tenant(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTenantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let access = require_tenant_access(&state, auth.user_id, id).await?;
    require_permission(
        &state,
        &access,
        auth.user_id,
        &PermissionKey::new("tenant-api", "tenant", "update"),
    )
    .await?;

    // Suspension and reactivation are platform-admin operations.
    if body.status.is_some() && !access.is_platform_admin {
        return Err(ApiError::Forbidden(
            crate::error::ForbiddenReason::NotPlatformAdmin,
        ));
    }

    let tenant = tenants::update(
        &state,
        id,
        TenantPatch {
            name: body.name,
            metadata: body.metadata,
            status: body.status,
        },
    )
    .await?;
    Ok(api::ok(tenant))
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id, %id), err)]
async fn delete_tenant(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let access = require_tenant_access(&state, auth.user_id, id).await?;
    require_permission(
        &state,
        &access,
        auth.user_id,
        &PermissionKey::new("tenant-api", "tenant", "delete"),
    )
    .await?;

    tenants::delete(&state, id).await?;
    Ok(api::ok_message("tenant deleted"))
}

async fn tenant_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_tenant_access(&state, auth.user_id, id).await?;

    let tenant = tenants_store::find(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("tenant".into()))?;
    Ok(api::ok(serde_json::json!({
        "id": tenant.id,
        "status": tenant.status,
    })))
}
