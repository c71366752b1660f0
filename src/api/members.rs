//! Member management within a tenant. All routes gate on authentication,
//! tenant access, and a member permission.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{self, ListData, PageParams};
use crate::auth::gate::{AuthUser, require_permission, require_tenant_access};
use crate::error::ApiError;
use crate::rbac::PermissionKey;
use crate::store::members::MemberStatus;
use crate::store::{AppState, members, rbac as rbac_store};
use crate::validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/tenants/{id}/members",
            get(list_members).post(add_member),
        )
        .route(
            "/api/v1/tenants/{id}/members/{user_id}",
            axum::routing::patch(update_member).delete(remove_member),
        )
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    pub role_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub role_id: Option<Uuid>,
    pub status: Option<MemberStatus>,
}

/// Role must be platform-global or scoped to this tenant.
async fn check_role_scope(
    state: &AppState,
    tenant_id: Uuid,
    role_id: Uuid,
) -> Result<(), ApiError> {
    let role = rbac_store::find_role(&state.pool, role_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("role".into()))?;
    match role.tenant_id {
        None => Ok(()),
        Some(scope) if scope == tenant_id => Ok(()),
        Some(_) => Err(ApiError::BadRequest(
            "role is scoped to a different tenant".into(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tenant_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let access = require_tenant_access(&state, auth.user_id, tenant_id).await?;
    require_permission(
        &state,
        &access,
        auth.user_id,
        &PermissionKey::new("tenant-api", "member", "read"),
    )
    .await?;

    let (limit, offset) = validation::page_bounds(params.page, params.page_size);
    let (items, total) = members::list(&state.pool, tenant_id, limit, offset).await?;

    Ok(api::ok(ListData {
        items,
        total,
        page: params.page.unwrap_or(1).max(1),
        page_size: limit,
    }))
}

#[tracing::instrument(skip(state, body), fields(%tenant_id, actor = %auth.user_id), err)]
async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tenant_id): Path<Uuid>,
    Json(body): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let access = require_tenant_access(&state, auth.user_id, tenant_id).await?;
    require_permission(
        &state,
        &access,
        auth.user_id,
        &PermissionKey::new("tenant-api", "member", "create"),
    )
    .await?;
    check_role_scope(&state, tenant_id, body.role_id).await?;

    let member = match members::insert(
        &state.pool,
        tenant_id,
        body.user_id,
        body.role_id,
        MemberStatus::Active,
    )
    .await
    {
        Ok(member) => member,
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            return Err(ApiError::Conflict("user is already a member".into()));
        }
        Err(e) => return Err(e.into()),
    };

    state.rbac_cache.bump();
    Ok(api::created(member))
}

#[tracing::instrument(skip(state, body), fields(%tenant_id, %user_id, actor = %auth.user_id), err)]
async fn update_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((tenant_id, user_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let access = require_tenant_access(&state, auth.user_id, tenant_id).await?;
    require_permission(
        &state,
        &access,
        auth.user_id,
        &PermissionKey::new("tenant-api", "member", "update"),
    )
    .await?;

    let mut member = members::find(&state.pool, tenant_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("member".into()))?;

    if let Some(role_id) = body.role_id {
        check_role_scope(&state, tenant_id, role_id).await?;
        member = members::set_role(&state.pool, tenant_id, user_id, role_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("member".into()))?;
    }

    if let Some(status) = body.status {
        member = members::set_status(&state.pool, tenant_id, user_id, status)
            .await?
            .ok_or_else(|| ApiError::NotFound("member".into()))?;
    }

    state.rbac_cache.bump();
    Ok(api::ok(member))
}

#[tracing::instrument(skip(state), fields(%tenant_id, %user_id, actor = %auth.user_id), err)]
async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((tenant_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let access = require_tenant_access(&state, auth.user_id, tenant_id).await?;
    require_permission(
        &state,
        &access,
        auth.user_id,
        &PermissionKey::new("tenant-api", "member", "delete"),
    )
    .await?;

    if !members::remove(&state.pool, tenant_id, user_id).await? {
        return Err(ApiError::NotFound("member".into()));
    }

    state.rbac_cache.bump();
    Ok(api::ok_message("member removed"))
}
