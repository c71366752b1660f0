//! RBAC administration: permissions, policies, roles, and the two relation
//! tables. Platform-admin gated, stateful verification. Every mutation bumps
//! the permission-cache version.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{self, ListData, PageParams};
use crate::auth::gate::{StatefulAuthUser, require_platform_admin};
use crate::error::ApiError;
use crate::store::{AppState, rbac as rbac_store};
use crate::validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/platform/permissions",
            get(list_permissions).post(create_permission),
        )
        .route(
            "/api/v1/platform/permissions/{id}",
            get(get_permission).delete(delete_permission),
        )
        .route(
            "/api/v1/platform/policies",
            get(list_policies).post(create_policy),
        )
        .route(
            "/api/v1/platform/policies/{id}",
            get(get_policy).patch(update_policy).delete(delete_policy),
        )
        .route("/api/v1/platform/roles", get(list_roles).post(create_role))
        .route(
            "/api/v1/platform/roles/{id}",
            get(get_role).patch(update_role).delete(delete_role),
        )
        .route(
            "/api/v1/platform/relations/role-policy",
            post(attach_role_policy).delete(detach_role_policy),
        )
        .route(
            "/api/v1/platform/relations/policy-permission",
            post(attach_policy_permission).delete(detach_policy_permission),
        )
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreatePermissionRequest {
    pub service: String,
    pub entity: String,
    pub action: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePolicyRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
    /// Omit for a platform-global role.
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RolePolicyRelation {
    pub role_id: Uuid,
    pub policy_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct PolicyPermissionRelation {
    pub policy_id: Uuid,
    pub permission_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RoleListFilter {
    pub tenant_id: Option<Uuid>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

fn page_of<T: serde::Serialize>(
    items: Vec<T>,
    total: i64,
    page: Option<i64>,
    limit: i64,
) -> ListData<T> {
    ListData {
        items,
        total,
        page: page.unwrap_or(1).max(1),
        page_size: limit,
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id), err)]
async fn create_permission(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Json(body): Json<CreatePermissionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;
    validation::check_machine_name("service", &body.service)?;
    validation::check_machine_name("entity", &body.entity)?;
    validation::check_machine_name("action", &body.action)?;

    let permission = match rbac_store::insert_permission(
        &state.pool,
        &body.service,
        &body.entity,
        &body.action,
        body.description.as_deref(),
    )
    .await
    {
        Ok(p) => p,
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            return Err(ApiError::Conflict("permission already exists".into()));
        }
        Err(e) => return Err(e.into()),
    };

    state.rbac_cache.bump();
    Ok(api::created(permission))
}

async fn list_permissions(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;
    let (limit, offset) = validation::page_bounds(params.page, params.page_size);
    let (items, total) = rbac_store::list_permissions(&state.pool, limit, offset).await?;
    Ok(api::ok(page_of(items, total, params.page, limit)))
}

async fn get_permission(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;
    let permission = rbac_store::find_permission(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("permission".into()))?;
    Ok(api::ok(permission))
}

#[tracing::instrument(skip(state), fields(actor = %auth.user_id, %id), err)]
async fn delete_permission(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    match rbac_store::delete_permission(&state.pool, id).await {
        Ok(true) => {
            state.rbac_cache.bump();
            Ok(api::ok_message("permission deleted"))
        }
        Ok(false) => Err(ApiError::NotFound("permission".into())),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23503") => Err(
            ApiError::IntegrityViolation("permission is referenced by a policy".into()),
        ),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id), err)]
async fn create_policy(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Json(body): Json<CreatePolicyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;
    validation::check_name("name", &body.name)?;

    let policy = match rbac_store::insert_policy(&state.pool, &body.name, body.description.as_deref())
        .await
    {
        Ok(p) => p,
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            return Err(ApiError::Conflict("policy name already exists".into()));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(api::created(policy))
}

async fn list_policies(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;
    let (limit, offset) = validation::page_bounds(params.page, params.page_size);
    let (items, total) = rbac_store::list_policies(&state.pool, limit, offset).await?;
    Ok(api::ok(page_of(items, total, params.page, limit)))
}

async fn get_policy(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;
    let policy = rbac_store::find_policy(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("policy".into()))?;
    Ok(api::ok(policy))
}

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id, %id), err)]
async fn update_policy(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdatePolicyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let policy =
        rbac_store::update_policy(&state.pool, id, body.name.as_deref(), body.description.as_deref())
            .await?
            .ok_or_else(|| ApiError::NotFound("policy".into()))?;
    Ok(api::ok(policy))
}

#[tracing::instrument(skip(state), fields(actor = %auth.user_id, %id), err)]
async fn delete_policy(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    match rbac_store::delete_policy(&state.pool, id).await {
        Ok(true) => {
            state.rbac_cache.bump();
            Ok(api::ok_message("policy deleted"))
        }
        Ok(false) => Err(ApiError::NotFound("policy".into())),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23503") => Err(
            ApiError::IntegrityViolation("policy is referenced by a role".into()),
        ),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id), err)]
async fn create_role(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Json(body): Json<CreateRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;
    validation::check_name("name", &body.name)?;

    let role = match rbac_store::insert_role(
        &state.pool,
        &body.name,
        body.description.as_deref(),
        body.tenant_id,
    )
    .await
    {
        Ok(r) => r,
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            return Err(ApiError::Conflict("role name already exists in this scope".into()));
        }
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23503") => {
            return Err(ApiError::NotFound("tenant".into()));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(api::created(role))
}

async fn list_roles(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Query(filter): Query<RoleListFilter>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;
    let (limit, offset) = validation::page_bounds(filter.page, filter.page_size);
    let (items, total) =
        rbac_store::list_roles(&state.pool, filter.tenant_id, limit, offset).await?;
    Ok(api::ok(page_of(items, total, filter.page, limit)))
}

async fn get_role(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;
    let role = rbac_store::find_role(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("role".into()))?;
    Ok(api::ok(role))
}

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id, %id), err)]
async fn update_role(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let role =
        rbac_store::update_role(&state.pool, id, body.name.as_deref(), body.description.as_deref())
            .await?
            .ok_or_else(|| ApiError::NotFound("role".into()))?;

    state.rbac_cache.bump();
    Ok(api::ok(role))
}

#[tracing::instrument(skip(state), fields(actor = %auth.user_id, %id), err)]
async fn delete_role(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    let role = rbac_store::find_role(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("role".into()))?;
    if role.is_system {
        return Err(ApiError::BadRequest("system roles cannot be deleted".into()));
    }

    match rbac_store::delete_role(&state.pool, id).await {
        Ok(true) => {
            state.rbac_cache.bump();
            Ok(api::ok_message("role deleted"))
        }
        Ok(false) => Err(ApiError::NotFound("role".into())),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23503") => Err(
            ApiError::IntegrityViolation("role is assigned to tenant members".into()),
        ),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id), err)]
async fn attach_role_policy(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Json(body): Json<RolePolicyRelation>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    rbac_store::find_role(&state.pool, body.role_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("role".into()))?;
    rbac_store::find_policy(&state.pool, body.policy_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("policy".into()))?;

    rbac_store::attach_policy_to_role(&state.pool, body.role_id, body.policy_id).await?;
    state.rbac_cache.bump();
    Ok(api::ok_message("policy attached to role"))
}

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id), err)]
async fn detach_role_policy(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Json(body): Json<RolePolicyRelation>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    if !rbac_store::detach_policy_from_role(&state.pool, body.role_id, body.policy_id).await? {
        return Err(ApiError::NotFound("relation".into()));
    }
    state.rbac_cache.bump();
    Ok(api::ok_message("policy detached from role"))
}

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id), err)]
async fn attach_policy_permission(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Json(body): Json<PolicyPermissionRelation>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    rbac_store::find_policy(&state.pool, body.policy_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("policy".into()))?;
    rbac_store::find_permission(&state.pool, body.permission_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("permission".into()))?;

    rbac_store::attach_permission_to_policy(&state.pool, body.policy_id, body.permission_id).await?;
    state.rbac_cache.bump();
    Ok(api::ok_message("permission attached to policy"))
}

#[tracing::instrument(skip(state, body), fields(actor = %auth.user_id), err)]
async fn detach_policy_permission(
    State(state): State<AppState>,
    StatefulAuthUser(auth): StatefulAuthUser,
    Json(body): Json<PolicyPermissionRelation>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&state, auth.user_id).await?;

    if !rbac_store::detach_permission_from_policy(&state.pool, body.policy_id, body.permission_id)
        .await?
    {
        return Err(ApiError::NotFound("relation".into()));
    }
    state.rbac_cache.bump();
    Ok(api::ok_message("permission detached from policy"))
}
