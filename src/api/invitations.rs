//! Invitation endpoints. Creation and listing live under the tenant;
//! acceptance and cancellation are addressed by token and id, since the
//! caller may not know the tenant yet.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{self, ListData};
use crate::auth::gate::{AuthUser, require_permission, require_tenant_access};
use crate::error::ApiError;
use crate::invitations;
use crate::rbac::PermissionKey;
use crate::store::invitations::InvitationStatus;
use crate::store::{AppState, invitations as invitations_store};
use crate::validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/tenants/{id}/invitations",
            get(list_invitations).post(create_invitation),
        )
        .route(
            "/api/v1/tenants/{id}/invitations/{invitation_id}/resend",
            post(resend_invitation),
        )
        .route("/api/v1/invitations/{id}/accept", post(accept_invitation))
        .route("/api/v1/invitations/{id}", delete(cancel_invitation))
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    pub email: String,
    pub role_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListFilter {
    pub status: Option<InvitationStatus>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(%tenant_id, inviter = %auth.user_id), err)]
async fn create_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tenant_id): Path<Uuid>,
    Json(body): Json<CreateInvitationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let access = require_tenant_access(&state, auth.user_id, tenant_id).await?;
    require_permission(
        &state,
        &access,
        auth.user_id,
        &PermissionKey::new("tenant-api", "invitation", "create"),
    )
    .await?;

    let invitation =
        invitations::create(&state, tenant_id, auth.user_id, &body.email, body.role_id).await?;

    // Whether the address already belongs to an account is a UX hint only;
    // it changes nothing server-side.
    let email_exists = state.identity.email_exists(&body.email).await.unwrap_or(false);

    Ok(api::created(serde_json::json!({
        "invitation": invitation,
        "email_exists": email_exists,
    })))
}

async fn list_invitations(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tenant_id): Path<Uuid>,
    Query(filter): Query<ListFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let access = require_tenant_access(&state, auth.user_id, tenant_id).await?;
    require_permission(
        &state,
        &access,
        auth.user_id,
        &PermissionKey::new("tenant-api", "invitation", "read"),
    )
    .await?;

    let (limit, offset) = validation::page_bounds(filter.page, filter.page_size);
    let (items, total) =
        invitations_store::list(&state.pool, tenant_id, filter.status, limit, offset).await?;

    Ok(api::ok(ListData {
        items,
        total,
        page: filter.page.unwrap_or(1).max(1),
        page_size: limit,
    }))
}

#[tracing::instrument(skip(state), fields(%tenant_id, %invitation_id, actor = %auth.user_id), err)]
async fn resend_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((tenant_id, invitation_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let access = require_tenant_access(&state, auth.user_id, tenant_id).await?;
    require_permission(
        &state,
        &access,
        auth.user_id,
        &PermissionKey::new("tenant-api", "invitation", "create"),
    )
    .await?;

    invitations::resend(&state, tenant_id, invitation_id).await?;
    Ok(api::ok_message("invitation resent"))
}

/// Gate A only: the accepting user is not a member yet. The token plus the
/// email match are the authorization.
#[tracing::instrument(skip(state, token), fields(user_id = %auth.user_id), err)]
async fn accept_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let member = invitations::accept(&state, &token, auth.user_id).await?;
    Ok(api::ok(member))
}

#[tracing::instrument(skip(state), fields(%id, actor = %auth.user_id), err)]
async fn cancel_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    // Tenant comes from the invitation row; gates run against it.
    let invitation = invitations_store::find(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("invitation".into()))?;

    let access = require_tenant_access(&state, auth.user_id, invitation.tenant_id).await?;
    require_permission(
        &state,
        &access,
        auth.user_id,
        &PermissionKey::new("tenant-api", "invitation", "delete"),
    )
    .await?;

    invitations::cancel(&state, id).await?;
    Ok(api::ok_message("invitation cancelled"))
}
