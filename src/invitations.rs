//! Invitation issuance and acceptance.
//!
//! One pending invitation per `(tenant, email)`; a second create is a
//! conflict. Acceptance materializes the membership and is idempotent at the
//! membership level — an existing member keeps their current role.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::auth::token;
use crate::error::{ApiError, ForbiddenReason};
use crate::jobs;
use crate::queue::{self, EnqueueOpts};
use crate::store::invitations::{Invitation, InvitationStatus};
use crate::store::members::TenantMember;
use crate::store::{AppState, invitations, members, rbac};
use crate::validation;

/// Role referenced by an invitation or membership must be platform-global or
/// scoped to the same tenant.
async fn check_role_scope(
    state: &AppState,
    tenant_id: Uuid,
    role_id: Uuid,
) -> Result<(), ApiError> {
    let role = rbac::find_role(&state.pool, role_id)
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

#[tracing::instrument(skip(state), fields(%tenant_id, %invited_by), err)]
pub async fn create(
    state: &AppState,
    tenant_id: Uuid,
    invited_by: Uuid,
    email: &str,
    role_id: Uuid,
) -> Result<Invitation, ApiError> {
    validation::check_email(email)?;
    check_role_scope(state, tenant_id, role_id).await?;

    let raw_token = token::generate_invitation_token();
    let expires_at = Utc::now() + Duration::hours(state.config.invitation_ttl_hours);

    let mut tx = state.pool.begin().await?;

    let invitation = match invitations::insert(
        &mut *tx,
        tenant_id,
        email,
        invited_by,
        role_id,
        &raw_token,
        expires_at,
    )
    .await
    {
        Ok(invitation) => invitation,
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            return Err(ApiError::Conflict(
                "a pending invitation already exists for this email".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    queue::enqueue(
        &mut *tx,
        jobs::INVITATION_SEND,
        serde_json::json!({ "invitation_id": invitation.id }),
        EnqueueOpts::default(),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(invitation_id = %invitation.id, "invitation created, send enqueued");
    Ok(invitation)
}

/// Accept by token. The accepting user's registered email must match the
/// invitation (case-insensitive). Replaying a consumed token fails.
#[tracing::instrument(skip(state, raw_token), fields(%accepting_user), err)]
pub async fn accept(
    state: &AppState,
    raw_token: &str,
    accepting_user: Uuid,
) -> Result<TenantMember, ApiError> {
    let invitation = invitations::find_by_token(&state.pool, raw_token)
        .await?
        .ok_or_else(|| ApiError::NotFound("invitation".into()))?;

    if invitation.status != InvitationStatus::Pending.as_str() {
        return Err(ApiError::BadRequest("invitation is no longer valid".into()));
    }

    if invitation.expires_at < Utc::now() {
        invitations::set_status_if(
            &state.pool,
            invitation.id,
            InvitationStatus::Pending,
            InvitationStatus::Expired,
        )
        .await?;
        return Err(ApiError::BadRequest("invitation expired".into()));
    }

    let email = state
        .identity
        .user_email(accepting_user)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    if !email.eq_ignore_ascii_case(&invitation.email) {
        return Err(ApiError::Forbidden(ForbiddenReason::EmailMismatch));
    }

    let mut tx = state.pool.begin().await?;

    let member = members::upsert_active(
        &mut *tx,
        invitation.tenant_id,
        accepting_user,
        invitation.role_id,
    )
    .await?;

    let consumed = invitations::set_status_if(
        &mut *tx,
        invitation.id,
        InvitationStatus::Pending,
        InvitationStatus::Accepted,
    )
    .await?;
    if !consumed {
        // Lost a race with another accept of the same token.
        tx.rollback().await?;
        return Err(ApiError::BadRequest("invitation is no longer valid".into()));
    }

    tx.commit().await?;

    // New membership edge; cached permission sets for this user are stale.
    state.rbac_cache.bump();

    tracing::info!(invitation_id = %invitation.id, tenant_id = %invitation.tenant_id, "invitation accepted");
    Ok(member)
}

/// Cancel a pending invitation (status -> revoked).
pub async fn cancel(state: &AppState, id: Uuid) -> Result<(), ApiError> {
    let invitation = invitations::find(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("invitation".into()))?;

    let cancelled = invitations::set_status_if(
        &state.pool,
        invitation.id,
        InvitationStatus::Pending,
        InvitationStatus::Revoked,
    )
    .await?;
    if !cancelled {
        return Err(ApiError::BadRequest(
            "only pending invitations can be cancelled".into(),
        ));
    }
    Ok(())
}

/// Re-enqueue delivery for a still-pending invitation.
pub async fn resend(state: &AppState, tenant_id: Uuid, id: Uuid) -> Result<(), ApiError> {
    let invitation = invitations::find(&state.pool, id)
        .await?
        .filter(|inv| inv.tenant_id == tenant_id)
        .ok_or_else(|| ApiError::NotFound("invitation".into()))?;

    if invitation.status != InvitationStatus::Pending.as_str() || invitation.expires_at < Utc::now()
    {
        return Err(ApiError::BadRequest(
            "only pending invitations can be resent".into(),
        ));
    }

    queue::enqueue(
        &state.pool,
        jobs::INVITATION_SEND,
        serde_json::json!({ "invitation_id": invitation.id }),
        EnqueueOpts::default(),
    )
    .await?;
    Ok(())
}
