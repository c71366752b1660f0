//! `invitation.send`: renders and delivers the invitation email.
//!
//! Keyed on the invitation still being pending, so a re-delivered or resent
//! task after acceptance or cancellation is a no-op.

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::mailer::{self, Template};
use crate::queue::Job;
use crate::store::invitations::InvitationStatus;
use crate::store::{AppState, invitations, rbac, tenants};

#[derive(Debug, Deserialize)]
pub struct Payload {
    pub invitation_id: Uuid,
}

#[tracing::instrument(skip(state, job), fields(job_id = %job.id), err)]
pub async fn handle(state: AppState, job: Job) -> anyhow::Result<()> {
    let payload: Payload = serde_json::from_value(job.payload.clone())
        .map_err(|e| anyhow::anyhow!("malformed invitation.send payload: {e}"))?;

    let Some(invitation) = invitations::find(&state.pool, payload.invitation_id).await? else {
        tracing::info!(invitation_id = %payload.invitation_id, "invitation gone, skipping send");
        return Ok(());
    };

    if invitation.status != InvitationStatus::Pending.as_str() {
        tracing::info!(invitation_id = %invitation.id, status = %invitation.status, "invitation no longer pending");
        return Ok(());
    }
    if invitation.expires_at < Utc::now() {
        tracing::info!(invitation_id = %invitation.id, "invitation already expired, skipping send");
        return Ok(());
    }

    let tenant = tenants::find(&state.pool, invitation.tenant_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("tenant missing for invitation {}", invitation.id))?;
    let role = rbac::find_role(&state.pool, invitation.role_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("role missing for invitation {}", invitation.id))?;

    let accept_url = format!(
        "{}/invitations/{}/accept",
        state.config.invitation_base_url.trim_end_matches('/'),
        invitation.token
    );

    let rendered = mailer::render(
        Template::Invitation,
        &serde_json::json!({
            "tenant_name": tenant.name,
            "role_name": role.name,
            "accept_url": accept_url,
            "expires_at": invitation.expires_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        }),
    )?;

    mailer::send(&state.config, &invitation.email, &rendered.subject, &rendered.body).await
}
