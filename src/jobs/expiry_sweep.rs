//! `system_user.expiry_sweep`: deactivates credentials whose grace period
//! has lapsed and revokes their sessions.
//!
//! Sessions are revoked before each row flips inactive: if the sweep dies
//! partway, the untouched rows are still active and the next sweep picks
//! them up. Revocation is idempotent, so re-delivery is harmless.

use crate::queue::Job;
use crate::store::{AppState, system_users};

#[tracing::instrument(skip(state, _job), err)]
pub async fn handle(state: AppState, _job: Job) -> anyhow::Result<()> {
    let expired = system_users::list_expired(&state.pool).await?;

    if expired.is_empty() {
        tracing::debug!("expiry sweep found nothing to do");
        return Ok(());
    }

    for credential in &expired {
        state
            .identity
            .revoke_all_sessions_for_user(credential.external_user_id)
            .await
            .map_err(|e| {
                anyhow::anyhow!("session revocation for {} failed: {e}", credential.name)
            })?;

        let flipped = system_users::deactivate_if_expired(&state.pool, credential.id).await?;
        if flipped {
            tracing::info!(
                credential = %credential.name,
                application = %credential.application_name,
                "expired credential deactivated"
            );
        }
    }

    Ok(())
}
