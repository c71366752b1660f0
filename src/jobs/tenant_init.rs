//! `tenant.initialize`: provisioning side-effects for a freshly created
//! tenant, then the pending -> active flip.
//!
//! Idempotent: a tenant that already left `pending` is skipped, and the
//! downstream calls carry the tenant id so receivers can dedupe.

use serde::Deserialize;
use uuid::Uuid;

use crate::queue::Job;
use crate::store::tenants::TenantStatus;
use crate::store::{AppState, tenants};

#[derive(Debug, Deserialize)]
pub struct Payload {
    pub tenant_id: Uuid,
}

#[tracing::instrument(skip(state, job), fields(job_id = %job.id), err)]
pub async fn handle(state: AppState, job: Job) -> anyhow::Result<()> {
    let payload: Payload = serde_json::from_value(job.payload.clone())
        .map_err(|e| anyhow::anyhow!("malformed tenant.initialize payload: {e}"))?;

    let Some(tenant) = tenants::find(&state.pool, payload.tenant_id).await? else {
        // Deleted before initialization ran; nothing to do.
        tracing::info!(tenant_id = %payload.tenant_id, "tenant gone, skipping initialization");
        return Ok(());
    };

    if tenant.status != TenantStatus::Pending.as_str() {
        tracing::info!(tenant_id = %tenant.id, status = %tenant.status, "tenant already initialized");
        return Ok(());
    }

    for endpoint in &state.config.tenant_init_services {
        call_init_service(&state, endpoint, &tenant.id, &tenant.slug).await?;
    }

    let flipped =
        tenants::set_status_if(&state.pool, tenant.id, TenantStatus::Pending, TenantStatus::Active)
            .await?;
    if flipped {
        tracing::info!(tenant_id = %tenant.id, "tenant activated");
    }
    Ok(())
}

/// One provisioning call. Any non-2xx response is an error so the queue
/// retries the whole task.
async fn call_init_service(
    state: &AppState,
    endpoint: &str,
    tenant_id: &Uuid,
    slug: &str,
) -> anyhow::Result<()> {
    let response = state
        .http
        .post(endpoint)
        .json(&serde_json::json!({ "tenant_id": tenant_id, "slug": slug }))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("init call to {endpoint} failed: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("init call to {endpoint} returned {status}");
    }
    tracing::info!(endpoint, %tenant_id, "init service called");
    Ok(())
}
