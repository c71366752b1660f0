//! Tenant lifecycle: provisioning is asynchronous — the tenant is created
//! `pending` together with its creator's Admin membership, and an
//! initialization task flips it `active` once the side-effects succeed.

use uuid::Uuid;

use crate::error::ApiError;
use crate::jobs;
use crate::queue::{self, EnqueueOpts};
use crate::store::tenants::Tenant;
use crate::store::{AppState, bootstrap, members, rbac, tenants};
use crate::validation;

/// Creates the tenant, its creator's membership, and the initialization task
/// in one transaction, so a cancelled request leaves nothing behind.
#[tracing::instrument(skip(state, metadata), fields(%user_id, %slug), err)]
pub async fn create(
    state: &AppState,
    user_id: Uuid,
    name: &str,
    slug: &str,
    metadata: serde_json::Value,
) -> Result<Tenant, ApiError> {
    validation::check_name("name", name)?;
    validation::check_slug(slug)?;

    let admin_role = rbac::find_role_by_name(&state.pool, bootstrap::CREATOR_ROLE)
        .await?
        .ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!("seed role {} missing", bootstrap::CREATOR_ROLE))
        })?;

    let mut tx = state.pool.begin().await?;

    let tenant = match tenants::insert(&mut *tx, name, slug, &metadata, user_id).await {
        Ok(tenant) => tenant,
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            return Err(ApiError::Conflict("slug already taken".into()));
        }
        Err(e) => return Err(e.into()),
    };

    members::insert(
        &mut *tx,
        tenant.id,
        user_id,
        admin_role.id,
        members::MemberStatus::Active,
    )
    .await?;

    // Last step before commit: a rollback takes the task with it.
    queue::enqueue(
        &mut *tx,
        jobs::TENANT_INITIALIZE,
        serde_json::json!({ "tenant_id": tenant.id }),
        EnqueueOpts::default(),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(tenant_id = %tenant.id, "tenant created, initialization enqueued");
    Ok(tenant)
}

#[derive(Debug, Default)]
pub struct TenantPatch {
    pub name: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub status: Option<tenants::TenantStatus>,
}

/// Metadata and name are last-writer-wins; status transitions (suspension)
/// are reserved for platform admins and checked by the caller.
pub async fn update(state: &AppState, id: Uuid, patch: TenantPatch) -> Result<Tenant, ApiError> {
    if let Some(ref name) = patch.name {
        validation::check_name("name", name)?;
    }

    tenants::update(
        &state.pool,
        id,
        patch.name.as_deref(),
        patch.metadata.as_ref(),
        patch.status,
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("tenant".into()))
}

/// Cascades to members, invitations, and tenant-scoped roles.
pub async fn delete(state: &AppState, id: Uuid) -> Result<(), ApiError> {
    if !tenants::delete(&state.pool, id).await? {
        return Err(ApiError::NotFound("tenant".into()));
    }
    // Membership edges are gone; drop any cached grants.
    state.rbac_cache.bump();
    Ok(())
}
