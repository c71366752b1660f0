//! Permission evaluation over the layered graph
//! user -> member -> role -> policy -> permission.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::rbac::key::PermissionKey;
use crate::store::{AppState, members, platform_admins, rbac as rbac_store};

pub const REASON_PLATFORM_ADMIN: &str = "platform_admin";
pub const REASON_NOT_A_MEMBER: &str = "not_a_member";
pub const REASON_PERMISSION_NOT_GRANTED: &str = "permission_not_granted";
pub const REASON_GRANTED: &str = "granted";

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: &'static str,
}

impl Decision {
    fn allow(reason: &'static str) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: &'static str) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// Full access-gating check, platform-admin bypass included.
#[tracing::instrument(skip(state), fields(%tenant_id, %user_id, permission = %key))]
pub async fn check(
    state: &AppState,
    tenant_id: Uuid,
    user_id: Uuid,
    key: &PermissionKey,
) -> Result<Decision, ApiError> {
    if platform_admins::is_admin(&state.pool, user_id).await? {
        return Ok(Decision::allow(REASON_PLATFORM_ADMIN));
    }
    check_membership(state, tenant_id, user_id, key).await
}

/// Membership-scoped check without the platform-admin step, for callers
/// asking about business semantics rather than access gating.
pub async fn check_membership(
    state: &AppState,
    tenant_id: Uuid,
    user_id: Uuid,
    key: &PermissionKey,
) -> Result<Decision, ApiError> {
    if members::find_active(&state.pool, tenant_id, user_id)
        .await?
        .is_none()
    {
        return Ok(Decision::deny(REASON_NOT_A_MEMBER));
    }

    let keys = resolved_keys(state, tenant_id, user_id).await?;
    if keys.contains(&key.canonical()) {
        Ok(Decision::allow(REASON_GRANTED))
    } else {
        Ok(Decision::deny(REASON_PERMISSION_NOT_GRANTED))
    }
}

/// Every permission key the user holds in the tenant, sorted.
pub async fn list_permissions_for_user(
    state: &AppState,
    tenant_id: Uuid,
    user_id: Uuid,
) -> Result<Vec<String>, ApiError> {
    let keys = resolved_keys(state, tenant_id, user_id).await?;
    let mut out: Vec<String> = keys.iter().cloned().collect();
    out.sort();
    Ok(out)
}

/// Cache-aside resolution. The version is snapshotted before the database
/// read so a concurrent graph edit invalidates what we are about to write.
async fn resolved_keys(
    state: &AppState,
    tenant_id: Uuid,
    user_id: Uuid,
) -> Result<Arc<HashSet<String>>, ApiError> {
    let version = state.rbac_cache.version();
    if let Some(hit) = state.rbac_cache.get(tenant_id, user_id, version) {
        return Ok(hit);
    }

    let triples = rbac_store::permission_keys_for_member(&state.pool, tenant_id, user_id).await?;
    let keys: HashSet<String> = triples
        .into_iter()
        .map(|(service, entity, action)| format!("{service}:{entity}:{action}"))
        .collect();

    state
        .rbac_cache
        .put(tenant_id, user_id, version, keys.clone());
    Ok(Arc::new(keys))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_reasons_are_stable() {
        assert_eq!(Decision::allow(REASON_PLATFORM_ADMIN).reason, "platform_admin");
        assert_eq!(Decision::deny(REASON_NOT_A_MEMBER).reason, "not_a_member");
        assert_eq!(
            Decision::deny(REASON_PERMISSION_NOT_GRANTED).reason,
            "permission_not_granted"
        );
    }

    #[test]
    fn decision_serializes_for_the_authorize_endpoint() {
        let value = serde_json::to_value(Decision::allow(REASON_GRANTED)).unwrap();
        assert_eq!(value, serde_json::json!({"allowed": true, "reason": "granted"}));
    }
}
