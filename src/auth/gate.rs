//! The three request gates.
//!
//! Gate A (authentication) runs as an extractor; Gates B (tenant access) and
//! C (permission) are helpers called by tenant-scoped handlers. Any failure
//! terminates the request closed: 401 from A, 403 from B and C.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::{ApiError, ForbiddenReason};
use crate::identity::{CustomClaims, VerifyMode};
use crate::rbac::{self, PermissionKey};
use crate::store::members::TenantMember;
use crate::store::{AppState, members, platform_admins, system_users};

/// Cookie carrying the access token. HttpOnly; `Secure` in production.
pub const ACCESS_COOKIE: &str = "atrium_at";
/// Cookie carrying the refresh token.
pub const REFRESH_COOKIE: &str = "atrium_rt";
/// Front-channel metadata cookie; advisory only, never a credential.
pub const FRONT_COOKIE: &str = "atrium_front";

/// Authenticated caller, injected by Gate A.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub session_handle: Uuid,
    pub claims: CustomClaims,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        authenticate(parts, state, state.config.token_mode).await
    }
}

/// Gate A with stateful verification forced, regardless of the configured
/// default. Sensitive routes (credential rotation, platform administration)
/// use this so revocation takes effect on the next request.
#[derive(Debug, Clone)]
pub struct StatefulAuthUser(pub AuthUser);

impl FromRequestParts<AppState> for StatefulAuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        authenticate(parts, state, VerifyMode::Stateful)
            .await
            .map(Self)
    }
}

async fn authenticate(
    parts: &Parts,
    state: &AppState,
    mode: VerifyMode,
) -> Result<AuthUser, ApiError> {
    let token = extract_bearer_token(parts)
        .or_else(|| extract_cookie(parts, ACCESS_COOKIE))
        .ok_or(ApiError::Unauthenticated)?;

    let claims = state.identity.verify_access_token(&token, mode).await?;

    if claims.custom.is_system_user {
        // Freshness marker only; failures are irrelevant to the request.
        let pool = state.pool.clone();
        let external_id = claims.user_id;
        tokio::spawn(async move {
            let _ = system_users::touch_last_used(&pool, external_id).await;
        });
    }

    Ok(AuthUser {
        user_id: claims.user_id,
        session_handle: claims.session_handle,
        claims: claims.custom,
    })
}

fn extract_bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_owned())
}

fn extract_cookie(parts: &Parts, name: &str) -> Option<String> {
    let cookies = parts
        .headers
        .get(axum::http::header::COOKIE)?
        .to_str()
        .ok()?;
    for cookie in cookies.split(';') {
        let cookie = cookie.trim();
        if let Some(value) = cookie.strip_prefix(name)
            && let Some(value) = value.strip_prefix('=')
            && !value.is_empty()
        {
            return Some(value.to_owned());
        }
    }
    None
}

/// Refresh token from cookie, for the refresh endpoint.
pub fn extract_refresh_cookie(parts: &Parts) -> Option<String> {
    extract_cookie(parts, REFRESH_COOKIE)
}

// ---------------------------------------------------------------------------
// Gate B — tenant access
// ---------------------------------------------------------------------------

/// Resolved tenant context, injected by Gate B.
#[derive(Debug, Clone)]
pub struct TenantAccess {
    pub tenant_id: Uuid,
    pub is_platform_admin: bool,
    pub member: Option<TenantMember>,
}

/// Platform-admin status is resolved from the store on every request, never
/// from a claim: admin rights can be revoked without forcing re-login.
#[tracing::instrument(skip(state), fields(%tenant_id, %user_id))]
pub async fn require_tenant_access(
    state: &AppState,
    user_id: Uuid,
    tenant_id: Uuid,
) -> Result<TenantAccess, ApiError> {
    if platform_admins::is_admin(&state.pool, user_id).await? {
        return Ok(TenantAccess {
            tenant_id,
            is_platform_admin: true,
            member: None,
        });
    }

    match members::find_active(&state.pool, tenant_id, user_id).await? {
        Some(member) => Ok(TenantAccess {
            tenant_id,
            is_platform_admin: false,
            member: Some(member),
        }),
        None => Err(ApiError::Forbidden(ForbiddenReason::NotAMember)),
    }
}

pub async fn require_platform_admin(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    if platform_admins::is_admin(&state.pool, user_id).await? {
        Ok(())
    } else {
        Err(ApiError::Forbidden(ForbiddenReason::NotPlatformAdmin))
    }
}

// ---------------------------------------------------------------------------
// Gate C — permission required
// ---------------------------------------------------------------------------

/// Runs the full RBAC check; the platform-admin step inside it covers
/// callers that passed Gate B via the bypass.
pub async fn require_permission(
    state: &AppState,
    access: &TenantAccess,
    user_id: Uuid,
    key: &PermissionKey,
) -> Result<(), ApiError> {
    let decision = rbac::check(state, access.tenant_id, user_id, key).await?;
    if decision.allowed {
        Ok(())
    } else {
        tracing::warn!(
            %user_id,
            tenant_id = %access.tenant_id,
            permission = %key,
            reason = decision.reason,
            "permission denied"
        );
        Err(ApiError::Forbidden(ForbiddenReason::PermissionNotGranted))
    }
}
