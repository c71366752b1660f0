pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// How access tokens are checked.
///
/// Stateless validates signature and expiry locally; revocation cannot take
/// effect before the token expires. Stateful additionally confirms the
/// session handle is still live, so revocation applies on the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    Stateless,
    Stateful,
}

/// Custom claims attached to a session at issue time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomClaims {
    #[serde(default)]
    pub is_system_user: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
}

/// Verified contents of an access token.
#[derive(Debug, Clone)]
pub struct SessionClaims {
    pub user_id: Uuid,
    pub session_handle: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub custom: CustomClaims,
}

/// Advisory metadata for the front channel. Never an authentication
/// credential; the core must not accept it as one.
#[derive(Debug, Clone, Serialize)]
pub struct FrontInfo {
    pub user_id: Uuid,
    pub access_expires_at: DateTime<Utc>,
}

/// A freshly issued token pair.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access_token: String,
    pub refresh_token: String,
    pub session_handle: Uuid,
    pub front: FrontInfo,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("email already registered")]
    EmailExists,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token expired")]
    Expired,

    #[error("token invalid")]
    Invalid,

    #[error("identity engine unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::EmailExists => Self::Conflict("email already registered".into()),
            IdentityError::InvalidCredentials
            | IdentityError::Expired
            | IdentityError::Invalid => Self::Unauthenticated,
            IdentityError::Unavailable(e) => {
                tracing::error!(error = %e, "identity engine unavailable");
                Self::Transient("identity engine unavailable".into())
            }
        }
    }
}

/// Contract over the identity engine. The only place the core trusts
/// cryptographic validation.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the new external user id, or `EmailExists`.
    async fn create_email_password_user(
        &self,
        email: &str,
        password: &str,
        claims: CustomClaims,
    ) -> Result<Uuid, IdentityError>;

    async fn verify_email_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<IssuedSession, IdentityError>;

    async fn email_exists(&self, email: &str) -> Result<bool, IdentityError>;

    async fn issue_session(
        &self,
        user_id: Uuid,
        claims: CustomClaims,
    ) -> Result<IssuedSession, IdentityError>;

    async fn verify_access_token(
        &self,
        token: &str,
        mode: VerifyMode,
    ) -> Result<SessionClaims, IdentityError>;

    /// Consumes the refresh token and rotates it.
    async fn refresh_session(&self, refresh_token: &str) -> Result<IssuedSession, IdentityError>;

    async fn revoke_session(&self, session_handle: Uuid) -> Result<(), IdentityError>;

    async fn revoke_all_sessions_for_user(&self, user_id: Uuid) -> Result<(), IdentityError>;

    /// Registered email for an external user id, if the user exists.
    async fn user_email(&self, user_id: Uuid) -> Result<Option<String>, IdentityError>;

    async fn update_password(&self, user_id: Uuid, new_password: &str)
    -> Result<(), IdentityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_claims_default_is_human() {
        let claims = CustomClaims::default();
        assert!(!claims.is_system_user);
        assert!(claims.application_name.is_none());
    }

    #[test]
    fn custom_claims_serde_roundtrip() {
        let claims = CustomClaims {
            is_system_user: true,
            service_name: Some("worker-x-v1".into()),
            service_type: Some("worker".into()),
            application_name: Some("worker-x".into()),
        };
        let json = serde_json::to_value(&claims).unwrap();
        let parsed: CustomClaims = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, claims);
    }

    #[test]
    fn custom_claims_tolerate_missing_fields() {
        let parsed: CustomClaims = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, CustomClaims::default());
    }

    #[test]
    fn identity_errors_map_to_taxonomy() {
        assert!(matches!(
            ApiError::from(IdentityError::EmailExists),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::from(IdentityError::Expired),
            ApiError::Unauthenticated
        ));
        assert!(matches!(
            ApiError::from(IdentityError::Unavailable(anyhow::anyhow!("down"))),
            ApiError::Transient(_)
        ));
    }
}
