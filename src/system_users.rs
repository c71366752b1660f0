//! Machine credentials.
//!
//! A system user is a credential, not a principal: the principal is the
//! `application_name`, and several credentials may overlap while one is
//! rotated out under a grace period. At most one credential per application
//! is primary-and-active at a time; rotation serializes on a row lock.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::auth::token;
use crate::error::ApiError;
use crate::identity::CustomClaims;
use crate::store::system_users::{ServiceType, SystemUser};
use crate::store::{AppState, system_users};
use crate::validation;

const CREDENTIAL_EMAIL_DOMAIN: &str = "system.internal";

/// A credential together with its password, which is shown exactly once.
#[derive(Debug, Serialize)]
pub struct IssuedCredential {
    #[serde(flatten)]
    pub credential: SystemUser,
    pub password: String,
}

/// Rotation outcome: the new credential plus the old one's cutover deadline.
#[derive(Debug, Serialize)]
pub struct RotationOutcome {
    #[serde(flatten)]
    pub issued: IssuedCredential,
    pub old_credential_id: Uuid,
    pub old_credential_expires_at: DateTime<Utc>,
}

fn credential_claims(name: &str, service_type: ServiceType, application: &str) -> CustomClaims {
    CustomClaims {
        is_system_user: true,
        service_name: Some(name.to_owned()),
        service_type: Some(service_type.as_str().to_owned()),
        application_name: Some(application.to_owned()),
    }
}

/// Next versioned credential name for an application: `<app>-v<N>`.
async fn next_name(conn: &mut PgConnection, application: &str) -> Result<String, ApiError> {
    let count = system_users::count_for_application(&mut *conn, application).await?;
    Ok(format!("{application}-v{}", count + 1))
}

#[tracing::instrument(skip(state, metadata), fields(%application_name, %created_by), err)]
pub async fn create(
    state: &AppState,
    application_name: &str,
    service_type: ServiceType,
    metadata: serde_json::Value,
    created_by: Uuid,
) -> Result<IssuedCredential, ApiError> {
    validation::check_machine_name("application_name", application_name)?;

    let mut tx = state.pool.begin().await?;

    let name = next_name(&mut *tx, application_name).await?;
    let email = format!("{name}@{CREDENTIAL_EMAIL_DOMAIN}");
    let password = token::generate_credential_password();

    let external_user_id = state
        .identity
        .create_email_password_user(
            &email,
            &password,
            credential_claims(&name, service_type, application_name),
        )
        .await?;

    let credential = match system_users::insert(
        &mut *tx,
        &name,
        application_name,
        &email,
        external_user_id,
        service_type,
        true,
        created_by,
        &metadata,
    )
    .await
    {
        Ok(row) => row,
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            return Err(ApiError::Conflict(
                "application already has an active primary credential".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    tx.commit().await?;

    tracing::info!(credential = %credential.name, "system user created");
    Ok(IssuedCredential {
        credential,
        password,
    })
}

/// Grace-period rotation: the current primary is demoted but stays active
/// until the grace period lapses, so staged deploys can cut over.
#[tracing::instrument(skip(state), fields(%id), err)]
pub async fn rotate(
    state: &AppState,
    id: Uuid,
    grace_period_days: Option<i64>,
    created_by: Uuid,
) -> Result<RotationOutcome, ApiError> {
    let grace_days = grace_period_days.unwrap_or(state.config.credential_grace_period_days);
    if !(1..=365).contains(&grace_days) {
        return Err(ApiError::BadRequest(
            "grace_period_days must be between 1 and 365".into(),
        ));
    }

    let mut tx = state.pool.begin().await?;

    // The row lock serializes concurrent rotations of the same credential.
    let current = system_users::find_for_update(&mut *tx, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("system user".into()))?;

    if !current.is_primary || !current.is_active {
        return Err(ApiError::BadRequest(
            "only the active primary credential can be rotated".into(),
        ));
    }

    let old_expires_at = Utc::now() + Duration::hours(grace_days * 24);
    system_users::demote_primary(&mut *tx, current.id, old_expires_at).await?;

    let service_type: ServiceType = current
        .service_type
        .parse()
        .map_err(ApiError::Internal)?;
    let name = next_name(&mut *tx, &current.application_name).await?;
    let email = format!("{name}@{CREDENTIAL_EMAIL_DOMAIN}");
    let password = token::generate_credential_password();

    let external_user_id = state
        .identity
        .create_email_password_user(
            &email,
            &password,
            credential_claims(&name, service_type, &current.application_name),
        )
        .await?;

    let credential = system_users::insert(
        &mut *tx,
        &name,
        &current.application_name,
        &email,
        external_user_id,
        service_type,
        true,
        created_by,
        &current.metadata,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        application = %credential.application_name,
        new_credential = %credential.name,
        old_credential = %current.name,
        %old_expires_at,
        "credential rotated"
    );

    Ok(RotationOutcome {
        issued: IssuedCredential {
            credential,
            password,
        },
        old_credential_id: current.id,
        old_credential_expires_at: old_expires_at,
    })
}

/// New password for an existing credential; every session it holds is
/// revoked.
#[tracing::instrument(skip(state), fields(%id), err)]
pub async fn regenerate_password(state: &AppState, id: Uuid) -> Result<IssuedCredential, ApiError> {
    let mut tx = state.pool.begin().await?;

    let credential = system_users::find_for_update(&mut *tx, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("system user".into()))?;

    if !credential.is_active {
        return Err(ApiError::BadRequest(
            "cannot regenerate an inactive credential".into(),
        ));
    }

    let password = token::generate_credential_password();
    state
        .identity
        .update_password(credential.external_user_id, &password)
        .await?;
    state
        .identity
        .revoke_all_sessions_for_user(credential.external_user_id)
        .await?;

    tx.commit().await?;

    tracing::info!(credential = %credential.name, "credential password regenerated");
    Ok(IssuedCredential {
        credential,
        password,
    })
}

/// Deactivate a credential and revoke its sessions. Idempotent.
#[tracing::instrument(skip(state), fields(%id), err)]
pub async fn deactivate(state: &AppState, id: Uuid) -> Result<SystemUser, ApiError> {
    let credential = system_users::deactivate(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("system user".into()))?;

    state
        .identity
        .revoke_all_sessions_for_user(credential.external_user_id)
        .await?;

    tracing::info!(credential = %credential.name, "credential deactivated");
    Ok(credential)
}

/// Immediately retire every non-primary credential of an application,
/// ending any grace periods early.
#[tracing::instrument(skip(state), fields(%application_name), err)]
pub async fn revoke_old(
    state: &AppState,
    application_name: &str,
) -> Result<Vec<SystemUser>, ApiError> {
    let retired = system_users::deactivate_non_primary(&state.pool, application_name).await?;

    for credential in &retired {
        state
            .identity
            .revoke_all_sessions_for_user(credential.external_user_id)
            .await?;
        tracing::info!(credential = %credential.name, "old credential revoked");
    }

    Ok(retired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_claims_are_tagged_system() {
        let claims = credential_claims("worker-x-v2", ServiceType::Worker, "worker-x");
        assert!(claims.is_system_user);
        assert_eq!(claims.service_name.as_deref(), Some("worker-x-v2"));
        assert_eq!(claims.service_type.as_deref(), Some("worker"));
        assert_eq!(claims.application_name.as_deref(), Some("worker-x"));
    }
}
