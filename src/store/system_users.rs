use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgExecutor;
use sqlx::prelude::FromRow;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Worker,
    Integration,
    Cron,
    Api,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Integration => "integration",
            Self::Cron => "cron",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "worker" => Ok(Self::Worker),
            "integration" => Ok(Self::Integration),
            "cron" => Ok(Self::Cron),
            "api" => Ok(Self::Api),
            other => anyhow::bail!("unknown service type: {other}"),
        }
    }
}

/// A machine credential. The principal is `application_name`; several
/// credentials may overlap during rotation.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SystemUser {
    pub id: Uuid,
    pub name: String,
    pub application_name: String,
    pub email: String,
    pub external_user_id: Uuid,
    pub service_type: String,
    pub is_primary: bool,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub last_used_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ListFilter {
    pub application_name: Option<String>,
    pub service_type: Option<ServiceType>,
    pub is_active: Option<bool>,
}

#[allow(clippy::too_many_arguments)]
pub async fn insert<'e, E: PgExecutor<'e>>(
    exec: E,
    name: &str,
    application_name: &str,
    email: &str,
    external_user_id: Uuid,
    service_type: ServiceType,
    is_primary: bool,
    created_by: Uuid,
    metadata: &serde_json::Value,
) -> sqlx::Result<SystemUser> {
    sqlx::query_as(
        r"
        INSERT INTO system_users
            (name, application_name, email, external_user_id, service_type,
             is_primary, is_active, created_by, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, true, $7, $8)
        RETURNING *
        ",
    )
    .bind(name)
    .bind(application_name)
    .bind(email)
    .bind(external_user_id)
    .bind(service_type.as_str())
    .bind(is_primary)
    .bind(created_by)
    .bind(metadata)
    .fetch_one(exec)
    .await
}

pub async fn find<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> sqlx::Result<Option<SystemUser>> {
    sqlx::query_as("SELECT * FROM system_users WHERE id = $1")
        .bind(id)
        .fetch_optional(exec)
        .await
}

/// Row-locked read; serializes rotation and regeneration per credential.
pub async fn find_for_update(
    conn: &mut PgConnection,
    id: Uuid,
) -> sqlx::Result<Option<SystemUser>> {
    sqlx::query_as("SELECT * FROM system_users WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn list(
    pool: &PgPool,
    filter: &ListFilter,
    limit: i64,
    offset: i64,
) -> sqlx::Result<(Vec<SystemUser>, i64)> {
    let service_type = filter.service_type.map(ServiceType::as_str);

    let total: i64 = sqlx::query_scalar(
        r"
        SELECT COUNT(*) FROM system_users
        WHERE ($1::text IS NULL OR application_name = $1)
          AND ($2::text IS NULL OR service_type = $2)
          AND ($3::boolean IS NULL OR is_active = $3)
        ",
    )
    .bind(filter.application_name.as_deref())
    .bind(service_type)
    .bind(filter.is_active)
    .fetch_one(pool)
    .await?;

    let items = sqlx::query_as(
        r"
        SELECT * FROM system_users
        WHERE ($1::text IS NULL OR application_name = $1)
          AND ($2::text IS NULL OR service_type = $2)
          AND ($3::boolean IS NULL OR is_active = $3)
        ORDER BY created_at DESC, id ASC
        LIMIT $4 OFFSET $5
        ",
    )
    .bind(filter.application_name.as_deref())
    .bind(service_type)
    .bind(filter.is_active)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok((items, total))
}

pub async fn list_for_application<'e, E: PgExecutor<'e>>(
    exec: E,
    application_name: &str,
) -> sqlx::Result<Vec<SystemUser>> {
    sqlx::query_as(
        r"
        SELECT * FROM system_users
        WHERE application_name = $1
        ORDER BY created_at DESC, id ASC
        ",
    )
    .bind(application_name)
    .fetch_all(exec)
    .await
}

pub async fn count_for_application<'e, E: PgExecutor<'e>>(
    exec: E,
    application_name: &str,
) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM system_users WHERE application_name = $1")
        .bind(application_name)
        .fetch_one(exec)
        .await
}

pub async fn update_metadata<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    metadata: &serde_json::Value,
) -> sqlx::Result<Option<SystemUser>> {
    sqlx::query_as("UPDATE system_users SET metadata = $2 WHERE id = $1 RETURNING *")
        .bind(id)
        .bind(metadata)
        .fetch_optional(exec)
        .await
}

/// Demote the primary credential at the start of rotation: non-primary,
/// still active, expiring at the end of the grace period.
pub async fn demote_primary<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    expires_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE system_users SET is_primary = false, expires_at = $2 WHERE id = $1")
        .bind(id)
        .bind(expires_at)
        .execute(exec)
        .await?;
    Ok(())
}

pub async fn deactivate<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> sqlx::Result<Option<SystemUser>> {
    sqlx::query_as("UPDATE system_users SET is_active = false WHERE id = $1 RETURNING *")
        .bind(id)
        .fetch_optional(exec)
        .await
}

/// Deactivate every non-primary credential of an application that is still
/// active; returns the affected rows so sessions can be revoked.
pub async fn deactivate_non_primary<'e, E: PgExecutor<'e>>(
    exec: E,
    application_name: &str,
) -> sqlx::Result<Vec<SystemUser>> {
    sqlx::query_as(
        r"
        UPDATE system_users SET is_active = false
        WHERE application_name = $1 AND is_primary = false AND is_active = true
        RETURNING *
        ",
    )
    .bind(application_name)
    .fetch_all(exec)
    .await
}

/// Rows whose grace period has lapsed but that are still active.
pub async fn list_expired<'e, E: PgExecutor<'e>>(exec: E) -> sqlx::Result<Vec<SystemUser>> {
    sqlx::query_as(
        r"
        SELECT * FROM system_users
        WHERE is_active = true AND expires_at IS NOT NULL AND expires_at < now()
        ORDER BY expires_at ASC
        ",
    )
    .fetch_all(exec)
    .await
}

/// The expiry sweep's conditional flip: only deactivates a row that is still
/// active and still past its expiry, so overlapping sweeps are harmless.
pub async fn deactivate_if_expired<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r"
        UPDATE system_users SET is_active = false
        WHERE id = $1 AND is_active = true AND expires_at IS NOT NULL AND expires_at < now()
        ",
    )
    .bind(id)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Fire-and-forget freshness marker for credential tokens.
pub async fn touch_last_used(pool: &PgPool, external_user_id: Uuid) -> sqlx::Result<()> {
    sqlx::query("UPDATE system_users SET last_used_at = now() WHERE external_user_id = $1")
        .bind(external_user_id)
        .execute(pool)
        .await?;
    Ok(())
}
