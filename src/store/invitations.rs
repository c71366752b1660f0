use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use sqlx::postgres::PgExecutor;
use sqlx::prelude::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvitationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "revoked" => Ok(Self::Revoked),
            "expired" => Ok(Self::Expired),
            other => anyhow::bail!("unknown invitation status: {other}"),
        }
    }
}

/// The raw token is only ever returned from [`insert`]; listings must use
/// [`InvitationSummary`].
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Invitation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub invited_by: Uuid,
    pub role_id: Uuid,
    #[serde(skip_serializing)]
    pub token: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InvitationSummary {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub invited_by: Uuid,
    pub role_id: Uuid,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The partial unique index on `(tenant_id, lower(email)) WHERE pending`
/// turns a duplicate pending invitation into a unique violation.
pub async fn insert<'e, E: PgExecutor<'e>>(
    exec: E,
    tenant_id: Uuid,
    email: &str,
    invited_by: Uuid,
    role_id: Uuid,
    token: &str,
    expires_at: DateTime<Utc>,
) -> sqlx::Result<Invitation> {
    sqlx::query_as(
        r"
        INSERT INTO invitations (tenant_id, email, invited_by, role_id, token, status, expires_at)
        VALUES ($1, lower($2), $3, $4, $5, 'pending', $6)
        RETURNING *
        ",
    )
    .bind(tenant_id)
    .bind(email)
    .bind(invited_by)
    .bind(role_id)
    .bind(token)
    .bind(expires_at)
    .fetch_one(exec)
    .await
}

pub async fn find<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> sqlx::Result<Option<Invitation>> {
    sqlx::query_as("SELECT * FROM invitations WHERE id = $1")
        .bind(id)
        .fetch_optional(exec)
        .await
}

pub async fn find_by_token<'e, E: PgExecutor<'e>>(
    exec: E,
    token: &str,
) -> sqlx::Result<Option<Invitation>> {
    sqlx::query_as("SELECT * FROM invitations WHERE token = $1")
        .bind(token)
        .fetch_optional(exec)
        .await
}

pub async fn list(
    pool: &PgPool,
    tenant_id: Uuid,
    status: Option<InvitationStatus>,
    limit: i64,
    offset: i64,
) -> sqlx::Result<(Vec<InvitationSummary>, i64)> {
    let status = status.map(InvitationStatus::as_str);

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM invitations WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)",
    )
    .bind(tenant_id)
    .bind(status)
    .fetch_one(pool)
    .await?;

    let items = sqlx::query_as(
        r"
        SELECT id, tenant_id, email, invited_by, role_id, status, expires_at, created_at
        FROM invitations
        WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)
        ORDER BY created_at DESC, id ASC
        LIMIT $3 OFFSET $4
        ",
    )
    .bind(tenant_id)
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok((items, total))
}

/// Conditional transition; returns whether a row changed.
pub async fn set_status_if<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    from: InvitationStatus,
    to: InvitationStatus,
) -> sqlx::Result<bool> {
    let result = sqlx::query("UPDATE invitations SET status = $3 WHERE id = $1 AND status = $2")
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}
