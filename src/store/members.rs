use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgExecutor;
use sqlx::prelude::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Pending,
    Suspended,
}

impl MemberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "pending" => Ok(Self::Pending),
            "suspended" => Ok(Self::Suspended),
            other => anyhow::bail!("unknown member status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TenantMember {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub status: String,
    pub joined_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Member row joined with its role name, for listings.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MemberWithRole {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub role_name: String,
    pub status: String,
    pub joined_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

pub async fn insert<'e, E: PgExecutor<'e>>(
    exec: E,
    tenant_id: Uuid,
    user_id: Uuid,
    role_id: Uuid,
    status: MemberStatus,
) -> sqlx::Result<TenantMember> {
    sqlx::query_as(
        r"
        INSERT INTO tenant_members (tenant_id, user_id, role_id, status)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        ",
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(role_id)
    .bind(status.as_str())
    .fetch_one(exec)
    .await
}

/// Insert a new active member, or re-activate an existing row without
/// touching its role. Invitation acceptance must never downgrade a role the
/// user already holds.
pub async fn upsert_active<'e, E: PgExecutor<'e>>(
    exec: E,
    tenant_id: Uuid,
    user_id: Uuid,
    role_id: Uuid,
) -> sqlx::Result<TenantMember> {
    sqlx::query_as(
        r"
        INSERT INTO tenant_members (tenant_id, user_id, role_id, status)
        VALUES ($1, $2, $3, 'active')
        ON CONFLICT (tenant_id, user_id)
        DO UPDATE SET status = 'active'
        RETURNING *
        ",
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(role_id)
    .fetch_one(exec)
    .await
}

pub async fn find<'e, E: PgExecutor<'e>>(
    exec: E,
    tenant_id: Uuid,
    user_id: Uuid,
) -> sqlx::Result<Option<TenantMember>> {
    sqlx::query_as("SELECT * FROM tenant_members WHERE tenant_id = $1 AND user_id = $2")
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(exec)
        .await
}

/// Only active members pass access checks and contribute to resolution.
pub async fn find_active<'e, E: PgExecutor<'e>>(
    exec: E,
    tenant_id: Uuid,
    user_id: Uuid,
) -> sqlx::Result<Option<TenantMember>> {
    sqlx::query_as(
        "SELECT * FROM tenant_members WHERE tenant_id = $1 AND user_id = $2 AND status = 'active'",
    )
    .bind(tenant_id)
    .bind(user_id)
    .fetch_optional(exec)
    .await
}

pub async fn list(
    pool: &sqlx::PgPool,
    tenant_id: Uuid,
    limit: i64,
    offset: i64,
) -> sqlx::Result<(Vec<MemberWithRole>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenant_members WHERE tenant_id = $1")
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;

    let items = sqlx::query_as(
        r"
        SELECT m.id, m.tenant_id, m.user_id, m.role_id, r.name AS role_name,
               m.status, m.joined_at, m.created_at
        FROM tenant_members m
        JOIN roles r ON r.id = m.role_id
        WHERE m.tenant_id = $1
        ORDER BY m.created_at DESC, m.id ASC
        LIMIT $2 OFFSET $3
        ",
    )
    .bind(tenant_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok((items, total))
}

/// Replace the member's role; the old role itself is untouched.
pub async fn set_role<'e, E: PgExecutor<'e>>(
    exec: E,
    tenant_id: Uuid,
    user_id: Uuid,
    role_id: Uuid,
) -> sqlx::Result<Option<TenantMember>> {
    sqlx::query_as(
        r"
        UPDATE tenant_members SET role_id = $3
        WHERE tenant_id = $1 AND user_id = $2
        RETURNING *
        ",
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(role_id)
    .fetch_optional(exec)
    .await
}

pub async fn set_status<'e, E: PgExecutor<'e>>(
    exec: E,
    tenant_id: Uuid,
    user_id: Uuid,
    status: MemberStatus,
) -> sqlx::Result<Option<TenantMember>> {
    sqlx::query_as(
        r"
        UPDATE tenant_members SET status = $3
        WHERE tenant_id = $1 AND user_id = $2
        RETURNING *
        ",
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(status.as_str())
    .fetch_optional(exec)
    .await
}

pub async fn remove<'e, E: PgExecutor<'e>>(
    exec: E,
    tenant_id: Uuid,
    user_id: Uuid,
) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM tenant_members WHERE tenant_id = $1 AND user_id = $2")
        .bind(tenant_id)
        .bind(user_id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}
