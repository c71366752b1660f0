use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgExecutor;
use sqlx::prelude::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Pending,
    Active,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            other => anyhow::bail!("unknown tenant status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: String,
    pub metadata: serde_json::Value,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn insert<'e, E: PgExecutor<'e>>(
    exec: E,
    name: &str,
    slug: &str,
    metadata: &serde_json::Value,
    created_by: Uuid,
) -> sqlx::Result<Tenant> {
    sqlx::query_as(
        r"
        INSERT INTO tenants (name, slug, status, metadata, created_by)
        VALUES ($1, $2, 'pending', $3, $4)
        RETURNING *
        ",
    )
    .bind(name)
    .bind(slug)
    .bind(metadata)
    .bind(created_by)
    .fetch_one(exec)
    .await
}

pub async fn find<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> sqlx::Result<Option<Tenant>> {
    sqlx::query_as("SELECT * FROM tenants WHERE id = $1")
        .bind(id)
        .fetch_optional(exec)
        .await
}

/// Tenants the user is an active member of.
pub async fn list_for_user(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> sqlx::Result<(Vec<Tenant>, i64)> {
    let total: i64 = sqlx::query_scalar(
        r"
        SELECT COUNT(*) FROM tenants t
        JOIN tenant_members m ON m.tenant_id = t.id
        WHERE m.user_id = $1 AND m.status = 'active'
        ",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let items = sqlx::query_as(
        r"
        SELECT t.* FROM tenants t
        JOIN tenant_members m ON m.tenant_id = t.id
        WHERE m.user_id = $1 AND m.status = 'active'
        ORDER BY t.created_at DESC, t.id ASC
        LIMIT $2 OFFSET $3
        ",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok((items, total))
}

pub async fn list_all(
    pool: &sqlx::PgPool,
    limit: i64,
    offset: i64,
) -> sqlx::Result<(Vec<Tenant>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenants")
        .fetch_one(pool)
        .await?;

    let items = sqlx::query_as(
        r"
        SELECT * FROM tenants
        ORDER BY created_at DESC, id ASC
        LIMIT $1 OFFSET $2
        ",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok((items, total))
}

/// Partial update; metadata is last-writer-wins.
pub async fn update<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    name: Option<&str>,
    metadata: Option<&serde_json::Value>,
    status: Option<TenantStatus>,
) -> sqlx::Result<Option<Tenant>> {
    sqlx::query_as(
        r"
        UPDATE tenants SET
            name = COALESCE($2, name),
            metadata = COALESCE($3, metadata),
            status = COALESCE($4, status),
            updated_at = now()
        WHERE id = $1
        RETURNING *
        ",
    )
    .bind(id)
    .bind(name)
    .bind(metadata)
    .bind(status.map(TenantStatus::as_str))
    .fetch_optional(exec)
    .await
}

/// Conditional status flip; returns whether a row changed. Used by the
/// initialization job so re-delivery cannot re-activate a suspended tenant.
pub async fn set_status_if<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    from: TenantStatus,
    to: TenantStatus,
) -> sqlx::Result<bool> {
    let result = sqlx::query("UPDATE tenants SET status = $3, updated_at = now() WHERE id = $1 AND status = $2")
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Members, invitations, and tenant-scoped roles go with the tenant (FK
/// cascades). Returns whether the tenant existed.
pub async fn delete<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM tenants WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            TenantStatus::Pending,
            TenantStatus::Active,
            TenantStatus::Suspended,
        ] {
            let parsed: TenantStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_errors() {
        assert!("deleted".parse::<TenantStatus>().is_err());
    }
}
