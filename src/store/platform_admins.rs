use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use sqlx::postgres::PgExecutor;
use sqlx::prelude::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PlatformAdmin {
    pub user_id: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// The single source of truth for the cross-tenant bypass. Gates resolve
/// this per request; token claims are never consulted.
pub async fn is_admin<'e, E: PgExecutor<'e>>(exec: E, user_id: Uuid) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM platform_admins WHERE user_id = $1)")
        .bind(user_id)
        .fetch_one(exec)
        .await
}

/// Idempotent grant.
pub async fn grant<'e, E: PgExecutor<'e>>(
    exec: E,
    user_id: Uuid,
    created_by: Uuid,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO platform_admins (user_id, created_by)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        ",
    )
    .bind(user_id)
    .bind(created_by)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn revoke<'e, E: PgExecutor<'e>>(exec: E, user_id: Uuid) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM platform_admins WHERE user_id = $1")
        .bind(user_id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> sqlx::Result<(Vec<PlatformAdmin>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM platform_admins")
        .fetch_one(pool)
        .await?;
    let items = sqlx::query_as(
        r"
        SELECT * FROM platform_admins
        ORDER BY created_at DESC, user_id ASC
        LIMIT $1 OFFSET $2
        ",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok((items, total))
}
