use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use sqlx::postgres::PgExecutor;
use sqlx::prelude::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub tenant_id: Option<Uuid>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub service: String,
    pub entity: String,
    pub action: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

pub async fn insert_permission<'e, E: PgExecutor<'e>>(
    exec: E,
    service: &str,
    entity: &str,
    action: &str,
    description: Option<&str>,
) -> sqlx::Result<Permission> {
    sqlx::query_as(
        r"
        INSERT INTO permissions (service, entity, action, description)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        ",
    )
    .bind(service)
    .bind(entity)
    .bind(action)
    .bind(description)
    .fetch_one(exec)
    .await
}

pub async fn find_permission<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
) -> sqlx::Result<Option<Permission>> {
    sqlx::query_as("SELECT * FROM permissions WHERE id = $1")
        .bind(id)
        .fetch_optional(exec)
        .await
}

pub async fn list_permissions(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> sqlx::Result<(Vec<Permission>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permissions")
        .fetch_one(pool)
        .await?;
    let items = sqlx::query_as(
        "SELECT * FROM permissions ORDER BY created_at DESC, id ASC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok((items, total))
}

/// Fails with a FK violation if any policy still references the permission.
pub async fn delete_permission<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

pub async fn insert_policy<'e, E: PgExecutor<'e>>(
    exec: E,
    name: &str,
    description: Option<&str>,
) -> sqlx::Result<Policy> {
    sqlx::query_as("INSERT INTO policies (name, description) VALUES ($1, $2) RETURNING *")
        .bind(name)
        .bind(description)
        .fetch_one(exec)
        .await
}

pub async fn find_policy<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> sqlx::Result<Option<Policy>> {
    sqlx::query_as("SELECT * FROM policies WHERE id = $1")
        .bind(id)
        .fetch_optional(exec)
        .await
}

pub async fn list_policies(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> sqlx::Result<(Vec<Policy>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM policies")
        .fetch_one(pool)
        .await?;
    let items =
        sqlx::query_as("SELECT * FROM policies ORDER BY created_at DESC, id ASC LIMIT $1 OFFSET $2")
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;
    Ok((items, total))
}

pub async fn update_policy<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    name: Option<&str>,
    description: Option<&str>,
) -> sqlx::Result<Option<Policy>> {
    sqlx::query_as(
        r"
        UPDATE policies SET
            name = COALESCE($2, name),
            description = COALESCE($3, description)
        WHERE id = $1
        RETURNING *
        ",
    )
    .bind(id)
    .bind(name)
    .bind(description)
    .fetch_optional(exec)
    .await
}

/// Fails with a FK violation while any role references the policy; the
/// policy's own permission edges cascade away.
pub async fn delete_policy<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM policies WHERE id = $1")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

pub async fn insert_role<'e, E: PgExecutor<'e>>(
    exec: E,
    name: &str,
    description: Option<&str>,
    tenant_id: Option<Uuid>,
) -> sqlx::Result<Role> {
    sqlx::query_as(
        r"
        INSERT INTO roles (name, description, tenant_id, is_system)
        VALUES ($1, $2, $3, false)
        RETURNING *
        ",
    )
    .bind(name)
    .bind(description)
    .bind(tenant_id)
    .fetch_one(exec)
    .await
}

pub async fn find_role<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> sqlx::Result<Option<Role>> {
    sqlx::query_as("SELECT * FROM roles WHERE id = $1")
        .bind(id)
        .fetch_optional(exec)
        .await
}

pub async fn find_role_by_name<'e, E: PgExecutor<'e>>(
    exec: E,
    name: &str,
) -> sqlx::Result<Option<Role>> {
    sqlx::query_as("SELECT * FROM roles WHERE name = $1 AND tenant_id IS NULL")
        .bind(name)
        .fetch_optional(exec)
        .await
}

/// Platform-global roles plus, when `tenant_id` is given, that tenant's own.
pub async fn list_roles(
    pool: &PgPool,
    tenant_id: Option<Uuid>,
    limit: i64,
    offset: i64,
) -> sqlx::Result<(Vec<Role>, i64)> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM roles WHERE tenant_id IS NULL OR tenant_id = $1",
    )
    .bind(tenant_id)
    .fetch_one(pool)
    .await?;
    let items = sqlx::query_as(
        r"
        SELECT * FROM roles
        WHERE tenant_id IS NULL OR tenant_id = $1
        ORDER BY created_at DESC, id ASC
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

pub async fn update_role<'e, E: PgExecutor<'e>>(
    exec: E,
    id: Uuid,
    name: Option<&str>,
    description: Option<&str>,
) -> sqlx::Result<Option<Role>> {
    sqlx::query_as(
        r"
        UPDATE roles SET
            name = COALESCE($2, name),
            description = COALESCE($3, description)
        WHERE id = $1
        RETURNING *
        ",
    )
    .bind(id)
    .bind(name)
    .bind(description)
    .fetch_optional(exec)
    .await
}

/// System roles are refused here; roles referenced by members fail with a FK
/// violation.
pub async fn delete_role<'e, E: PgExecutor<'e>>(exec: E, id: Uuid) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM roles WHERE id = $1 AND is_system = false")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Graph edges
// ---------------------------------------------------------------------------

/// Idempotent: linking an already-linked pair is a no-op.
pub async fn attach_policy_to_role<'e, E: PgExecutor<'e>>(
    exec: E,
    role_id: Uuid,
    policy_id: Uuid,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO role_policies (role_id, policy_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        ",
    )
    .bind(role_id)
    .bind(policy_id)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn detach_policy_from_role<'e, E: PgExecutor<'e>>(
    exec: E,
    role_id: Uuid,
    policy_id: Uuid,
) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM role_policies WHERE role_id = $1 AND policy_id = $2")
        .bind(role_id)
        .bind(policy_id)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Idempotent: linking an already-linked pair is a no-op.
pub async fn attach_permission_to_policy<'e, E: PgExecutor<'e>>(
    exec: E,
    policy_id: Uuid,
    permission_id: Uuid,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO policy_permissions (policy_id, permission_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        ",
    )
    .bind(policy_id)
    .bind(permission_id)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn detach_permission_from_policy<'e, E: PgExecutor<'e>>(
    exec: E,
    policy_id: Uuid,
    permission_id: Uuid,
) -> sqlx::Result<bool> {
    let result =
        sqlx::query("DELETE FROM policy_permissions WHERE policy_id = $1 AND permission_id = $2")
            .bind(policy_id)
            .bind(permission_id)
            .execute(exec)
            .await?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// All permission triples reachable from the user's active membership in one
/// round trip: member -> role -> policies -> permissions.
pub async fn permission_keys_for_member(
    pool: &PgPool,
    tenant_id: Uuid,
    user_id: Uuid,
) -> sqlx::Result<Vec<(String, String, String)>> {
    sqlx::query_as(
        r"
        SELECT DISTINCT p.service, p.entity, p.action
        FROM tenant_members m
        JOIN role_policies rp ON rp.role_id = m.role_id
        JOIN policy_permissions pp ON pp.policy_id = rp.policy_id
        JOIN permissions p ON p.id = pp.permission_id
        WHERE m.tenant_id = $1 AND m.user_id = $2 AND m.status = 'active'
        ",
    )
    .bind(tenant_id)
    .bind(user_id)
    .fetch_all(pool)
    .await
}
