//! Seeds the RBAC vocabulary: the `tenant-api` permission set, the three
//! bundled policies, and the global system roles. Idempotent; safe to run on
//! every start.

use sqlx::PgPool;
use uuid::Uuid;

const SERVICE: &str = "tenant-api";
const ENTITIES: &[&str] = &["tenant", "member", "invitation", "role"];
const ACTIONS: &[&str] = &["read", "create", "update", "delete"];

struct PolicyDef {
    name: &'static str,
    description: &'static str,
    /// `(entity, action)` pairs under [`SERVICE`].
    permissions: &'static [(&'static str, &'static str)],
}

const ADMIN_PERMISSIONS: &[(&str, &str)] = &[
    ("tenant", "read"),
    ("tenant", "create"),
    ("tenant", "update"),
    ("tenant", "delete"),
    ("member", "read"),
    ("member", "create"),
    ("member", "update"),
    ("member", "delete"),
    ("invitation", "read"),
    ("invitation", "create"),
    ("invitation", "update"),
    ("invitation", "delete"),
    ("role", "read"),
    ("role", "create"),
    ("role", "update"),
    ("role", "delete"),
];

const WRITER_PERMISSIONS: &[(&str, &str)] = &[
    ("tenant", "read"),
    ("member", "read"),
    ("invitation", "read"),
    ("invitation", "create"),
    ("role", "read"),
];

const VIEWER_PERMISSIONS: &[(&str, &str)] = &[
    ("tenant", "read"),
    ("member", "read"),
    ("invitation", "read"),
    ("role", "read"),
];

const POLICIES: &[PolicyDef] = &[
    PolicyDef {
        name: "tenant-admin",
        description: "Full control over a tenant and its access graph",
        permissions: ADMIN_PERMISSIONS,
    },
    PolicyDef {
        name: "tenant-writer",
        description: "Read everything, invite members",
        permissions: WRITER_PERMISSIONS,
    },
    PolicyDef {
        name: "tenant-viewer",
        description: "Read-only access to a tenant",
        permissions: VIEWER_PERMISSIONS,
    },
];

struct RoleDef {
    name: &'static str,
    description: &'static str,
    policy: &'static str,
}

const SYSTEM_ROLES: &[RoleDef] = &[
    RoleDef {
        name: "Admin",
        description: "Tenant administrator",
        policy: "tenant-admin",
    },
    RoleDef {
        name: "Writer",
        description: "Tenant collaborator",
        policy: "tenant-writer",
    },
    RoleDef {
        name: "Viewer",
        description: "Read-only tenant member",
        policy: "tenant-viewer",
    },
];

/// Role assigned to a tenant's creator.
pub const CREATOR_ROLE: &str = "Admin";

#[tracing::instrument(skip(pool), err)]
pub async fn run(pool: &PgPool) -> anyhow::Result<()> {
    for entity in ENTITIES {
        for action in ACTIONS {
            sqlx::query(
                r"
                INSERT INTO permissions (service, entity, action, description)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (service, entity, action) DO NOTHING
                ",
            )
            .bind(SERVICE)
            .bind(entity)
            .bind(action)
            .bind(format!("{action} access to {entity} records"))
            .execute(pool)
            .await?;
        }
    }

    for policy in POLICIES {
        let policy_id: Uuid = match sqlx::query_scalar(
            r"
            INSERT INTO policies (name, description)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            RETURNING id
            ",
        )
        .bind(policy.name)
        .bind(policy.description)
        .fetch_optional(pool)
        .await?
        {
            Some(id) => id,
            None => sqlx::query_scalar("SELECT id FROM policies WHERE name = $1")
                .bind(policy.name)
                .fetch_one(pool)
                .await?,
        };

        for (entity, action) in policy.permissions {
            sqlx::query(
                r"
                INSERT INTO policy_permissions (policy_id, permission_id)
                SELECT $1, id FROM permissions
                WHERE service = $2 AND entity = $3 AND action = $4
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(policy_id)
            .bind(SERVICE)
            .bind(entity)
            .bind(action)
            .execute(pool)
            .await?;
        }
    }

    for role in SYSTEM_ROLES {
        let role_id: Uuid = match sqlx::query_scalar(
            r"
            INSERT INTO roles (name, description, tenant_id, is_system)
            VALUES ($1, $2, NULL, true)
            ON CONFLICT (tenant_id, name) DO NOTHING
            RETURNING id
            ",
        )
        .bind(role.name)
        .bind(role.description)
        .fetch_optional(pool)
        .await?
        {
            Some(id) => id,
            None => sqlx::query_scalar("SELECT id FROM roles WHERE name = $1 AND tenant_id IS NULL")
                .bind(role.name)
                .fetch_one(pool)
                .await?,
        };

        sqlx::query(
            r"
            INSERT INTO role_policies (role_id, policy_id)
            SELECT $1, id FROM policies WHERE name = $2
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(role_id)
        .bind(role.policy)
        .execute(pool)
        .await?;
    }

    tracing::info!("rbac vocabulary seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_policy_covers_every_seeded_permission() {
        assert_eq!(ADMIN_PERMISSIONS.len(), ENTITIES.len() * ACTIONS.len());
        for entity in ENTITIES {
            for action in ACTIONS {
                assert!(
                    ADMIN_PERMISSIONS.contains(&(*entity, *action)),
                    "admin policy missing {entity}:{action}"
                );
            }
        }
    }

    #[test]
    fn writer_policy_cannot_delete_members() {
        assert!(!WRITER_PERMISSIONS.contains(&("member", "delete")));
    }

    #[test]
    fn viewer_policy_is_read_only() {
        assert!(VIEWER_PERMISSIONS.iter().all(|(_, action)| *action == "read"));
    }

    #[test]
    fn every_role_references_a_defined_policy() {
        for role in SYSTEM_ROLES {
            assert!(POLICIES.iter().any(|p| p.name == role.policy));
        }
    }
}
