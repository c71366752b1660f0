pub mod bootstrap;
pub mod invitations;
pub mod members;
pub mod platform_admins;
pub mod pool;
pub mod rbac;
pub mod system_users;
pub mod tenants;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::identity::IdentityProvider;
use crate::rbac::cache::PermissionCache;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: Arc<Config>,
    pub rbac_cache: Arc<PermissionCache>,
    pub http: reqwest::Client,
}
