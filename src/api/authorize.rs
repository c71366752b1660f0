//! The explicit permission-check endpoint other services call on their hot
//! path.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api;
use crate::auth::gate::AuthUser;
use crate::error::ApiError;
use crate::rbac::{self, PermissionKey};
use crate::store::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/authorize", post(authorize))
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub tenant_id: Uuid,
    /// Defaults to the caller.
    pub user_id: Option<Uuid>,
    pub service: String,
    pub entity: String,
    pub action: String,
}

#[tracing::instrument(skip(state, body), fields(caller = %auth.user_id, tenant_id = %body.tenant_id), err)]
async fn authorize(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<AuthorizeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let subject = body.user_id.unwrap_or(auth.user_id);
    let key = PermissionKey::new(body.service, body.entity, body.action);

    let decision = rbac::check(&state, body.tenant_id, subject, &key).await?;

    Ok(api::ok(serde_json::json!({
        "allowed": decision.allowed,
        "reason": decision.reason,
        "tenant_id": body.tenant_id,
        "user_id": subject,
        "permission": key,
    })))
}
