use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// One field-level validation failure, surfaced under `details`.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Why an authorization gate refused a request. Logged in full; clients only
/// see the status code and a generic reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    NotAMember,
    PermissionNotGranted,
    NotPlatformAdmin,
    EmailMismatch,
}

impl ForbiddenReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAMember => "not_a_member",
            Self::PermissionNotGranted => "permission_not_granted",
            Self::NotPlatformAdmin => "not_platform_admin",
            Self::EmailMismatch => "email_mismatch",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {}", .0.as_str())]
    Forbidden(ForbiddenReason),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("temporarily unavailable: {0}")]
    Transient(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "success": false, "error": msg }),
            ),
            Self::Validation(fields) => {
                let details: serde_json::Map<String, serde_json::Value> = fields
                    .iter()
                    .map(|f| (f.field.clone(), serde_json::Value::String(f.message.clone())))
                    .collect();
                (
                    StatusCode::BAD_REQUEST,
                    serde_json::json!({
                        "success": false,
                        "error": "validation_failed",
                        "details": details,
                    }),
                )
            }
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "success": false, "error": "unauthenticated" }),
            ),
            Self::Forbidden(reason) => {
                tracing::warn!(reason = reason.as_str(), "request forbidden");
                (
                    StatusCode::FORBIDDEN,
                    serde_json::json!({ "success": false, "error": "forbidden" }),
                )
            }
            Self::NotFound(what) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "success": false, "error": format!("{what} not found") }),
            ),
            Self::Conflict(msg) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "success": false, "error": msg }),
            ),
            Self::IntegrityViolation(msg) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "success": false, "error": msg }),
            ),
            Self::Transient(msg) => {
                tracing::warn!(error = %msg, "transient failure surfaced to client");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    serde_json::json!({ "success": false, "error": "temporarily unavailable" }),
                )
            }
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "success": false, "error": "internal server error" }),
                )
            }
        };

        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
        }
        response
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("resource".into()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => Self::Conflict("resource already exists".into()),
                // foreign_key_violation
                Some("23503") => {
                    Self::IntegrityViolation("resource is referenced by other records".into())
                }
                _ => {
                    tracing::error!(error = %err, "database error");
                    Self::Internal(err.into())
                }
            },
            sqlx::Error::PoolTimedOut => Self::Transient("database busy".into()),
            sqlx::Error::Io(_) => Self::Transient("database unavailable".into()),
            _ => {
                tracing::error!(error = %err, "database error");
                Self::Internal(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_reasons_are_stable() {
        assert_eq!(ForbiddenReason::NotAMember.as_str(), "not_a_member");
        assert_eq!(
            ForbiddenReason::PermissionNotGranted.as_str(),
            "permission_not_granted"
        );
        assert_eq!(
            ForbiddenReason::NotPlatformAdmin.as_str(),
            "not_platform_admin"
        );
    }

    #[test]
    fn validation_renders_field_details() {
        let err = ApiError::Validation(vec![FieldError::new("slug", "must be kebab-case")]);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn transient_carries_retry_after() {
        let response = ApiError::Transient("db".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }
}
