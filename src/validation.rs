use crate::error::{ApiError, FieldError};

/// Max rows a single list call may return.
pub const MAX_PAGE_SIZE: i64 = 100;

pub fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ApiError::Validation(vec![FieldError::new(
            field,
            format!("must be between {min} and {max} characters (got {len})"),
        )]));
    }
    Ok(())
}

/// Tenant slugs are kebab-case: lowercase alphanumerics and single hyphens,
/// 3-63 characters, no hyphen at either end.
pub fn check_slug(value: &str) -> Result<(), ApiError> {
    check_length("slug", value, 3, 63)?;
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || value.starts_with('-') || value.ends_with('-') || value.contains("--") {
        return Err(ApiError::Validation(vec![FieldError::new(
            "slug",
            "must be kebab-case: lowercase letters, digits, and single hyphens",
        )]));
    }
    Ok(())
}

pub fn check_email(value: &str) -> Result<(), ApiError> {
    check_length("email", value, 3, 254)?;
    let Some((local, domain)) = value.split_once('@') else {
        return Err(ApiError::Validation(vec![FieldError::new(
            "email",
            "invalid email address",
        )]));
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ApiError::Validation(vec![FieldError::new(
            "email",
            "invalid email address",
        )]));
    }
    Ok(())
}

pub fn check_password(value: &str) -> Result<(), ApiError> {
    check_length("password", value, 8, 256)
}

pub fn check_name(field: &str, value: &str) -> Result<(), ApiError> {
    check_length(field, value, 1, 255)
}

/// Machine names (applications, credentials): DNS-label-ish charset.
pub fn check_machine_name(field: &str, value: &str) -> Result<(), ApiError> {
    check_length(field, value, 1, 100)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::Validation(vec![FieldError::new(
            field,
            "must contain only alphanumeric characters, hyphens, or underscores",
        )]));
    }
    Ok(())
}

/// Normalize `(page, page_size)` into `(limit, offset)`. Pages are 1-based;
/// page_size is clamped to [`MAX_PAGE_SIZE`].
pub fn page_bounds(page: Option<i64>, page_size: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let size = page_size.unwrap_or(50).clamp(1, MAX_PAGE_SIZE);
    (size, (page - 1) * size)
}
