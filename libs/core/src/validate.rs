use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Upper bound on container name length.
pub const MAX_CONTAINER_NAME_LEN: usize = 128;

static CONTAINER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").expect("container name pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("容器名不能为空")]
    Empty,
    #[error("容器名过长（最多 {max} 个字符）")]
    TooLong { max: usize },
    #[error("仅允许字母、数字、下划线、点和中划线，且需以字母或数字开头")]
    InvalidCharacters,
}

/// Validates an operator-supplied container name and returns it trimmed.
pub fn validate_container_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::Empty);
    }
    if name.chars().count() > MAX_CONTAINER_NAME_LEN {
        return Err(ValidationError::TooLong {
            max: MAX_CONTAINER_NAME_LEN,
        });
    }
    if !CONTAINER_NAME.is_match(name) {
        return Err(ValidationError::InvalidCharacters);
    }
    Ok(name.to_string())
}
