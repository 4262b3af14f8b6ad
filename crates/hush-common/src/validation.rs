//! Input validation utilities.
//!
//! Centralized validation helpers used across API routes and services.

use std::sync::LazyLock;

use validator::Validate;

use crate::error::HushError;

/// E.164: leading `+`, country code 1-9, 7-15 digits total.
pub static PHONE_REGEX: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^\+[1-9]\d{6,14}$").unwrap());

/// Usernames: 3-30 chars, alphanumeric + underscore.
pub static USERNAME_REGEX: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-zA-Z0-9_]{3,30}$").unwrap());

/// Six decimal digits — verification and approval codes.
pub static CODE_REGEX: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^\d{6}$").unwrap());

/// Validate a request body, returning `HushError::InvalidInput` on failure.
pub fn validate_request<T: Validate>(body: &T) -> Result<(), HushError> {
    body.validate().map_err(|e| HushError::InvalidInput {
        message: format_validation_errors(e),
    })
}

/// Format validation errors into a human-readable string.
fn format_validation_errors(errors: validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for '{field}'"))
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Check an E.164 phone number shape.
pub fn validate_phone(phone: &str) -> Result<(), HushError> {
    if PHONE_REGEX.is_match(phone) {
        Ok(())
    } else {
        Err(HushError::InvalidInput {
            message: "Phone number must be E.164 (e.g. +15551234567)".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_shapes() {
        assert!(validate_phone("+15551234567").is_ok());
        assert!(validate_phone("+447911123456").is_ok());
        assert!(validate_phone("15551234567").is_err());
        assert!(validate_phone("+0551234567").is_err());
        assert!(validate_phone("+1555").is_err());
        assert!(validate_phone("+1555123456789012345").is_err());
    }

    #[test]
    fn username_shapes() {
        assert!(USERNAME_REGEX.is_match("ada_lovelace"));
        assert!(USERNAME_REGEX.is_match("abc"));
        assert!(!USERNAME_REGEX.is_match("ab"));
        assert!(!USERNAME_REGEX.is_match("has space"));
        assert!(!USERNAME_REGEX.is_match("dash-ed"));
        assert!(!USERNAME_REGEX.is_match(&"x".repeat(31)));
    }
}
