//! Common error types for GeoKey

use std::collections::BTreeMap;

use thiserror::Error;

/// Common result type for GeoKey operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the GeoKey services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found, or hidden from the requesting user
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request carries no valid credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated user is not allowed to perform the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Request is structurally broken or references entities inconsistently
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Contribution payload failed field validation; one message per field key
    #[error("Validation failed: {}", format_field_errors(.0))]
    Validation(BTreeMap<String, String>),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a validation error for a single field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.into(), message.into());
        Error::Validation(errors)
    }
}

fn format_field_errors(errors: &BTreeMap<String, String>) -> String {
    errors
        .iter()
        .map(|(field, message)| format!("{}: {}", field, message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_lists_fields_in_order() {
        let mut errors = BTreeMap::new();
        errors.insert("height".to_string(), "Must be a number.".to_string());
        errors.insert("age".to_string(), "This field is required.".to_string());
        let err = Error::Validation(errors);
        assert_eq!(
            err.to_string(),
            "Validation failed: age: This field is required.; height: Must be a number."
        );
    }

    #[test]
    fn single_field_helper() {
        let err = Error::validation("species", "Unknown lookup value.");
        match err {
            Error::Validation(map) => {
                assert_eq!(map.len(), 1);
                assert_eq!(map["species"], "Unknown lookup value.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
