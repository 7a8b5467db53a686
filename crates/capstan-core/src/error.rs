// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Capstan skill engine.

use thiserror::Error;

/// The primary error type used across all Capstan crates and provider contracts.
#[derive(Debug, Error)]
pub enum CapstanError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Input failed validation (malformed manifest, bad action config, missing fields).
    #[error("validation error: {0}")]
    Validation(String),

    /// A capability check rejected the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An action handler or external provider failed.
    #[error("handler error: {message}")]
    Handler {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The operation is not allowed in the record's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CapstanError {
    /// Builds a [`CapstanError::Handler`] without an underlying source.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps any error as a [`CapstanError::Storage`].
    pub fn storage(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage {
            source: Box::new(source),
        }
    }

    /// The message recorded on a failed action result.
    ///
    /// Handler errors surface their bare message so callers see exactly what
    /// the handler reported; every other variant uses its display form.
    pub fn action_message(&self) -> String {
        match self {
            Self::Handler { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this error stems from a capability check.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

impl From<serde_json::Error> for CapstanError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_action_message_is_bare() {
        let err = CapstanError::handler("File already exists: a.txt");
        assert_eq!(err.action_message(), "File already exists: a.txt");
        assert_eq!(err.to_string(), "handler error: File already exists: a.txt");
    }

    #[test]
    fn other_variants_use_display_form() {
        let err = CapstanError::PermissionDenied("table users".into());
        assert_eq!(err.action_message(), "permission denied: table users");
        assert!(err.is_permission_denied());
    }

    #[test]
    fn not_found_names_kind_and_id() {
        let err = CapstanError::NotFound {
            kind: "audit entry",
            id: "a-1".into(),
        };
        assert_eq!(err.to_string(), "audit entry not found: a-1");
    }
}
