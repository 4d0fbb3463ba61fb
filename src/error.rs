//! # Engine Error Types
//!
//! Caller-facing errors of [`crate::engine::Engine`] and model declaration
//! errors. Callers of `create_tx`/`transit` branch on [`EngineError::kind`].

use std::fmt;
use thiserror::Error;

/// Error category exposed to callers of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    InvalidArgument,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("model '{model}' has been registered already")]
    AlreadyRegistered { model: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl EngineError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn already_registered(model: impl Into<String>) -> Self {
        Self::AlreadyRegistered {
            model: model.into(),
        }
    }

    /// Category of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::PermissionDenied { .. } | EngineError::AlreadyRegistered { .. } => {
                ErrorKind::PermissionDenied
            }
            EngineError::InvalidArgument { .. } | EngineError::Model(_) => {
                ErrorKind::InvalidArgument
            }
            EngineError::Internal { .. } => ErrorKind::Internal,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Problems detected while declaring or using a model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("invalid model name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("model '{model}' declares no states")]
    Empty { model: String },

    #[error("model '{model}' declares state '{state}' more than once")]
    DuplicateState { model: String, state: String },

    #[error("state '{referenced_by}' of model '{model}' references unknown state '{state}'")]
    UnknownState {
        model: String,
        state: String,
        referenced_by: String,
    },

    #[error("model '{model}' should have at least one initial state")]
    MissingInitialState { model: String },

    #[error("model '{model}' should have at least one final state")]
    MissingFinalState { model: String },

    #[error("state '{state}': {field} should be zero or at least one second")]
    InvalidDuration { state: String, field: String },

    #[error("model '{model}' has no service of type {expected}")]
    ServiceType { model: String, expected: String },

    #[error("model '{model}' is attached to an engine already")]
    EngineAttached { model: String },

    #[error("attribute '{key}' collides with a transaction field")]
    ReservedAttribute { key: String },
}

impl ModelError {
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_state(
        model: impl Into<String>,
        state: impl Into<String>,
        referenced_by: impl Into<String>,
    ) -> Self {
        Self::UnknownState {
            model: model.into(),
            state: state.into(),
            referenced_by: referenced_by.into(),
        }
    }

    pub fn reserved_attribute(key: impl Into<String>) -> Self {
        Self::ReservedAttribute { key: key.into() }
    }

    pub fn invalid_duration(state: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidDuration {
            state: state.into(),
            field: field.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_kinds() {
        assert_eq!(EngineError::not_found("tx").kind(), ErrorKind::NotFound);
        assert_eq!(
            EngineError::permission_denied("illegal").kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            EngineError::already_registered("payments").kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(EngineError::internal("db").kind(), ErrorKind::Internal);

        let model_err = EngineError::from(ModelError::MissingInitialState {
            model: "payments".to_string(),
        });
        assert_eq!(model_err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = EngineError::permission_denied("transition is illegal from A to C");
        assert_eq!(
            err.to_string(),
            "permission denied: transition is illegal from A to C"
        );

        let err = ModelError::unknown_state("payments", "GHOST", "NEW");
        assert!(err.to_string().contains("GHOST"));
        assert!(err.to_string().contains("NEW"));
    }
}
