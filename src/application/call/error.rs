//! Call use case errors

use crate::domain::media::MediaError;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::ChatId;
use crate::domain::signaling::StoreError;
use thiserror::Error;

pub type CallResult<T> = std::result::Result<T, CallError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] StoreError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No incoming call in chat {0}")]
    NoIncomingCall(ChatId),

    #[error("A call is already in progress in chat {0}")]
    LineBusy(ChatId),

    #[error("This client already has a call session in chat {0}")]
    AlreadyInCall(ChatId),

    #[error("Malformed call document: {0}")]
    MalformedDocument(String),
}

impl From<DomainError> for CallError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Unauthorized(msg) => CallError::Unauthorized(msg),
            DomainError::ValidationError(msg) => CallError::Validation(msg),
            DomainError::InvalidStateTransition(msg) | DomainError::InvalidOperation(msg) => {
                CallError::InvalidState(msg)
            }
            DomainError::MalformedDocument(msg) => CallError::MalformedDocument(msg),
        }
    }
}

impl CallError {
    /// Stable code for UI consumption
    pub fn code(&self) -> &'static str {
        match self {
            CallError::Unauthorized(_) => "unauthorized",
            CallError::Validation(_) => "invalid-argument",
            CallError::Media(e) => e.code(),
            CallError::Signaling(_) => "signaling-failed",
            CallError::InvalidState(_) => "invalid-state",
            CallError::NoIncomingCall(_) => "no-incoming-call",
            CallError::LineBusy(_) => "line-busy",
            CallError::AlreadyInCall(_) => "already-in-call",
            CallError::MalformedDocument(_) => "malformed-document",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_conversion() {
        let err: CallError = DomainError::Unauthorized("not a participant".into()).into();
        assert_eq!(err.code(), "unauthorized");

        let err: CallError = DomainError::InvalidStateTransition("x".into()).into();
        assert!(matches!(err, CallError::InvalidState(_)));
    }

    #[test]
    fn test_media_error_keeps_code() {
        let err: CallError = MediaError::DeviceBusy.into();
        assert_eq!(err.code(), "device-busy");
        assert_eq!(err.to_string(), MediaError::DeviceBusy.to_string());
    }
}
