//! Error taxonomy for the diagnosis pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum DiagnosisError {
    /// A setting is missing or malformed.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The object store was unreachable, denied the request, or was inconsistent.
    #[error("Storage error: {message}")]
    Storage { message: String, transient: bool },

    /// The requested object no longer exists.
    #[error("Object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },

    /// The bot was unreachable, misconfigured, or answered with an error.
    #[error("Bot invocation error: {message}")]
    BotInvocation { message: String, transient: bool },

    /// The weather service could not be reached or returned unusable data.
    #[error("Weather error: {message}")]
    Weather { message: String },

    /// The caller aborted the request.
    #[error("Request cancelled")]
    Cancelled,
}

/// The kind of a [`DiagnosisError`], without its detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Storage,
    NotFound,
    BotInvocation,
    Weather,
    Cancelled,
}

impl DiagnosisError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn storage(message: impl Into<String>, transient: bool) -> Self {
        Self::Storage { message: message.into(), transient }
    }

    pub fn bot(message: impl Into<String>, transient: bool) -> Self {
        Self::BotInvocation { message: message.into(), transient }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::BotInvocation { .. } => ErrorKind::BotInvocation,
            Self::Weather { .. } => ErrorKind::Weather,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether another attempt at the same call might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage { transient, .. } | Self::BotInvocation { transient, .. } => *transient,
            _ => false,
        }
    }
}

impl From<config::ConfigError> for DiagnosisError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_transience() {
        assert_eq!(DiagnosisError::storage("slow down", true).kind(), ErrorKind::Storage);
        assert!(DiagnosisError::storage("slow down", true).is_transient());
        assert!(!DiagnosisError::bot("no such alias", false).is_transient());
        assert!(!DiagnosisError::Cancelled.is_transient());
        assert_eq!(DiagnosisError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&ErrorKind::BotInvocation).unwrap(), "\"bot_invocation\"");
    }
}
