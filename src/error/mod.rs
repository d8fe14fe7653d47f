//! Error types for the token lifecycle engine.

pub mod unified;

pub use unified::{ErrorKind, UserAction};

use thiserror::Error;

/// Terminal failure of an authorization or token operation.
///
/// Errors are `Clone + PartialEq` because a failed exchange is cached by the
/// exchange guard and replayed verbatim to duplicate callback deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("State parameter is missing or does not match an issued value")]
    CsrfMismatch,

    #[error("Authorization code was already consumed")]
    CodeAlreadyConsumed,

    #[error("An exchange for this authorization code is already in flight")]
    ConcurrentExchange,

    #[error("Upstream rejected the grant: {error}{}", description_suffix(.description))]
    UpstreamRejected {
        error: String,
        description: Option<String>,
    },

    #[error("Upstream unavailable: {0}")]
    UpstreamTransient(String),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    #[error("No tokens stored for realm {realm}")]
    NotAuthenticated { realm: String },
}

fn description_suffix(description: &Option<String>) -> String {
    match description {
        Some(text) if !text.is_empty() => format!(" ({text})"),
        _ => String::new(),
    }
}

impl AuthError {
    pub fn rejected(error: impl Into<String>, description: Option<String>) -> Self {
        Self::UpstreamRejected {
            error: error.into(),
            description,
        }
    }

    /// Classify this error into a machine-readable kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CsrfMismatch => ErrorKind::CsrfMismatch,
            Self::CodeAlreadyConsumed => ErrorKind::CodeAlreadyConsumed,
            Self::ConcurrentExchange => ErrorKind::ConcurrentExchange,
            Self::UpstreamRejected { .. } => ErrorKind::UpstreamRejected,
            Self::UpstreamTransient(_) => ErrorKind::UpstreamTransient,
            Self::InvalidResponse(_) => ErrorKind::InvalidResponse,
            Self::Persistence(_) => ErrorKind::PersistenceError,
            Self::Configuration(_) => ErrorKind::ConfigurationError,
            Self::InvalidCallback(_) => ErrorKind::InvalidCallback,
            Self::NotAuthenticated { .. } => ErrorKind::NotAuthenticated,
        }
    }

    /// Whether the token exchanger may repeat the request.
    ///
    /// Only failures where the server never judged the grant qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamTransient(_))
    }

    /// Suggest what the user should do next.
    pub fn user_action(&self) -> UserAction {
        match self {
            Self::CsrfMismatch
            | Self::CodeAlreadyConsumed
            | Self::UpstreamRejected { .. }
            | Self::InvalidCallback(_)
            | Self::NotAuthenticated { .. } => UserAction::RestartAuthorization,
            Self::UpstreamTransient(_) | Self::ConcurrentExchange => UserAction::RetryShortly,
            Self::Persistence(_) | Self::InvalidResponse(_) | Self::Configuration(_) => {
                UserAction::ContactSupport
            }
        }
    }

    /// True when only a fresh authorization can recover.
    pub fn requires_reauthorization(&self) -> bool {
        self.user_action() == UserAction::RestartAuthorization
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::UpstreamTransient(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

/// Misuse of the exchange guard's admit/complete protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("No guard entry exists for this authorization code")]
    UnknownCode,
    #[error("Guard entry already completed")]
    NotPending,
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_actions_group_kinds() {
        assert_eq!(
            AuthError::CsrfMismatch.user_action(),
            UserAction::RestartAuthorization
        );
        assert_eq!(
            AuthError::rejected("invalid_grant", None).user_action(),
            UserAction::RestartAuthorization
        );
        assert_eq!(
            AuthError::CodeAlreadyConsumed.user_action(),
            UserAction::RestartAuthorization
        );
        assert_eq!(
            AuthError::UpstreamTransient("503".into()).user_action(),
            UserAction::RetryShortly
        );
        assert_eq!(
            AuthError::ConcurrentExchange.user_action(),
            UserAction::RetryShortly
        );
        assert_eq!(
            AuthError::Persistence("disk full".into()).user_action(),
            UserAction::ContactSupport
        );
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(AuthError::UpstreamTransient("reset".into()).is_retryable());
        assert!(!AuthError::rejected("invalid_grant", None).is_retryable());
        assert!(!AuthError::InvalidResponse("bad json".into()).is_retryable());
    }

    #[test]
    fn rejected_display_includes_description() {
        let err = AuthError::rejected("invalid_grant", Some("Incorrect redirect_uri".into()));
        assert_eq!(
            err.to_string(),
            "Upstream rejected the grant: invalid_grant (Incorrect redirect_uri)"
        );
        assert_eq!(
            AuthError::rejected("invalid_grant", None).to_string(),
            "Upstream rejected the grant: invalid_grant"
        );
    }

    #[test]
    fn kind_codes_are_snake_case() {
        assert_eq!(
            AuthError::Persistence("x".into()).kind().to_string(),
            "persistence_error"
        );
        assert_eq!(ErrorKind::CsrfMismatch.to_string(), "csrf_mismatch");
    }
}
