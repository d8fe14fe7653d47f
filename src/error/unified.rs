//! Error classification and user-facing recovery guidance.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Machine-readable error code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    CsrfMismatch,
    CodeAlreadyConsumed,
    ConcurrentExchange,
    UpstreamRejected,
    UpstreamTransient,
    InvalidResponse,
    PersistenceError,
    ConfigurationError,
    InvalidCallback,
    NotAuthenticated,
}

/// What the person driving the flow should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UserAction {
    RestartAuthorization,
    RetryShortly,
    ContactSupport,
}

impl UserAction {
    /// Message suitable for showing to the end user.
    pub fn message(&self) -> &'static str {
        match self {
            Self::RestartAuthorization => {
                "The connection could not be completed. Please restart the authorization flow."
            }
            Self::RetryShortly => {
                "The accounting service is busy or unreachable. Please try again shortly."
            }
            Self::ContactSupport => {
                "The connection is in an inconsistent state. Please contact support."
            }
        }
    }
}
