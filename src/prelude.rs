//! Convenience re-exports for common use.

pub use crate::auth::{
    AccessToken, AuthPhase, AuthStateMachine, AuthenticatedSession, AuthorizationAttempt,
    AuthorizationRequest, ConnectionStatus, FileTokenStore, Outcome, TokenRecord, TokenStore,
};
pub use crate::config::{ClientCredentials, OAuthConfig};
pub use crate::error::{AuthError, ErrorKind, Result, UserAction};
