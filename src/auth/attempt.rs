use crate::error::AuthError;

/// One delivery of the upstream redirect: `(code, state, realm)`.
///
/// Attempts are never persisted. They live only until the exchange guard
/// has classified them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationAttempt {
    pub code: String,
    pub state: String,
    pub realm: String,
}

impl AuthorizationAttempt {
    pub fn new(
        code: impl Into<String>,
        state: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            state: state.into(),
            realm: realm.into(),
        }
    }

    /// Check that the redirect carried a code and a realm.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.code.trim().is_empty() {
            return Err(AuthError::InvalidCallback(
                "authorization code is missing".to_string(),
            ));
        }
        if self.realm.trim().is_empty() {
            return Err(AuthError::InvalidCallback("realm is missing".to_string()));
        }
        Ok(())
    }
}

/// Where to send the user to start the flow, plus the state issued for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Short, non-reversible label for logging a code or token.
pub(crate) fn fingerprint(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}…({})", secret.len())
}
