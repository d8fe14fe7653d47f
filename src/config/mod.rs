//! Immutable configuration for the token exchanger and auth state machine.
//!
//! Configuration is resolved once (from code or the environment), validated,
//! and then handed to the components at construction time. Nothing in the
//! engine reads credentials or the redirect URI ambiently at call time.

use std::fmt;
use std::time::Duration;

use bon::Builder;

use crate::error::AuthError;
use crate::util::retry::RetryPolicy;

pub const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://appcenter.intuit.com/connect/oauth2";
pub const DEFAULT_TOKEN_ENDPOINT: &str =
    "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
pub const DEFAULT_SCOPE: &str = "com.intuit.quickbooks.accounting";

/// Upper bound on how long the upstream server honours an authorization code.
pub const MAX_CODE_LIFETIME_SECS: i64 = 600;

const ENV_CLIENT_ID: &str = "LEDGER_OAUTH_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "LEDGER_OAUTH_CLIENT_SECRET";
const ENV_REDIRECT_URI: &str = "LEDGER_OAUTH_REDIRECT_URI";
const ENV_AUTHORIZATION_ENDPOINT: &str = "LEDGER_OAUTH_AUTHORIZATION_ENDPOINT";
const ENV_TOKEN_ENDPOINT: &str = "LEDGER_OAUTH_TOKEN_ENDPOINT";
const ENV_SCOPES: &str = "LEDGER_OAUTH_SCOPES";

/// OAuth client id/secret pair.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Configuration for the authorization-code flow.
///
/// # Example
/// ```
/// use ledger_oauth::config::{ClientCredentials, OAuthConfig};
///
/// let config = OAuthConfig::builder()
///     .credentials(ClientCredentials::new("client-id", "client-secret"))
///     .redirect_uri("https://app.example.com/callback")
///     .build();
/// config.validate()?;
/// # Ok::<(), ledger_oauth::AuthError>(())
/// ```
#[derive(Debug, Clone, Builder)]
pub struct OAuthConfig {
    pub credentials: ClientCredentials,
    /// Must be byte-identical to the URI registered with the upstream server.
    #[builder(into)]
    pub redirect_uri: String,
    #[builder(into, default = DEFAULT_AUTHORIZATION_ENDPOINT.to_string())]
    pub authorization_endpoint: String,
    #[builder(into, default = DEFAULT_TOKEN_ENDPOINT.to_string())]
    pub token_endpoint: String,
    #[builder(default = vec![DEFAULT_SCOPE.to_string()])]
    pub scopes: Vec<String>,
    /// Timeout for a single HTTP attempt against the token endpoint.
    #[builder(default = Duration::from_secs(6))]
    pub request_timeout: Duration,
    /// Deadline for the network part of `handle_callback` / `ensure_fresh_token`.
    #[builder(default = Duration::from_secs(15))]
    pub operation_timeout: Duration,
    /// Tokens expiring within this margin are refreshed before use.
    #[builder(default = chrono::Duration::seconds(60))]
    pub safety_margin: chrono::Duration,
    /// How long exchange guard entries are retained.
    #[builder(default = chrono::Duration::seconds(MAX_CODE_LIFETIME_SECS))]
    pub guard_retention: chrono::Duration,
    /// How long an issued state value stays valid.
    #[builder(default = chrono::Duration::seconds(MAX_CODE_LIFETIME_SECS))]
    pub state_ttl: chrono::Duration,
    #[builder(default)]
    pub retry_policy: RetryPolicy,
}

impl OAuthConfig {
    /// Load from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, AuthError> {
        let _ = dotenvy::dotenv();

        let client_id = required_env(ENV_CLIENT_ID)?;
        let client_secret = required_env(ENV_CLIENT_SECRET)?;
        let redirect_uri = required_env(ENV_REDIRECT_URI)?;

        let scopes = optional_env(ENV_SCOPES)
            .map(|raw| {
                raw.split([' ', ','])
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .filter(|scopes| !scopes.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_SCOPE.to_string()]);

        let config = Self::builder()
            .credentials(ClientCredentials::new(client_id, client_secret))
            .redirect_uri(redirect_uri)
            .maybe_authorization_endpoint(optional_env(ENV_AUTHORIZATION_ENDPOINT))
            .maybe_token_endpoint(optional_env(ENV_TOKEN_ENDPOINT))
            .scopes(scopes)
            .build();
        config.validate()?;
        Ok(config)
    }

    /// Reject configuration that would make any network call pointless.
    ///
    /// The redirect URI is checked for shape only; it is never rewritten.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.credentials.client_id.trim().is_empty() {
            return Err(AuthError::Configuration("client id is empty".to_string()));
        }
        if self.credentials.client_secret.trim().is_empty() {
            return Err(AuthError::Configuration(
                "client secret is empty".to_string(),
            ));
        }
        check_url("redirect URI", &self.redirect_uri)?;
        check_url("authorization endpoint", &self.authorization_endpoint)?;
        check_url("token endpoint", &self.token_endpoint)?;
        if self.scopes.is_empty() {
            return Err(AuthError::Configuration(
                "at least one scope is required".to_string(),
            ));
        }
        if self.guard_retention < chrono::Duration::seconds(MAX_CODE_LIFETIME_SECS) {
            return Err(AuthError::Configuration(format!(
                "guard retention must be at least {MAX_CODE_LIFETIME_SECS}s"
            )));
        }
        if self.safety_margin < chrono::Duration::zero() {
            return Err(AuthError::Configuration(
                "safety margin cannot be negative".to_string(),
            ));
        }
        if self.request_timeout.is_zero() || self.operation_timeout.is_zero() {
            return Err(AuthError::Configuration(
                "timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_url(label: &str, value: &str) -> Result<(), AuthError> {
    let parsed = reqwest::Url::parse(value)
        .map_err(|e| AuthError::Configuration(format!("{label} '{value}' is malformed: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AuthError::Configuration(format!(
            "{label} '{value}' must use http or https"
        )));
    }
    if parsed.host_str().is_none() {
        return Err(AuthError::Configuration(format!(
            "{label} '{value}' has no host"
        )));
    }
    if parsed.fragment().is_some() {
        return Err(AuthError::Configuration(format!(
            "{label} '{value}' must not contain a fragment"
        )));
    }
    Ok(())
}

fn required_env(name: &str) -> Result<String, AuthError> {
    optional_env(name)
        .ok_or_else(|| AuthError::Configuration(format!("{name} is required")))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
