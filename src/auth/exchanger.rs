//! Network calls against the upstream token endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use super::attempt::fingerprint;
use super::token::TokenRecord;
use crate::config::OAuthConfig;
use crate::error::AuthError;
use crate::util::clock::{Clock, SystemClock};

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
const ERROR_BODY_SNIPPET_LEN: usize = 200;

/// Performs the two grant requests the lifecycle engine needs.
///
/// Implementations classify failures into [`AuthError`] kinds rather than
/// surfacing raw transport errors.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Trade a single-use authorization code for a token pair.
    async fn exchange_code(&self, code: &str, realm: &str) -> Result<TokenRecord, AuthError>;

    /// Mint a new token pair. The returned record replaces the previous one.
    async fn refresh(&self, refresh_token: &str, realm: &str) -> Result<TokenRecord, AuthError>;
}

/// [`TokenExchanger`] speaking the OAuth 2.0 token endpoint protocol over HTTP.
///
/// Client credentials, the redirect URI and the endpoint are fixed at
/// construction. Rejected grants are never retried; transient failures get
/// the configured [`RetryPolicy`](crate::util::retry::RetryPolicy).
///
/// # Example
/// ```no_run
/// use ledger_oauth::auth::{HttpTokenExchanger, TokenExchanger};
/// use ledger_oauth::config::{ClientCredentials, OAuthConfig};
///
/// # async fn example() -> ledger_oauth::error::Result<()> {
/// let config = OAuthConfig::builder()
///     .credentials(ClientCredentials::new("client-id", "client-secret"))
///     .redirect_uri("https://app.example.com/callback")
///     .build();
/// let exchanger = HttpTokenExchanger::new(config)?;
/// let record = exchanger.exchange_code("abc123", "9341454425005330").await?;
/// # Ok(())
/// # }
/// ```
pub struct HttpTokenExchanger {
    client: reqwest::Client,
    config: OAuthConfig,
    clock: Arc<dyn Clock>,
}

impl HttpTokenExchanger {
    pub fn new(config: OAuthConfig) -> Result<Self, AuthError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn post_grant(
        &self,
        form: &[(&str, &str)],
        realm: &str,
        previous_refresh: Option<&str>,
    ) -> Result<TokenRecord, AuthError> {
        let resp = self
            .client
            .post(&self.config.token_endpoint)
            .basic_auth(
                &self.config.credentials.client_id,
                Some(&self.config.credentials.client_secret),
            )
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        // The status line already carries the server's verdict on the grant,
        // so a body that fails to arrive must not turn into a retry.
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) if status.is_success() => {
                return Err(AuthError::InvalidResponse(format!(
                    "Failed to read token response body: {e}"
                )));
            }
            Err(e) => {
                tracing::warn!(%status, error = %e, "Failed to read token endpoint error body");
                String::new()
            }
        };
        if status.is_success() {
            return parse_token_body(&body, realm, previous_refresh, self.clock.now());
        }
        Err(classify_error(status, &body))
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange_code(&self, code: &str, realm: &str) -> Result<TokenRecord, AuthError> {
        tracing::debug!(code = %fingerprint(code), realm, "Exchanging authorization code");
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let result = self
            .config
            .retry_policy
            .execute(|| self.post_grant(&form, realm, None))
            .await;
        log_result("authorization_code", realm, &result);
        result
    }

    async fn refresh(&self, refresh_token: &str, realm: &str) -> Result<TokenRecord, AuthError> {
        tracing::debug!(realm, "Refreshing access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let result = self
            .config
            .retry_policy
            .execute(|| self.post_grant(&form, realm, Some(refresh_token)))
            .await;
        log_result("refresh_token", realm, &result);
        result
    }
}

fn log_result(grant: &str, realm: &str, result: &Result<TokenRecord, AuthError>) {
    match result {
        Ok(record) => tracing::info!(
            grant,
            realm,
            expires_at = %record.access_expires_at,
            "Token endpoint issued tokens"
        ),
        Err(err @ AuthError::UpstreamRejected { .. }) => {
            tracing::warn!(grant, realm, error = %err, "Token endpoint rejected grant")
        }
        Err(err) => tracing::warn!(grant, realm, error = %err, "Token endpoint call failed"),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    x_refresh_token_expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Build a record from a 2xx body.
///
/// A 2xx means the server accepted the grant, so a body we cannot use is an
/// invalid response and never retried.
fn parse_token_body(
    body: &str,
    realm: &str,
    previous_refresh: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TokenRecord, AuthError> {
    let payload: TokenResponse = serde_json::from_str(body)
        .map_err(|e| AuthError::InvalidResponse(format!("Failed to parse token response: {e}")))?;
    if payload.access_token.is_empty() {
        return Err(AuthError::InvalidResponse(
            "Token response has an empty access_token".to_string(),
        ));
    }
    let refresh_token = payload
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| previous_refresh.map(String::from))
        .ok_or_else(|| {
            AuthError::InvalidResponse("Token response is missing refresh_token".to_string())
        })?;
    let expires_in = payload
        .expires_in
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

    Ok(TokenRecord {
        access_token: payload.access_token,
        refresh_token,
        access_expires_at: now + Duration::seconds(expires_in),
        refresh_expires_at: payload
            .x_refresh_token_expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| now + Duration::seconds(secs)),
        realm: realm.to_string(),
        issued_at: now,
    })
}

fn classify_error(status: StatusCode, body: &str) -> AuthError {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return AuthError::UpstreamTransient(format!(
            "Token endpoint returned {status}: {}",
            snippet(body)
        ));
    }

    let (error, description) = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => (parsed.error, parsed.error_description),
        Err(_) => (
            format!("http_{}", status.as_u16()),
            Some(snippet(body)).filter(|s| !s.is_empty()),
        ),
    };

    if error == "invalid_client" {
        return AuthError::Configuration(format!(
            "Token endpoint rejected the client credentials{}",
            description
                .map(|d| format!(": {d}"))
                .unwrap_or_default()
        ));
    }
    AuthError::UpstreamRejected { error, description }
}

fn snippet(body: &str) -> String {
    body.trim().chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
