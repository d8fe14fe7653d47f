//! Orchestration of the authorization-code lifecycle.
//!
//! The state machine is the sole entry point into the engine. It validates
//! the callback, consults the exchange guard, runs the exchanger under a
//! deadline, writes through the token store and reports a typed outcome.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use strum::Display;

use super::attempt::{fingerprint, AuthorizationAttempt, AuthorizationRequest};
use super::exchanger::{HttpTokenExchanger, TokenExchanger};
use super::guard::{Admission, ExchangeGuard};
use super::state::StateRegistry;
use super::store::TokenStore;
use super::token::TokenRecord;
use crate::config::OAuthConfig;
use crate::error::AuthError;
use crate::util::clock::{Clock, SystemClock};
use crate::util::timeout::with_timeout;

/// Terminal result of [`AuthStateMachine::handle_callback`].
pub type Outcome = Result<AuthenticatedSession, AuthError>;

/// What a successful exchange established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub realm: String,
    pub access_expires_at: DateTime<Utc>,
}

/// Lifecycle phase of one realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AuthPhase {
    Idle,
    Exchanging,
    Authenticated,
    Refreshing,
    Failed,
}

/// Locally known connection health, computed without network calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    NotConnected,
    Active {
        access_expires_at: DateTime<Utc>,
    },
    /// The access token is stale but can be refreshed.
    AccessExpired {
        refresh_expires_at: Option<DateTime<Utc>>,
    },
    /// Only a new authorization can reconnect this realm.
    RefreshExpired,
}

/// Bearer credential handed to the business-API layer.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub realm: String,
    pub expires_at: DateTime<Utc>,
    value: String,
}

impl AccessToken {
    fn from_record(record: &TokenRecord) -> Self {
        Self {
            realm: record.realm.clone(),
            expires_at: record.access_expires_at,
            value: record.access_token.clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("realm", &self.realm)
            .field("expires_at", &self.expires_at)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Authorization-code exchange and token lifecycle engine.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use ledger_oauth::auth::{AuthStateMachine, AuthorizationAttempt, FileTokenStore};
/// use ledger_oauth::config::OAuthConfig;
///
/// # async fn example() -> ledger_oauth::error::Result<()> {
/// let machine = AuthStateMachine::from_config(
///     OAuthConfig::from_env()?,
///     Arc::new(FileTokenStore::new_default()),
/// )?;
/// let request = machine.begin_authorization()?;
/// // ... redirect the user to `request.url`; the redirect handler then calls:
/// let attempt = AuthorizationAttempt::new("abc123", request.state, "9341454425005330");
/// let session = machine.handle_callback(attempt).await?;
/// let token = machine.ensure_fresh_token(&session.realm).await?;
/// # Ok(())
/// # }
/// ```
pub struct AuthStateMachine {
    config: OAuthConfig,
    exchanger: Arc<dyn TokenExchanger>,
    store: Arc<dyn TokenStore>,
    guard: ExchangeGuard<AuthenticatedSession>,
    states: StateRegistry,
    phases: Mutex<HashMap<String, AuthPhase>>,
    /// Bumped by `reset`; a refresh started under an older value is discarded.
    resets: Mutex<HashMap<String, u64>>,
    clock: Arc<dyn Clock>,
}

impl AuthStateMachine {
    pub fn new(
        config: OAuthConfig,
        exchanger: Arc<dyn TokenExchanger>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, AuthError> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self {
            guard: ExchangeGuard::new(config.guard_retention, clock.clone()),
            states: StateRegistry::new(config.state_ttl, clock.clone()),
            phases: Mutex::new(HashMap::new()),
            resets: Mutex::new(HashMap::new()),
            config,
            exchanger,
            store,
            clock,
        })
    }

    /// Build with the HTTP exchanger for `config`.
    pub fn from_config(config: OAuthConfig, store: Arc<dyn TokenStore>) -> Result<Self, AuthError> {
        let exchanger = Arc::new(HttpTokenExchanger::new(config.clone())?);
        Self::new(config, exchanger, store)
    }

    /// Replace the time source. Must be called before any state is issued.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.guard = ExchangeGuard::new(self.config.guard_retention, clock.clone());
        self.states = StateRegistry::new(self.config.state_ttl, clock.clone());
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Issue a state value and build the URL that starts the flow.
    pub fn begin_authorization(&self) -> Result<AuthorizationRequest, AuthError> {
        let state = self.states.issue();
        let scope = self.config.scopes.join(" ");
        let url = reqwest::Url::parse_with_params(
            &self.config.authorization_endpoint,
            &[
                ("client_id", self.config.credentials.client_id.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| AuthError::Configuration(format!("Invalid authorization endpoint: {e}")))?;
        tracing::debug!("Issued authorization state");
        Ok(AuthorizationRequest {
            url: url.into(),
            state,
        })
    }

    /// Accept a state value generated by the caller's own redirect logic.
    pub fn remember_state(&self, state: impl Into<String>) {
        self.states.remember(state);
    }

    /// Process one delivery of the upstream redirect.
    ///
    /// Safe to call any number of times for the same code: at most one call
    /// reaches the network, and every later call returns the same outcome.
    pub async fn handle_callback(&self, attempt: AuthorizationAttempt) -> Outcome {
        if !self.states.verify(&attempt.state) {
            tracing::warn!(realm = %attempt.realm, "Callback state does not match an issued value");
            return Err(AuthError::CsrfMismatch);
        }
        attempt.validate()?;

        match self.guard.admit(&attempt.code) {
            Admission::Proceed => {}
            Admission::AlreadyInFlight => {
                tracing::warn!(
                    code = %fingerprint(&attempt.code),
                    realm = %attempt.realm,
                    "Duplicate callback while exchange is in flight"
                );
                return Err(AuthError::ConcurrentExchange);
            }
            Admission::AlreadyCompleted(result) => {
                tracing::debug!(
                    code = %fingerprint(&attempt.code),
                    realm = %attempt.realm,
                    "Replaying cached exchange outcome"
                );
                return match result {
                    Ok(session) if session.realm != attempt.realm => {
                        Err(AuthError::CodeAlreadyConsumed)
                    }
                    other => other,
                };
            }
        }

        let pending = PendingExchange::new(&self.guard, &attempt.code);
        self.set_phase(&attempt.realm, AuthPhase::Exchanging);

        let outcome = self.exchange_and_store(&attempt).await;

        pending.complete(outcome.clone());
        self.set_phase(
            &attempt.realm,
            if outcome.is_ok() {
                AuthPhase::Authenticated
            } else {
                AuthPhase::Failed
            },
        );
        outcome
    }

    async fn exchange_and_store(&self, attempt: &AuthorizationAttempt) -> Outcome {
        let record = with_timeout(
            self.config.operation_timeout,
            self.exchanger.exchange_code(&attempt.code, &attempt.realm),
        )
        .await?;

        if let Err(err) = self.store.save(&record) {
            tracing::error!(
                realm = %attempt.realm,
                error = %err,
                "Authorization code was consumed upstream but tokens could not be persisted; \
                 a new authorization is required"
            );
            return Err(into_persistence(err));
        }

        tracing::info!(
            realm = %attempt.realm,
            expires_at = %record.access_expires_at,
            "Authorization completed"
        );
        Ok(AuthenticatedSession {
            realm: record.realm,
            access_expires_at: record.access_expires_at,
        })
    }

    /// Return a usable access token, refreshing it first when it is within
    /// the safety margin of expiry.
    pub async fn ensure_fresh_token(&self, realm: &str) -> Result<AccessToken, AuthError> {
        let generation = self.reset_generation(realm);
        let record = self
            .store
            .load(realm)?
            .ok_or_else(|| AuthError::NotAuthenticated {
                realm: realm.to_string(),
            })?;

        let now = self.clock.now();
        if record.is_fresh(now, self.config.safety_margin) {
            return Ok(AccessToken::from_record(&record));
        }
        if record.refresh_expired(now) {
            self.set_phase(realm, AuthPhase::Failed);
            return Err(AuthError::rejected(
                "invalid_grant",
                Some("refresh token has expired".to_string()),
            ));
        }

        self.set_phase(realm, AuthPhase::Refreshing);
        let result = with_timeout(
            self.config.operation_timeout,
            self.exchanger.refresh(&record.refresh_token, realm),
        )
        .await;

        match result {
            Ok(refreshed) => self.commit_refresh(realm, generation, refreshed),
            Err(err @ AuthError::UpstreamRejected { .. }) => {
                if let Some(current) = self.rotated_elsewhere(realm, &record) {
                    tracing::debug!(realm, "Refresh token was already rotated by a concurrent refresh");
                    self.set_phase(realm, AuthPhase::Authenticated);
                    return Ok(AccessToken::from_record(&current));
                }
                self.set_phase(realm, AuthPhase::Failed);
                Err(err)
            }
            Err(err) => {
                self.set_phase(realm, AuthPhase::Failed);
                Err(err)
            }
        }
    }

    fn commit_refresh(
        &self,
        realm: &str,
        generation: u64,
        refreshed: TokenRecord,
    ) -> Result<AccessToken, AuthError> {
        // Held across the check and the save so a concurrent reset lands
        // either before (refresh discarded) or after (record cleared).
        let resets = self.lock_resets();
        if resets.get(realm).copied().unwrap_or(0) != generation {
            drop(resets);
            tracing::warn!(realm, "Discarding refresh that finished after a reset");
            return Err(AuthError::NotAuthenticated {
                realm: realm.to_string(),
            });
        }
        let saved = self.store.save(&refreshed);
        drop(resets);
        if let Err(err) = saved {
            tracing::error!(
                realm,
                error = %err,
                "Refreshed tokens could not be persisted; the previous refresh token may be rotated"
            );
            self.set_phase(realm, AuthPhase::Failed);
            return Err(into_persistence(err));
        }
        if !refreshed.is_fresh(self.clock.now(), self.config.safety_margin) {
            self.set_phase(realm, AuthPhase::Failed);
            return Err(AuthError::InvalidResponse(
                "refreshed access token expires within the safety margin".to_string(),
            ));
        }
        self.set_phase(realm, AuthPhase::Authenticated);
        Ok(AccessToken::from_record(&refreshed))
    }

    /// A fresh record saved by another request path after ours was loaded.
    fn rotated_elsewhere(&self, realm: &str, stale: &TokenRecord) -> Option<TokenRecord> {
        let current = self.store.load(realm).ok().flatten()?;
        let rotated = current.refresh_token != stale.refresh_token
            && current.is_fresh(self.clock.now(), self.config.safety_margin);
        rotated.then_some(current)
    }

    /// Drop local tokens for `realm`. Nothing is revoked upstream.
    ///
    /// A refresh still in flight for `realm` is discarded when it returns.
    pub fn reset(&self, realm: &str) -> Result<(), AuthError> {
        {
            let mut resets = self.lock_resets();
            *resets.entry(realm.to_string()).or_insert(0) += 1;
            self.store.clear(realm).map_err(into_persistence)?;
        }
        let retired = self
            .guard
            .retire(|session| session.realm == realm, AuthError::CodeAlreadyConsumed);
        self.lock_phases().remove(realm);
        tracing::info!(realm, retired, "Authorization reset");
        Ok(())
    }

    pub fn status(&self, realm: &str) -> Result<ConnectionStatus, AuthError> {
        let Some(record) = self.store.load(realm)? else {
            return Ok(ConnectionStatus::NotConnected);
        };
        let now = self.clock.now();
        Ok(if record.refresh_expired(now) {
            ConnectionStatus::RefreshExpired
        } else if now < record.access_expires_at {
            ConnectionStatus::Active {
                access_expires_at: record.access_expires_at,
            }
        } else {
            ConnectionStatus::AccessExpired {
                refresh_expires_at: record.refresh_expires_at,
            }
        })
    }

    /// In-process lifecycle phase for `realm` (`Idle` when never touched).
    pub fn phase(&self, realm: &str) -> AuthPhase {
        self.lock_phases()
            .get(realm)
            .copied()
            .unwrap_or(AuthPhase::Idle)
    }

    fn set_phase(&self, realm: &str, phase: AuthPhase) {
        let previous = self.lock_phases().insert(realm.to_string(), phase);
        tracing::debug!(realm, from = ?previous, to = %phase, "Auth phase transition");
    }

    fn reset_generation(&self, realm: &str) -> u64 {
        self.lock_resets().get(realm).copied().unwrap_or(0)
    }

    fn lock_resets(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.resets.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_phases(&self) -> std::sync::MutexGuard<'_, HashMap<String, AuthPhase>> {
        self.phases.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn into_persistence(err: AuthError) -> AuthError {
    match err {
        AuthError::Persistence(_) => err,
        other => AuthError::Persistence(other.to_string()),
    }
}

/// Completes an admitted guard entry exactly once, even if the exchange
/// future is dropped before it finishes.
struct PendingExchange<'a> {
    guard: &'a ExchangeGuard<AuthenticatedSession>,
    code: String,
    completed: bool,
}

impl<'a> PendingExchange<'a> {
    fn new(guard: &'a ExchangeGuard<AuthenticatedSession>, code: &str) -> Self {
        Self {
            guard,
            code: code.to_string(),
            completed: false,
        }
    }

    fn complete(mut self, outcome: Outcome) {
        self.record(outcome);
    }

    fn record(&mut self, outcome: Outcome) {
        self.completed = true;
        if let Err(err) = self.guard.complete(&self.code, outcome) {
            tracing::error!(
                code = %fingerprint(&self.code),
                error = %err,
                "Exchange guard protocol violated"
            );
        }
    }
}

impl Drop for PendingExchange<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.record(Err(AuthError::UpstreamTransient(
                "exchange was cancelled before completion".to_string(),
            )));
        }
    }
}
