#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use ledger_oauth::auth::{AuthStateMachine, TokenExchanger, TokenRecord, TokenStore};
use ledger_oauth::config::{ClientCredentials, OAuthConfig};
use ledger_oauth::util::clock::{Clock, ManualClock};
use ledger_oauth::AuthError;
use tokio::sync::Notify;

pub const REALM: &str = "9341454425005330";

#[derive(Default)]
pub struct InMemoryTokenStore {
    records: Mutex<HashMap<String, TokenRecord>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, record: TokenRecord) {
        self.records
            .lock()
            .expect("store lock poisoned")
            .insert(record.realm.clone(), record);
    }

    pub fn get(&self, realm: &str) -> Option<TokenRecord> {
        self.records
            .lock()
            .expect("store lock poisoned")
            .get(realm)
            .cloned()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl TokenStore for InMemoryTokenStore {
    fn load(&self, realm: &str) -> Result<Option<TokenRecord>, AuthError> {
        Ok(self.get(realm))
    }

    fn save(&self, record: &TokenRecord) -> Result<(), AuthError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AuthError::Persistence("disk full".to_string()));
        }
        record.validate()?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.seed(record.clone());
        Ok(())
    }

    fn clear(&self, realm: &str) -> Result<(), AuthError> {
        self.records
            .lock()
            .expect("store lock poisoned")
            .remove(realm);
        Ok(())
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Exchanger double that counts calls and mints predictable tokens.
pub struct FakeExchanger {
    clock: ManualClock,
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    exchange_error: Mutex<Option<AuthError>>,
    refresh_error: Mutex<Option<AuthError>>,
    refresh_lifetime: Mutex<Duration>,
    delay: Mutex<Option<StdDuration>>,
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    before_refresh: Mutex<Option<Hook>>,
}

impl FakeExchanger {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            exchange_error: Mutex::new(None),
            refresh_error: Mutex::new(None),
            refresh_lifetime: Mutex::new(Duration::seconds(3600)),
            delay: Mutex::new(None),
            gate: Mutex::new(None),
            before_refresh: Mutex::new(None),
        }
    }

    pub fn fail_exchange(&self, error: AuthError) {
        *self.exchange_error.lock().unwrap() = Some(error);
    }

    pub fn fail_refresh(&self, error: AuthError) {
        *self.refresh_error.lock().unwrap() = Some(error);
    }

    /// Lifetime of access tokens minted by `refresh`.
    pub fn refresh_lifetime(&self, lifetime: Duration) {
        *self.refresh_lifetime.lock().unwrap() = lifetime;
    }

    pub fn delay(&self, by: StdDuration) {
        *self.delay.lock().unwrap() = Some(by);
    }

    /// Block exchanges and refreshes until `release` is notified; `entered`
    /// fires on entry.
    pub fn gate(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some((entered.clone(), release.clone()));
        (entered, release)
    }

    pub fn before_refresh(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.before_refresh.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn mint(&self, access: String, refresh: String, realm: &str, lifetime: Duration) -> TokenRecord {
        let now = self.clock.now();
        TokenRecord {
            access_token: access,
            refresh_token: refresh,
            access_expires_at: now + lifetime,
            refresh_expires_at: Some(now + Duration::days(100)),
            realm: realm.to_string(),
            issued_at: now,
        }
    }
}

#[async_trait]
impl TokenExchanger for FakeExchanger {
    async fn exchange_code(&self, code: &str, realm: &str) -> Result<TokenRecord, AuthError> {
        let n = self.exchange_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = self.gate.lock().unwrap().clone();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let error = self.exchange_error.lock().unwrap().clone();
        if let Some(err) = error {
            return Err(err);
        }
        Ok(self.mint(
            format!("access-{code}-{n}"),
            format!("refresh-{n}"),
            realm,
            Duration::seconds(3600),
        ))
    }

    async fn refresh(&self, refresh_token: &str, realm: &str) -> Result<TokenRecord, AuthError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = self.gate.lock().unwrap().clone();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        if let Some(hook) = self.before_refresh.lock().unwrap().as_ref() {
            hook();
        }
        let error = self.refresh_error.lock().unwrap().clone();
        if let Some(err) = error {
            return Err(err);
        }
        let lifetime = *self.refresh_lifetime.lock().unwrap();
        Ok(self.mint(
            format!("refreshed-access-{n}"),
            format!("{refresh_token}-rotated-{n}"),
            realm,
            lifetime,
        ))
    }
}

pub fn config() -> OAuthConfig {
    OAuthConfig::builder()
        .credentials(ClientCredentials::new("id", "secret"))
        .redirect_uri("https://app.example.com/callback")
        .build()
}

pub struct Harness {
    pub clock: ManualClock,
    pub store: Arc<InMemoryTokenStore>,
    pub exchanger: Arc<FakeExchanger>,
    pub machine: Arc<AuthStateMachine>,
}

pub fn harness_with(config: OAuthConfig) -> Harness {
    let clock = ManualClock::new();
    let store = Arc::new(InMemoryTokenStore::new());
    let exchanger = Arc::new(FakeExchanger::new(clock.clone()));
    let machine = AuthStateMachine::new(config, exchanger.clone(), store.clone())
        .expect("valid config")
        .with_clock(Arc::new(clock.clone()));
    Harness {
        clock,
        store,
        exchanger,
        machine: Arc::new(machine),
    }
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn record_expiring_in(clock: &ManualClock, secs: i64) -> TokenRecord {
    let now = clock.now();
    TokenRecord {
        access_token: "stored-access".to_string(),
        refresh_token: "stored-refresh".to_string(),
        access_expires_at: now + Duration::seconds(secs),
        refresh_expires_at: Some(now + Duration::days(100)),
        realm: REALM.to_string(),
        issued_at: now,
    }
}
