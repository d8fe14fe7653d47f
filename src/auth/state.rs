//! Issued CSRF state values.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::util::clock::Clock;

/// Registry of state values handed out with authorization URLs.
///
/// Verification does not consume a state: a duplicate delivery of the same
/// callback must still reach the exchange guard and get the cached outcome.
/// States simply age out after the configured TTL.
pub struct StateRegistry {
    issued: Mutex<HashMap<String, DateTime<Utc>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl StateRegistry {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            issued: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Generate and remember a fresh random state value.
    pub fn issue(&self) -> String {
        let state = uuid::Uuid::new_v4().simple().to_string();
        self.remember(state.clone());
        state
    }

    /// Remember a state value generated elsewhere (e.g. by the redirect UI).
    pub fn remember(&self, state: impl Into<String>) {
        let now = self.clock.now();
        let mut issued = self.issued.lock().unwrap_or_else(|p| p.into_inner());
        prune(&mut issued, now, self.ttl);
        issued.insert(state.into(), now);
    }

    /// True when `state` was issued and has not expired.
    pub fn verify(&self, state: &str) -> bool {
        if state.is_empty() {
            return false;
        }
        let now = self.clock.now();
        let mut issued = self.issued.lock().unwrap_or_else(|p| p.into_inner());
        prune(&mut issued, now, self.ttl);
        issued.contains_key(state)
    }

    pub fn len(&self) -> usize {
        self.issued.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn prune(issued: &mut HashMap<String, DateTime<Utc>>, now: DateTime<Utc>, ttl: Duration) {
    issued.retain(|_, issued_at| now - *issued_at <= ttl);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::ManualClock;

    fn registry() -> (ManualClock, StateRegistry) {
        let clock = ManualClock::new();
        let registry = StateRegistry::new(Duration::minutes(10), Arc::new(clock.clone()));
        (clock, registry)
    }

    #[test]
    fn issued_state_verifies_repeatedly() {
        let (_clock, registry) = registry();
        let state = registry.issue();
        assert_eq!(state.len(), 32);
        assert!(registry.verify(&state));
        assert!(registry.verify(&state));
    }

    #[test]
    fn unknown_or_empty_state_fails() {
        let (_clock, registry) = registry();
        registry.issue();
        assert!(!registry.verify("forged"));
        assert!(!registry.verify(""));
    }

    #[test]
    fn state_expires_after_ttl() {
        let (clock, registry) = registry();
        let state = registry.issue();
        clock.advance(Duration::minutes(11));
        assert!(!registry.verify(&state));
        assert!(registry.is_empty());
    }
}
