//! At-most-once consumption of authorization codes.
//!
//! The callback that carries an authorization code may be delivered more than
//! once (reloads, duplicate tabs, framework re-execution). The upstream server
//! accepts a code exactly once, so every delivery after the first must be
//! answered from here instead of from the network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::error::{AuthError, GuardError};
use crate::util::clock::Clock;

/// Lifecycle of a guard entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Result of [`ExchangeGuard::admit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Admission<T> {
    /// First sighting of the code; the caller owns the exchange.
    Proceed,
    /// Another caller admitted this code and has not completed yet.
    AlreadyInFlight,
    /// The exchange already finished; this is its outcome.
    AlreadyCompleted(Result<T, AuthError>),
}

#[derive(Debug)]
struct GuardEntry<T> {
    status: GuardStatus,
    result: Option<Result<T, AuthError>>,
    created_at: DateTime<Utc>,
}

/// Process-wide map from authorization code to exchange status.
///
/// `admit` is a single check-and-set under one mutex, so two near-simultaneous
/// deliveries of the same code can never both observe [`Admission::Proceed`].
/// The mutex is never held across an await point.
pub struct ExchangeGuard<T> {
    entries: Mutex<HashMap<String, GuardEntry<T>>>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> ExchangeGuard<T> {
    pub fn new(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
            clock,
        }
    }

    /// Classify a delivery of `code`, marking it pending on first sight.
    pub fn admit(&self, code: &str) -> Admission<T> {
        let now = self.clock.now();
        let mut entries = self.lock();
        evict(&mut entries, now, self.retention);

        match entries.get(code) {
            Some(entry) => match (&entry.status, &entry.result) {
                (GuardStatus::Pending, _) | (_, None) => Admission::AlreadyInFlight,
                (_, Some(result)) => Admission::AlreadyCompleted(result.clone()),
            },
            None => {
                entries.insert(
                    code.to_string(),
                    GuardEntry {
                        status: GuardStatus::Pending,
                        result: None,
                        created_at: now,
                    },
                );
                Admission::Proceed
            }
        }
    }

    /// Record the terminal outcome for a pending code.
    pub fn complete(&self, code: &str, result: Result<T, AuthError>) -> Result<(), GuardError> {
        let mut entries = self.lock();
        let entry = entries.get_mut(code).ok_or(GuardError::UnknownCode)?;
        if entry.status != GuardStatus::Pending {
            return Err(GuardError::NotPending);
        }
        entry.status = if result.is_ok() {
            GuardStatus::Succeeded
        } else {
            GuardStatus::Failed
        };
        entry.result = Some(result);
        Ok(())
    }

    /// Replace cached successes matching `predicate` with a failure.
    ///
    /// Used when the state a success described no longer exists locally, so
    /// a replayed delivery must not report it. Returns how many were retired.
    pub fn retire<F>(&self, predicate: F, replacement: AuthError) -> usize
    where
        F: Fn(&T) -> bool,
    {
        let mut entries = self.lock();
        let mut retired = 0;
        for entry in entries.values_mut() {
            if let Some(Ok(value)) = &entry.result {
                if predicate(value) {
                    entry.status = GuardStatus::Failed;
                    entry.result = Some(Err(replacement.clone()));
                    retired += 1;
                }
            }
        }
        retired
    }

    pub fn status(&self, code: &str) -> Option<GuardStatus> {
        self.lock().get(code).map(|entry| entry.status)
    }

    /// Drop entries older than the retention window.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        evict(&mut entries, now, self.retention);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, GuardEntry<T>>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn evict<T>(entries: &mut HashMap<String, GuardEntry<T>>, now: DateTime<Utc>, retention: Duration) {
    entries.retain(|_, entry| now - entry.created_at < retention);
}
