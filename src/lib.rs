//! Ledger OAuth: authorization-code exchange and token lifecycle engine.
//!
//! Turns a one-time authorization code from an accounting service into a
//! durable access/refresh token pair exactly once, persists it, refreshes it
//! before expiry, and answers duplicate callback deliveries from cache.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ledger_oauth::prelude::*;
//!
//! # async fn example() -> ledger_oauth::error::Result<()> {
//! let machine = AuthStateMachine::from_config(
//!     OAuthConfig::from_env()?,
//!     Arc::new(FileTokenStore::new_default()),
//! )?;
//! let token = machine.ensure_fresh_token("9341454425005330").await?;
//! println!("{}", token.bearer());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod prelude;
pub mod util;

pub use error::AuthError;
