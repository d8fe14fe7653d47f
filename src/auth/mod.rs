//! Authorization-code exchange, exchange guard and token storage.

pub mod attempt;
pub mod exchanger;
pub mod guard;
pub mod machine;
pub mod state;
pub mod store;
pub mod token;

pub use attempt::{AuthorizationAttempt, AuthorizationRequest};
pub use exchanger::{HttpTokenExchanger, TokenExchanger};
pub use guard::{Admission, ExchangeGuard, GuardStatus};
pub use machine::{
    AccessToken, AuthPhase, AuthStateMachine, AuthenticatedSession, ConnectionStatus, Outcome,
};
pub use state::StateRegistry;
pub use store::{FileTokenStore, TokenStore, TokenStoreConfig};
pub use token::TokenRecord;
