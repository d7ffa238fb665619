//! Shared contracts and value types for the hops operations bot.
//!
//! This crate holds the decoded inbound message model, the closed set of
//! operator actions and their card event keys, the outbound collaborator
//! traits used by the conversation router, and the platform clients that
//! implement them (WeCom for messaging, Unraid for container actions).
pub mod action;
pub mod cards;
pub mod credential;
pub mod interfaces;
pub mod platforms;
pub mod sweep;
pub mod types;
pub mod validate;

pub use action::*;
pub use cards::*;
pub use credential::{CredentialCache, CredentialError, FetchedToken, TokenFetcher};
pub use interfaces::*;
pub use sweep::SweepTask;
pub use types::*;
pub use validate::*;
