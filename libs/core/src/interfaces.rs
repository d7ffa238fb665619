//! Collaborator contracts between the transport, the router and the outside world.
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::{Action, DecodedMessage, InteractiveCard};

/// Consumes decoded callback messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, msg: DecodedMessage) -> Result<()>;
}

/// Delivers replies to a recipient on the messaging platform.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, to: &str, content: &str) -> Result<()>;
    async fn send_card(&self, to: &str, card: &InteractiveCard) -> Result<()>;
}

/// Performs the effectful operation behind a confirmed action.
///
/// Callers bound the call with a deadline; dropping the future cancels it.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, action: Action, target: &str) -> Result<()>;
}

pub type SharedHandler = Arc<dyn MessageHandler>;
pub type SharedSender = Arc<dyn MessageSender>;
pub type SharedDispatcher = Arc<dyn ActionDispatcher>;
