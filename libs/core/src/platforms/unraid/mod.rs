//! Unraid container backend behind the [`ActionDispatcher`] contract.
mod client;
pub mod schema;

use anyhow::Result;
use async_trait::async_trait;

pub use client::{UnraidClient, UnraidClientConfig, UnraidError};

use crate::action::Action;
use crate::interfaces::ActionDispatcher;

pub struct UnraidDispatcher {
    client: UnraidClient,
}

impl UnraidDispatcher {
    pub fn new(client: UnraidClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionDispatcher for UnraidDispatcher {
    async fn dispatch(&self, action: Action, target: &str) -> Result<()> {
        match action {
            Action::Restart => self.client.restart_container(target).await?,
            Action::Stop => self.client.stop_container(target).await?,
            Action::ForceUpdate => self.client.force_update_container(target).await?,
        }
        Ok(())
    }
}
