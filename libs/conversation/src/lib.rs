//! Multi-step operator conversation: pick an action, name a container,
//! confirm, then dispatch.
//!
//! ```text
//! Idle --select--> AwaitingParameter --valid name--> AwaitingConfirmation --confirm--> Idle
//!   ^                  |   ^ invalid name                  |
//!   +---- cancel / expiry / entry keyword -----------------+
//! ```
//!
//! Transitions read the state store, decide, then write it back in separate
//! operations. Two messages from the same user arriving together can
//! interleave and the last write wins.
mod replies;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use hops_core::{
    Action, CardEvent, DecodedMessage, EVENT_ENTER_AGENT, EVENT_TEMPLATE_CARD, InteractiveCard,
    MessageHandler, MessageKind, SharedDispatcher, SharedSender, validate_container_name,
};
use hops_session::{ConversationState, StateStore, Step};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use replies::*;

/// Words that open the action menu, matched case-insensitively after trimming.
const ENTRY_KEYWORDS: &[&str] = &["help", "menu", "docker", "unraid", "菜单", "容器"];

/// Upper bound on one confirmed action, including every backend call it makes.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(60);

pub fn is_entry_keyword(content: &str) -> bool {
    let content = content.trim().to_lowercase();
    ENTRY_KEYWORDS.contains(&content.as_str())
}

pub struct RouterDeps {
    pub sender: SharedSender,
    pub dispatcher: SharedDispatcher,
    pub state: Arc<StateStore>,
    pub allowed_users: HashSet<String>,
    /// Deadline for the dispatcher call; the caller's own deadline must be
    /// longer so the outcome reply still goes out.
    pub dispatch_timeout: Duration,
}

pub struct Router {
    sender: SharedSender,
    dispatcher: SharedDispatcher,
    state: Arc<StateStore>,
    allowed_users: HashSet<String>,
    dispatch_timeout: Duration,
}

impl Router {
    pub fn new(deps: RouterDeps) -> Self {
        Self {
            sender: deps.sender,
            dispatcher: deps.dispatcher,
            state: deps.state,
            allowed_users: deps
                .allowed_users
                .into_iter()
                .map(|user| user.trim().to_string())
                .filter(|user| !user.is_empty())
                .collect(),
            dispatch_timeout: deps.dispatch_timeout,
        }
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    fn is_allowed(&self, user: &str) -> bool {
        self.allowed_users.contains(user)
    }

    async fn handle_text(&self, user: &str, content: &str) -> Result<()> {
        let content = content.trim();
        if is_entry_keyword(content) {
            return self.open_menu(user).await;
        }

        let action = match self.state.get(user) {
            Some(ConversationState {
                action,
                step: Step::AwaitingParameter,
            }) => action,
            _ => return self.sender.send_text(user, ENTRY_PROMPT).await,
        };

        let target = match validate_container_name(content) {
            Ok(target) => target,
            Err(err) => {
                debug!(user, error = %err, "rejected container name");
                return self.sender.send_text(user, &invalid_parameter(&err)).await;
            }
        };

        self.state.set(
            user,
            ConversationState::awaiting_confirmation(action, target.clone()),
        );
        self.sender
            .send_card(user, &InteractiveCard::confirm(action, &target))
            .await
    }

    async fn handle_event(&self, user: &str, msg: &DecodedMessage) -> Result<()> {
        if msg.event == EVENT_ENTER_AGENT {
            return self.open_menu(user).await;
        }
        if msg.event != EVENT_TEMPLATE_CARD {
            debug!(user, event = %msg.event, "unsupported event");
            return self.sender.send_text(user, UNSUPPORTED_EVENT).await;
        }

        match CardEvent::from_key(&msg.event_key) {
            Some(CardEvent::Select(action)) => {
                self.state
                    .set(user, ConversationState::awaiting_parameter(action));
                self.sender.send_text(user, &action_selected(action)).await
            }
            Some(CardEvent::Confirm) => self.confirm(user).await,
            Some(CardEvent::Cancel) => {
                self.state.clear(user);
                self.sender.send_text(user, CANCELLED).await
            }
            None => {
                warn!(user, event_key = %msg.event_key, "unknown card event key");
                self.sender.send_text(user, UNSUPPORTED_EVENT).await
            }
        }
    }

    async fn open_menu(&self, user: &str) -> Result<()> {
        self.state.clear(user);
        self.sender
            .send_card(user, &InteractiveCard::action_menu())
            .await
    }

    async fn confirm(&self, user: &str) -> Result<()> {
        let pending = self.state.get(user).and_then(|state| {
            state
                .pending_target()
                .map(|target| (state.action, target.to_string()))
        });
        let Some((action, target)) = pending else {
            return self.sender.send_text(user, SESSION_EXPIRED).await;
        };
        self.state.clear(user);

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.dispatch_timeout,
            self.dispatcher.dispatch(action, &target),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let reply = match outcome {
            Ok(Ok(())) => {
                info!(user, %action, target = %target, elapsed_ms, "action succeeded");
                record_action(action, "ok");
                action_succeeded(elapsed_ms, action, &target)
            }
            Ok(Err(err)) => {
                warn!(
                    user,
                    %action,
                    target = %target,
                    elapsed_ms,
                    error = %format!("{err:#}"),
                    "action failed"
                );
                record_action(action, "error");
                action_failed(elapsed_ms, &err)
            }
            Err(_) => {
                warn!(user, %action, target = %target, elapsed_ms, "action timed out");
                record_action(action, "timeout");
                action_failed(elapsed_ms, "timeout")
            }
        };
        self.sender.send_text(user, &reply).await
    }
}

fn record_action(action: Action, outcome: &'static str) {
    metrics::counter!(
        "conversation_action_total",
        "action" => action.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

#[async_trait]
impl MessageHandler for Router {
    async fn handle_message(&self, msg: DecodedMessage) -> Result<()> {
        let user = msg.sender.trim();
        if user.is_empty() {
            debug!("message without sender ignored");
            return Ok(());
        }
        if !self.is_allowed(user) {
            warn!(user, "sender not in allow-list");
            return self.sender.send_text(user, NOT_AUTHORIZED).await;
        }

        match &msg.kind {
            MessageKind::Text => self.handle_text(user, &msg.content).await,
            MessageKind::Event => self.handle_event(user, &msg).await,
            MessageKind::Other(kind) => {
                debug!(user, kind = %kind, "unsupported message kind");
                self.sender.send_text(user, UNSUPPORTED_MESSAGE).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_keywords_ignore_case_and_padding() {
        for word in ["help", " HELP ", "Docker", "unraid", "菜单", "容器", "menu"] {
            assert!(is_entry_keyword(word), "{word}");
        }
        assert!(!is_entry_keyword("app_1"));
        assert!(!is_entry_keyword(""));
    }
}
