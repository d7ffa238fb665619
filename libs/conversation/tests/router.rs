use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use hops_conversation::{
    CANCELLED, DEFAULT_DISPATCH_TIMEOUT, ENTRY_PROMPT, NOT_AUTHORIZED, Router, RouterDeps,
    SESSION_EXPIRED, UNSUPPORTED_EVENT, UNSUPPORTED_MESSAGE,
};
use hops_core::{
    Action, ActionDispatcher, DecodedMessage, EVENT_KEY_CANCEL, EVENT_KEY_CONFIRM,
    EVENT_KEY_RESTART, EVENT_KEY_STOP, InteractiveCard, MessageHandler, MessageKind,
    MessageSender,
};
use hops_session::{ConversationState, StateStore};

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text(String, String),
    Card(String, InteractiveCard),
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingSender {
    fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_text(&self, to: &str, content: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Text(to.into(), content.into()));
        Ok(())
    }

    async fn send_card(&self, to: &str, card: &InteractiveCard) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Card(to.into(), card.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingDispatcher {
    calls: Mutex<Vec<(Action, String)>>,
    fail: bool,
}

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, action: Action, target: &str) -> Result<()> {
        self.calls.lock().unwrap().push((action, target.to_string()));
        if self.fail {
            bail!("未找到容器：{target}");
        }
        Ok(())
    }
}

struct Harness {
    router: Router,
    sender: Arc<RecordingSender>,
    dispatcher: Arc<RecordingDispatcher>,
    state: Arc<StateStore>,
}

fn harness_with(dispatcher: RecordingDispatcher) -> Harness {
    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Arc::new(dispatcher);
    let state = Arc::new(StateStore::new(Duration::from_secs(1800)));
    let router = Router::new(RouterDeps {
        sender: sender.clone(),
        dispatcher: dispatcher.clone(),
        state: state.clone(),
        allowed_users: HashSet::from(["alice".to_string()]),
        dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
    });
    Harness {
        router,
        sender,
        dispatcher,
        state,
    }
}

fn harness() -> Harness {
    harness_with(RecordingDispatcher::default())
}

fn text(from: &str, content: &str) -> DecodedMessage {
    DecodedMessage {
        receiver: "corp".into(),
        sender: from.into(),
        kind: MessageKind::Text,
        content: content.into(),
        event: String::new(),
        event_key: String::new(),
        task_id: None,
        msg_id: None,
        card_type: None,
    }
}

fn event(from: &str, name: &str, key: &str) -> DecodedMessage {
    DecodedMessage {
        kind: MessageKind::Event,
        content: String::new(),
        event: name.into(),
        event_key: key.into(),
        ..text(from, "")
    }
}

fn card_event(from: &str, key: &str) -> DecodedMessage {
    event(from, "template_card_event", key)
}

fn reply_text(to: &str, content: impl Into<String>) -> Sent {
    Sent::Text(to.into(), content.into())
}

#[tokio::test]
async fn entry_keyword_shows_menu_and_resets_state() {
    let h = harness();
    h.state
        .set("alice", ConversationState::awaiting_parameter(Action::Stop));

    h.router.handle_message(text("alice", " Help ")).await.unwrap();

    assert_eq!(
        h.sender.take(),
        vec![Sent::Card("alice".into(), InteractiveCard::action_menu())]
    );
    assert_eq!(h.state.get("alice"), None);
}

#[tokio::test]
async fn enter_agent_event_shows_menu() {
    let h = harness();
    h.router
        .handle_message(event("alice", "enter_agent", ""))
        .await
        .unwrap();
    assert_eq!(
        h.sender.take(),
        vec![Sent::Card("alice".into(), InteractiveCard::action_menu())]
    );
}

#[tokio::test]
async fn full_restart_flow_dispatches_once() {
    let h = harness();

    h.router
        .handle_message(card_event("alice", EVENT_KEY_RESTART))
        .await
        .unwrap();
    assert_eq!(
        h.state.get("alice"),
        Some(ConversationState::awaiting_parameter(Action::Restart))
    );
    assert_eq!(
        h.sender.take(),
        vec![reply_text("alice", "已选择动作：重启\n请输入容器名：")]
    );

    h.router.handle_message(text("alice", "app_1")).await.unwrap();
    assert_eq!(
        h.state.get("alice"),
        Some(ConversationState::awaiting_confirmation(
            Action::Restart,
            "app_1"
        ))
    );
    assert_eq!(
        h.sender.take(),
        vec![Sent::Card(
            "alice".into(),
            InteractiveCard::confirm(Action::Restart, "app_1")
        )]
    );

    h.router
        .handle_message(card_event("alice", EVENT_KEY_CONFIRM))
        .await
        .unwrap();
    assert_eq!(
        *h.dispatcher.calls.lock().unwrap(),
        vec![(Action::Restart, "app_1".to_string())]
    );
    assert_eq!(h.state.get("alice"), None);
    match h.sender.take().as_slice() {
        [Sent::Text(to, content)] => {
            assert_eq!(to, "alice");
            assert!(content.starts_with("执行成功（"), "{content}");
            assert!(content.ends_with("ms）：重启 app_1"), "{content}");
        }
        other => panic!("unexpected replies: {other:?}"),
    }

    h.router
        .handle_message(card_event("alice", EVENT_KEY_CONFIRM))
        .await
        .unwrap();
    assert_eq!(h.dispatcher.calls.lock().unwrap().len(), 1);
    assert_eq!(h.sender.take(), vec![reply_text("alice", SESSION_EXPIRED)]);
}

#[tokio::test]
async fn unauthorized_sender_gets_fixed_reply_without_transition() {
    let h = harness();
    for msg in [
        text("mallory", "help"),
        card_event("mallory", EVENT_KEY_STOP),
        card_event("mallory", EVENT_KEY_CONFIRM),
    ] {
        h.router.handle_message(msg).await.unwrap();
    }
    assert_eq!(h.sender.take(), vec![reply_text("mallory", NOT_AUTHORIZED); 3]);
    assert!(h.state.is_empty());
    assert!(h.dispatcher.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn confirm_without_pending_state_never_dispatches() {
    let h = harness();
    h.router
        .handle_message(card_event("alice", EVENT_KEY_CONFIRM))
        .await
        .unwrap();

    h.state
        .set("alice", ConversationState::awaiting_parameter(Action::Stop));
    h.router
        .handle_message(card_event("alice", EVENT_KEY_CONFIRM))
        .await
        .unwrap();

    assert!(h.dispatcher.calls.lock().unwrap().is_empty());
    assert_eq!(
        h.sender.take(),
        vec![
            reply_text("alice", SESSION_EXPIRED),
            reply_text("alice", SESSION_EXPIRED)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn expired_confirmation_is_rejected() {
    let h = harness();
    h.state.set(
        "alice",
        ConversationState::awaiting_confirmation(Action::Stop, "db"),
    );
    tokio::time::advance(Duration::from_secs(1801)).await;

    h.router
        .handle_message(card_event("alice", EVENT_KEY_CONFIRM))
        .await
        .unwrap();
    assert!(h.dispatcher.calls.lock().unwrap().is_empty());
    assert_eq!(h.sender.take(), vec![reply_text("alice", SESSION_EXPIRED)]);
}

#[tokio::test]
async fn invalid_names_keep_awaiting_parameter() {
    let h = harness();
    h.router
        .handle_message(card_event("alice", EVENT_KEY_STOP))
        .await
        .unwrap();
    h.sender.take();

    let too_long = "a".repeat(129);
    for bad in ["../etc/passwd", "a/b", too_long.as_str(), "  "] {
        h.router.handle_message(text("alice", bad)).await.unwrap();
        assert_eq!(
            h.state.get("alice"),
            Some(ConversationState::awaiting_parameter(Action::Stop)),
            "{bad:?}"
        );
        match h.sender.take().as_slice() {
            [Sent::Text(_, content)] => assert!(content.starts_with("容器名不合法："), "{content}"),
            other => panic!("unexpected replies: {other:?}"),
        }
    }
}

#[tokio::test]
async fn free_text_while_idle_prompts_for_entry_keyword() {
    let h = harness();
    h.router.handle_message(text("alice", "app_1")).await.unwrap();
    assert_eq!(h.sender.take(), vec![reply_text("alice", ENTRY_PROMPT)]);
    assert!(h.state.is_empty());
}

#[tokio::test]
async fn cancel_clears_state_unconditionally() {
    let h = harness();
    h.state.set(
        "alice",
        ConversationState::awaiting_confirmation(Action::ForceUpdate, "app"),
    );
    h.router
        .handle_message(card_event("alice", EVENT_KEY_CANCEL))
        .await
        .unwrap();
    h.router
        .handle_message(card_event("alice", EVENT_KEY_CANCEL))
        .await
        .unwrap();
    assert_eq!(h.state.get("alice"), None);
    assert_eq!(h.sender.take(), vec![reply_text("alice", CANCELLED); 2]);
    assert!(h.dispatcher.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn dispatcher_failure_is_reported_to_the_user() {
    let h = harness_with(RecordingDispatcher {
        fail: true,
        ..Default::default()
    });
    h.state.set(
        "alice",
        ConversationState::awaiting_confirmation(Action::Stop, "ghost"),
    );

    h.router
        .handle_message(card_event("alice", EVENT_KEY_CONFIRM))
        .await
        .unwrap();

    assert_eq!(h.state.get("alice"), None);
    match h.sender.take().as_slice() {
        [Sent::Text(_, content)] => {
            assert!(content.starts_with("执行失败（"), "{content}");
            assert!(content.ends_with("ms）：未找到容器：ghost"), "{content}");
        }
        other => panic!("unexpected replies: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_events_and_kinds_are_unsupported() {
    let h = harness();
    h.state
        .set("alice", ConversationState::awaiting_parameter(Action::Stop));

    h.router
        .handle_message(card_event("alice", "unraid.action.delete"))
        .await
        .unwrap();
    h.router
        .handle_message(event("alice", "subscribe", ""))
        .await
        .unwrap();
    h.router
        .handle_message(DecodedMessage {
            kind: MessageKind::Other("image".into()),
            ..text("alice", "")
        })
        .await
        .unwrap();

    assert_eq!(
        h.sender.take(),
        vec![
            reply_text("alice", UNSUPPORTED_EVENT),
            reply_text("alice", UNSUPPORTED_EVENT),
            reply_text("alice", UNSUPPORTED_MESSAGE),
        ]
    );
    assert_eq!(
        h.state.get("alice"),
        Some(ConversationState::awaiting_parameter(Action::Stop))
    );
}

#[tokio::test]
async fn empty_sender_is_ignored() {
    let h = harness();
    h.router.handle_message(text("  ", "help")).await.unwrap();
    assert!(h.sender.take().is_empty());
}

/// Restart that stops the container, then stalls before starting it again.
struct StallingRestart {
    trace: Mutex<Vec<&'static str>>,
    stall: Duration,
}

#[async_trait]
impl ActionDispatcher for StallingRestart {
    async fn dispatch(&self, _action: Action, _target: &str) -> Result<()> {
        self.trace.lock().unwrap().push("stopped");
        tokio::time::sleep(self.stall).await;
        self.trace.lock().unwrap().push("started");
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn slow_dispatch_is_cut_off_and_reported() {
    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Arc::new(StallingRestart {
        trace: Mutex::new(Vec::new()),
        stall: Duration::from_secs(120),
    });
    let state = Arc::new(StateStore::new(Duration::from_secs(1800)));
    let router = Router::new(RouterDeps {
        sender: sender.clone(),
        dispatcher: dispatcher.clone(),
        state: state.clone(),
        allowed_users: HashSet::from(["alice".to_string()]),
        dispatch_timeout: Duration::from_secs(5),
    });
    state.set(
        "alice",
        ConversationState::awaiting_confirmation(Action::Restart, "app"),
    );

    router
        .handle_message(card_event("alice", EVENT_KEY_CONFIRM))
        .await
        .unwrap();

    assert_eq!(*dispatcher.trace.lock().unwrap(), vec!["stopped"]);
    let sent = sender.take();
    assert_eq!(sent.len(), 1);
    let Sent::Text(to, reply) = &sent[0] else {
        panic!("expected a text reply, got {sent:?}");
    };
    assert_eq!(to, "alice");
    assert!(reply.starts_with("执行失败（"), "{reply}");
    assert!(reply.ends_with("ms）：timeout"), "{reply}");
    assert!(state.get("alice").is_none());
}
