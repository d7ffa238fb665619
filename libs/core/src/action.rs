use std::fmt;

use serde::{Deserialize, Serialize};

pub const EVENT_KEY_RESTART: &str = "unraid.action.restart";
pub const EVENT_KEY_STOP: &str = "unraid.action.stop";
pub const EVENT_KEY_FORCE_UPDATE: &str = "unraid.action.force_update";
pub const EVENT_KEY_CONFIRM: &str = "core.action.confirm";
pub const EVENT_KEY_CANCEL: &str = "core.action.cancel";

/// Container operation an operator can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Restart,
    Stop,
    ForceUpdate,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Restart, Action::Stop, Action::ForceUpdate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Restart => "restart",
            Action::Stop => "stop",
            Action::ForceUpdate => "force_update",
        }
    }

    /// Label shown to operators in prompts and cards.
    pub fn display_name(&self) -> &'static str {
        match self {
            Action::Restart => "重启",
            Action::Stop => "停止",
            Action::ForceUpdate => "强制更新",
        }
    }

    pub fn event_key(&self) -> &'static str {
        match self {
            Action::Restart => EVENT_KEY_RESTART,
            Action::Stop => EVENT_KEY_STOP,
            Action::ForceUpdate => EVENT_KEY_FORCE_UPDATE,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meaning of a card button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardEvent {
    Select(Action),
    Confirm,
    Cancel,
}

static CARD_EVENTS: &[(&str, CardEvent)] = &[
    (EVENT_KEY_RESTART, CardEvent::Select(Action::Restart)),
    (EVENT_KEY_STOP, CardEvent::Select(Action::Stop)),
    (EVENT_KEY_FORCE_UPDATE, CardEvent::Select(Action::ForceUpdate)),
    (EVENT_KEY_CONFIRM, CardEvent::Confirm),
    (EVENT_KEY_CANCEL, CardEvent::Cancel),
];

impl CardEvent {
    /// Looks up an event key; unknown keys yield `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        CARD_EVENTS
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, event)| *event)
    }

    pub fn key(&self) -> &'static str {
        match self {
            CardEvent::Select(action) => action.event_key(),
            CardEvent::Confirm => EVENT_KEY_CONFIRM,
            CardEvent::Cancel => EVENT_KEY_CANCEL,
        }
    }
}
