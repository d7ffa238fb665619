//! Button-bearing interactive cards.
//!
//! Every button carries an opaque event key that comes back as the
//! `EventKey` of a later `template_card_event` callback.
use serde::Serialize;

use crate::action::{Action, EVENT_KEY_CANCEL, EVENT_KEY_CONFIRM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum ButtonStyle {
    Primary,
    Secondary,
}

impl From<ButtonStyle> for u8 {
    fn from(style: ButtonStyle) -> Self {
        match style {
            ButtonStyle::Primary => 1,
            ButtonStyle::Secondary => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardButton {
    pub label: String,
    pub key: String,
    pub style: ButtonStyle,
}

impl CardButton {
    pub fn new(label: impl Into<String>, key: impl Into<String>, style: ButtonStyle) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            style,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractiveCard {
    pub title: String,
    pub description: String,
    pub buttons: Vec<CardButton>,
    /// Correlation id echoed back as `TaskId`; senders assign one when absent.
    pub task_id: Option<String>,
}

impl InteractiveCard {
    /// Action-selection menu with one button per supported action.
    pub fn action_menu() -> Self {
        let buttons = Action::ALL
            .iter()
            .map(|action| {
                let style = if *action == Action::Restart {
                    ButtonStyle::Primary
                } else {
                    ButtonStyle::Secondary
                };
                CardButton::new(
                    format!("{}容器", action.display_name()),
                    action.event_key(),
                    style,
                )
            })
            .collect();
        Self {
            title: "Unraid 容器操作".into(),
            description: "请选择动作".into(),
            buttons,
            task_id: None,
        }
    }

    /// Confirm/cancel prompt naming the pending action and its target.
    pub fn confirm(action: Action, target: &str) -> Self {
        Self {
            title: "确认执行".into(),
            description: format!("{}：{}", action.display_name(), target),
            buttons: vec![
                CardButton::new("确认", EVENT_KEY_CONFIRM, ButtonStyle::Secondary),
                CardButton::new("取消", EVENT_KEY_CANCEL, ButtonStyle::Primary),
            ],
            task_id: None,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.buttons.iter().map(|button| button.key.as_str())
    }
}
