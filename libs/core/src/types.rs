use serde::Deserialize;
use thiserror::Error;

/// Event name sent when a user opens the application.
pub const EVENT_ENTER_AGENT: &str = "enter_agent";
/// Event name sent when a user presses a button on an interactive card.
pub const EVENT_TEMPLATE_CARD: &str = "template_card_event";

/// Inner message kind, taken from `MsgType`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Event,
    Other(String),
}

impl MessageKind {
    fn from_wire(value: &str) -> Self {
        match value.trim() {
            "text" => Self::Text,
            "event" => Self::Event,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Event => "event",
            Self::Other(other) => other,
        }
    }
}

/// One decrypted callback message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub receiver: String,
    pub sender: String,
    pub kind: MessageKind,
    pub content: String,
    pub event: String,
    pub event_key: String,
    pub task_id: Option<String>,
    pub msg_id: Option<String>,
    pub card_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum MessageParseError {
    #[error("message payload is not valid utf-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("message payload is not valid xml: {0}")]
    Xml(#[from] quick_xml::DeError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireMessage {
    #[serde(rename = "ToUserName")]
    to_user_name: String,
    #[serde(rename = "FromUserName")]
    from_user_name: String,
    #[serde(rename = "MsgType")]
    msg_type: String,
    #[serde(rename = "Content")]
    content: String,
    #[serde(rename = "Event")]
    event: String,
    #[serde(rename = "EventKey")]
    event_key: String,
    #[serde(rename = "TaskId")]
    task_id: String,
    #[serde(rename = "MsgId")]
    msg_id: String,
    #[serde(rename = "CardType")]
    card_type: String,
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl DecodedMessage {
    /// Parses the decrypted `<xml>` payload of a callback.
    pub fn from_xml(payload: &[u8]) -> Result<Self, MessageParseError> {
        let text = std::str::from_utf8(payload)?;
        let wire: WireMessage = quick_xml::de::from_str(text)?;
        Ok(Self {
            receiver: wire.to_user_name.trim().to_string(),
            sender: wire.from_user_name.trim().to_string(),
            kind: MessageKind::from_wire(&wire.msg_type),
            content: wire.content,
            event: wire.event.trim().to_string(),
            event_key: wire.event_key.trim().to_string(),
            task_id: non_empty(wire.task_id),
            msg_id: non_empty(wire.msg_id),
            card_type: non_empty(wire.card_type),
        })
    }

    pub fn is_text(&self) -> bool {
        self.kind == MessageKind::Text
    }

    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_message() {
        let xml = "<xml><ToUserName><![CDATA[corp]]></ToUserName>\
            <FromUserName><![CDATA[alice]]></FromUserName>\
            <CreateTime>1700000000</CreateTime>\
            <MsgType><![CDATA[text]]></MsgType>\
            <Content><![CDATA[help]]></Content>\
            <MsgId>1234567890</MsgId><AgentID>1000002</AgentID></xml>";
        let msg = DecodedMessage::from_xml(xml.as_bytes()).unwrap();
        assert_eq!(msg.receiver, "corp");
        assert_eq!(msg.sender, "alice");
        assert!(msg.is_text());
        assert_eq!(msg.content, "help");
        assert_eq!(msg.msg_id.as_deref(), Some("1234567890"));
        assert_eq!(msg.task_id, None);
    }

    #[test]
    fn parses_card_event() {
        let xml = "<xml><ToUserName>corp</ToUserName><FromUserName>bob</FromUserName>\
            <MsgType>event</MsgType><Event>template_card_event</Event>\
            <EventKey>core.action.confirm</EventKey><TaskId>hops-1</TaskId>\
            <CardType>button_interaction</CardType></xml>";
        let msg = DecodedMessage::from_xml(xml.as_bytes()).unwrap();
        assert!(msg.is_event());
        assert_eq!(msg.event, EVENT_TEMPLATE_CARD);
        assert_eq!(msg.event_key, "core.action.confirm");
        assert_eq!(msg.task_id.as_deref(), Some("hops-1"));
        assert_eq!(msg.card_type.as_deref(), Some("button_interaction"));
    }

    #[test]
    fn unknown_kind_is_kept() {
        let xml = "<xml><FromUserName>bob</FromUserName><MsgType>image</MsgType></xml>";
        let msg = DecodedMessage::from_xml(xml.as_bytes()).unwrap();
        assert_eq!(msg.kind, MessageKind::Other("image".into()));
        assert_eq!(msg.kind.as_str(), "image");
    }

    #[test]
    fn rejects_malformed_xml() {
        assert!(DecodedMessage::from_xml(b"<xml><MsgType>text</xml>").is_err());
        assert!(DecodedMessage::from_xml(&[0xff, 0xfe, 0x00]).is_err());
    }
}
