//! Chat transport boundary
//!
//! Transport-neutral inbound events and outbound renders. The dialogue
//! router only speaks these types; `bot::telegram` maps them onto teloxide,
//! and [`RecordingMessenger`] keeps them in memory for tests and dry runs.

use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::model::IdentityId;

/// Who sent an inbound event, as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: IdentityId,
    pub display_name: Option<String>,
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// `/name args`
    Command { name: String, args: String },
    Text(String),
    /// Inline button press on the message `message_id`
    Button { payload: String, message_id: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub sender: Sender,
    pub kind: InboundKind,
}

impl Inbound {
    pub fn text(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            kind: InboundKind::Text(text.into()),
        }
    }

    pub fn command(sender: Sender, name: impl Into<String>) -> Self {
        Self {
            sender,
            kind: InboundKind::Command {
                name: name.into(),
                args: String::new(),
            },
        }
    }

    /// Sets command arguments; no effect on other kinds
    pub fn with_args(mut self, value: impl Into<String>) -> Self {
        if let InboundKind::Command { args, .. } = &mut self.kind {
            *args = value.into();
        }
        self
    }

    pub fn button(sender: Sender, payload: impl Into<String>, message_id: i32) -> Self {
        Self {
            sender,
            kind: InboundKind::Button {
                payload: payload.into(),
                message_id,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub payload: String,
}

impl Button {
    pub fn new(text: impl Into<String>, payload: impl ToString) -> Self {
        Self {
            text: text.into(),
            payload: payload.to_string(),
        }
    }
}

/// Buttons attached to one message, row by row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<Button>>,
}

impl InlineKeyboard {
    pub fn new(rows: Vec<Vec<Button>>) -> Self {
        Self { rows }
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }

    /// First button whose payload equals `payload`
    pub fn find(&self, payload: &str) -> Option<&Button> {
        self.buttons().find(|b| b.payload == payload)
    }
}

/// Persistent reply keyboard of menu labels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuKeyboard {
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Controls {
    #[default]
    None,
    Inline(InlineKeyboard),
    Menu(MenuKeyboard),
}

impl Controls {
    /// Whether the message carries buttons that must go stale later
    pub fn is_interactive(&self) -> bool {
        matches!(self, Controls::Inline(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub controls: Controls,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            controls: Controls::None,
        }
    }

    pub fn inline(text: impl Into<String>, keyboard: InlineKeyboard) -> Self {
        Self {
            text: text.into(),
            controls: Controls::Inline(keyboard),
        }
    }

    pub fn menu(text: impl Into<String>, menu: MenuKeyboard) -> Self {
        Self {
            text: text.into(),
            controls: Controls::Menu(menu),
        }
    }
}

/// One outbound operation on the actor's own chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Render {
    Send(Reply),
    /// Photo with the reply as caption
    Photo { url: String, reply: Reply },
    /// Replace text (and optionally buttons) of an existing message
    Edit {
        message_id: i32,
        text: String,
        keyboard: Option<InlineKeyboard>,
    },
    /// Replace or strip the buttons of an existing message
    EditControls {
        message_id: i32,
        keyboard: Option<InlineKeyboard>,
    },
    Delete { message_id: i32 },
}

/// A message for an identity other than the actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub to: IdentityId,
    pub reply: Reply,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Sends a message and returns its id
    async fn send(&self, to: IdentityId, reply: &Reply) -> Result<i32, TransportError>;

    async fn send_photo(
        &self,
        to: IdentityId,
        url: &str,
        reply: &Reply,
    ) -> Result<i32, TransportError>;

    async fn edit(
        &self,
        to: IdentityId,
        message_id: i32,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), TransportError>;

    async fn edit_controls(
        &self,
        to: IdentityId,
        message_id: i32,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), TransportError>;

    async fn delete(&self, to: IdentityId, message_id: i32) -> Result<(), TransportError>;
}

/// What a [`RecordingMessenger`] was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Sent {
        to: IdentityId,
        message_id: i32,
        reply: Reply,
    },
    Photo {
        to: IdentityId,
        message_id: i32,
        url: String,
        reply: Reply,
    },
    Edited {
        to: IdentityId,
        message_id: i32,
        text: String,
        keyboard: Option<InlineKeyboard>,
    },
    ControlsEdited {
        to: IdentityId,
        message_id: i32,
        keyboard: Option<InlineKeyboard>,
    },
    Deleted {
        to: IdentityId,
        message_id: i32,
    },
}

impl Outbound {
    pub fn recipient(&self) -> IdentityId {
        match self {
            Outbound::Sent { to, .. }
            | Outbound::Photo { to, .. }
            | Outbound::Edited { to, .. }
            | Outbound::ControlsEdited { to, .. }
            | Outbound::Deleted { to, .. } => *to,
        }
    }

    /// Visible text of sends and edits
    pub fn text(&self) -> Option<&str> {
        match self {
            Outbound::Sent { reply, .. } | Outbound::Photo { reply, .. } => Some(&reply.text),
            Outbound::Edited { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Inline buttons carried by this operation, if any
    pub fn keyboard(&self) -> Option<&InlineKeyboard> {
        match self {
            Outbound::Sent { reply, .. } | Outbound::Photo { reply, .. } => match &reply.controls {
                Controls::Inline(keyboard) => Some(keyboard),
                _ => None,
            },
            Outbound::Edited { keyboard, .. } | Outbound::ControlsEdited { keyboard, .. } => {
                keyboard.as_ref()
            }
            Outbound::Deleted { .. } => None,
        }
    }
}

#[derive(Default)]
struct Recording {
    next_message_id: i32,
    log: Vec<Outbound>,
    failing_recipients: Vec<IdentityId>,
}

/// In-memory messenger that records every outbound operation
#[derive(Default)]
pub struct RecordingMessenger {
    inner: Mutex<Recording>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every operation addressed to `to` fail
    pub fn fail_for(&self, to: IdentityId) {
        self.inner().failing_recipients.push(to);
    }

    pub fn log(&self) -> Vec<Outbound> {
        self.inner().log.clone()
    }

    /// Operations addressed to one identity
    pub fn sent_to(&self, to: IdentityId) -> Vec<Outbound> {
        self.inner()
            .log
            .iter()
            .filter(|op| op.recipient() == to)
            .cloned()
            .collect()
    }

    /// Text of the last send or edit addressed to `to`
    pub fn last_text(&self, to: IdentityId) -> Option<String> {
        self.sent_to(to)
            .iter()
            .rev()
            .find_map(|op| op.text().map(str::to_string))
    }

    pub fn clear(&self) {
        self.inner().log.clear();
    }

    fn record(&self, to: IdentityId, op: impl FnOnce(i32) -> Outbound) -> Result<i32, TransportError> {
        let mut inner = self.inner();
        if inner.failing_recipients.contains(&to) {
            return Err(TransportError::Request(format!("chat {to} unreachable")));
        }
        inner.next_message_id += 1;
        let message_id = inner.next_message_id;
        inner.log.push(op(message_id));
        Ok(message_id)
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, to: IdentityId, reply: &Reply) -> Result<i32, TransportError> {
        self.record(to, |message_id| Outbound::Sent {
            to,
            message_id,
            reply: reply.clone(),
        })
    }

    async fn send_photo(
        &self,
        to: IdentityId,
        url: &str,
        reply: &Reply,
    ) -> Result<i32, TransportError> {
        self.record(to, |message_id| Outbound::Photo {
            to,
            message_id,
            url: url.to_string(),
            reply: reply.clone(),
        })
    }

    async fn edit(
        &self,
        to: IdentityId,
        message_id: i32,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), TransportError> {
        self.record(to, |_| Outbound::Edited {
            to,
            message_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        })
        .map(|_| ())
    }

    async fn edit_controls(
        &self,
        to: IdentityId,
        message_id: i32,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), TransportError> {
        self.record(to, |_| Outbound::ControlsEdited {
            to,
            message_id,
            keyboard: keyboard.cloned(),
        })
        .map(|_| ())
    }

    async fn delete(&self, to: IdentityId, message_id: i32) -> Result<(), TransportError> {
        self.record(to, |_| Outbound::Deleted { to, message_id })
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_messenger_assigns_ids() {
        let messenger = RecordingMessenger::new();
        let first = messenger.send(1, &Reply::text("a")).await.unwrap();
        let second = messenger.send(2, &Reply::text("b")).await.unwrap();
        assert_eq!(second, first + 1);
        assert_eq!(messenger.last_text(1).as_deref(), Some("a"));

        messenger.fail_for(3);
        assert!(messenger.send(3, &Reply::text("c")).await.is_err());
        assert_eq!(messenger.log().len(), 2);
    }

    #[test]
    fn test_only_inline_controls_are_interactive() {
        assert!(!Controls::None.is_interactive());
        assert!(!Controls::Menu(MenuKeyboard::default()).is_interactive());
        assert!(Controls::Inline(InlineKeyboard::default()).is_interactive());
    }
}
