pub mod telegram;

use async_trait::async_trait;

/// Platform-specific chat identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A text message received from the platform
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    /// Display name of the sender
    pub user_name: String,
    pub text: String,
}

/// A button press on one of the bot's inline keyboards
#[derive(Debug, Clone)]
pub struct IncomingCallback {
    pub chat_id: ChatId,
    /// The message carrying the keyboard, when the platform still exposes it
    pub message: Option<MessageRef>,
    pub data: String,
}

/// A message previously sent by the bot, addressable for edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Inline keyboard, one `Vec<Button>` per row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

/// Result of one outbound call to the messaging platform.
///
/// Callers inspect this explicitly; a failed delivery is never an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The recipient blocked the bot or the chat no longer exists.
    Unreachable(String),
    /// Rate limited, network failure or any other error worth trying next cycle.
    Transient(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Outbound side of the messaging platform
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, chat_id: ChatId, text: &str, link_preview: bool)
        -> DeliveryOutcome;

    async fn send_menu(&self, chat_id: ChatId, text: &str, keyboard: &Keyboard)
        -> DeliveryOutcome;

    /// Replace the keyboard of an existing message. Editing to an identical
    /// keyboard reports `Delivered`.
    async fn edit_keyboard(&self, message: MessageRef, keyboard: &Keyboard) -> DeliveryOutcome;
}
