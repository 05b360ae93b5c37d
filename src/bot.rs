use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::catalog::Catalog;
use crate::menu::{Menu, MenuAction, MenuState, MENU_TEXT};
use crate::notifier::escape_html;
use crate::platform::{ChatId, DeliveryOutcome, IncomingCallback, IncomingMessage, Messenger};
use crate::store::SubscriptionStore;

const HELP_TEXT: &str = "Commands:\n\
     /start - Register with the bot\n\
     /subscribe - Choose apps to follow\n\
     /list - Show the apps you follow\n\
     /unsubscribe - Stop all notifications\n\
     /help - Show this message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Subscribe,
    Unsubscribe,
    List,
    Help,
}

impl Command {
    /// Parse `/name` or `/name@botname`, ignoring arguments
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?.split('@').next()?;
        match name.to_lowercase().as_str() {
            "start" => Some(Command::Start),
            "subscribe" | "menu" => Some(Command::Subscribe),
            "unsubscribe" | "stop" => Some(Command::Unsubscribe),
            "list" => Some(Command::List),
            "help" => Some(Command::Help),
            _ => None,
        }
    }
}

/// Inbound command and callback handling, independent of the chat platform
pub struct BotContext {
    pub store: SubscriptionStore,
    pub catalog: Arc<Catalog>,
    pub menu: Menu,
    pub messenger: Arc<dyn Messenger>,
}

impl BotContext {
    pub fn new(
        store: SubscriptionStore,
        catalog: Arc<Catalog>,
        page_size: usize,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            menu: Menu::new(catalog.clone(), page_size),
            store,
            catalog,
            messenger,
        }
    }

    pub async fn handle_message(&self, msg: &IncomingMessage) -> Result<()> {
        let chat_id = msg.chat_id;
        let Some(command) = Command::parse(&msg.text) else {
            self.reply(chat_id, "I only understand commands.\n\n".to_string() + HELP_TEXT)
                .await;
            return Ok(());
        };

        info!(chat = %chat_id, user = %msg.user_name, ?command, "Command received");

        match command {
            Command::Start => match self.store.upsert_subscriber(chat_id).await {
                Ok(_) => {
                    let text = format!(
                        "👋 Hello {}! I notify you when the apps you follow get a new version.\n\n{}",
                        escape_html(&msg.user_name),
                        HELP_TEXT
                    );
                    self.reply(chat_id, text).await;
                }
                Err(e) => {
                    error!(chat = %chat_id, "Failed to register subscriber: {:#}", e);
                    self.reply(chat_id, "❌ Registration failed, please try again later.".to_string())
                        .await;
                }
            },
            Command::Subscribe => {
                let opened = match self.store.upsert_subscriber(chat_id).await {
                    Ok(_) => self.open_menu(chat_id).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = opened {
                    error!(chat = %chat_id, "Failed to open menu: {:#}", e);
                    self.reply(chat_id, "❌ Could not open the menu, please try again later.".to_string())
                        .await;
                }
            }
            Command::Unsubscribe => match self.store.prune(chat_id).await {
                Ok(true) => {
                    self.reply(
                        chat_id,
                        "🔕 You have been unsubscribed from all updates. Send /subscribe to come back."
                            .to_string(),
                    )
                    .await
                }
                Ok(false) => {
                    self.reply(chat_id, "You were not subscribed to anything.".to_string())
                        .await
                }
                Err(e) => {
                    error!(chat = %chat_id, "Failed to unsubscribe: {:#}", e);
                    self.reply(chat_id, "❌ Unsubscribe failed, please try again later.".to_string())
                        .await;
                }
            },
            Command::List => {
                let items = match self.store.subscriptions_of(chat_id).await {
                    Ok(items) => items,
                    Err(e) => {
                        error!(chat = %chat_id, "Failed to load subscriptions: {:#}", e);
                        self.reply(chat_id, "❌ Could not load your apps, please try again later.".to_string())
                            .await;
                        return Ok(());
                    }
                };
                let text = if items.is_empty() {
                    "You are not following any apps yet. Send /subscribe to pick some.".to_string()
                } else {
                    let lines: Vec<String> = self
                        .catalog
                        .items()
                        .iter()
                        .filter(|item| items.contains(&item.name))
                        .map(|item| format!("{} {}", item.emoji(), escape_html(&item.name)))
                        .collect();
                    format!("You are following:\n\n{}", lines.join("\n"))
                };
                self.reply(chat_id, text).await;
            }
            Command::Help => self.reply(chat_id, HELP_TEXT.to_string()).await,
        }

        Ok(())
    }

    /// Apply a menu button press. Returns the text to show in the callback answer.
    pub async fn handle_callback(&self, cb: &IncomingCallback) -> Option<String> {
        let action = MenuAction::parse(&cb.data)?;

        let state = match &action {
            MenuAction::Toggle { page, .. } => MenuState::PageView(*page),
            _ => MenuState::Closed,
        };

        let view = match self.menu.apply(&self.store, cb.chat_id, state, &action).await {
            Ok(view) => view,
            Err(e) => {
                error!(chat = %cb.chat_id, data = %cb.data, "Failed to apply menu action: {:#}", e);
                return Some("❌ Update failed, please try again.".to_string());
            }
        };

        let outcome = match cb.message {
            Some(message) => self.messenger.edit_keyboard(message, &view.keyboard).await,
            None => {
                self.messenger
                    .send_menu(cb.chat_id, MENU_TEXT, &view.keyboard)
                    .await
            }
        };
        if let DeliveryOutcome::Unreachable(reason) | DeliveryOutcome::Transient(reason) = &outcome {
            info!(chat = %cb.chat_id, %reason, "Menu refresh not delivered");
        }

        view.toggled.map(|(item, subscribed)| {
            if subscribed {
                format!("Subscribed to {}", item)
            } else {
                format!("Unsubscribed from {}", item)
            }
        })
    }

    async fn open_menu(&self, chat_id: ChatId) -> Result<()> {
        let view = self
            .menu
            .apply(&self.store, chat_id, MenuState::Closed, &MenuAction::Open)
            .await?;
        let outcome = self
            .messenger
            .send_menu(chat_id, MENU_TEXT, &view.keyboard)
            .await;
        if !outcome.is_delivered() {
            info!(chat = %chat_id, ?outcome, "Menu not delivered");
        }
        Ok(())
    }

    async fn reply(&self, chat_id: ChatId, text: String) {
        let outcome = self.messenger.send_message(chat_id, &text, false).await;
        if !outcome.is_delivered() {
            info!(chat = %chat_id, ?outcome, "Reply not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_items;
    use crate::notifier::tests::RecordingMessenger;
    use crate::platform::MessageRef;

    fn context(messenger: Arc<RecordingMessenger>) -> BotContext {
        BotContext::new(
            SubscriptionStore::open_in_memory().unwrap(),
            Arc::new(Catalog::new(default_items())),
            8,
            messenger,
        )
    }

    fn message(chat: i64, text: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id: ChatId(chat),
            user_name: "Dana".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/subscribe@appwatch_bot"), Some(Command::Subscribe));
        assert_eq!(Command::parse("  /Unsubscribe now"), Some(Command::Unsubscribe));
        assert_eq!(Command::parse("/unknown"), None);
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[tokio::test]
    async fn test_start_registers_subscriber() {
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(messenger.clone());

        ctx.handle_message(&message(10, "/start")).await.unwrap();

        assert!(ctx.store.is_subscribed(ChatId(10)).await.unwrap());
        let sent = messenger.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Hello Dana"));
    }

    #[tokio::test]
    async fn test_subscribe_opens_first_page() {
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(messenger.clone());

        ctx.handle_message(&message(10, "/subscribe")).await.unwrap();

        let menus = messenger.menus.lock().await;
        assert_eq!(menus.len(), 1);
        let (chat, keyboard) = &menus[0];
        assert_eq!(*chat, ChatId(10));
        assert_eq!(keyboard.rows[0][0].callback_data, "toggle:Chrome:0");
        let nav = keyboard.rows.last().unwrap();
        assert_eq!(nav.len(), 1);
        assert_eq!(nav[0].callback_data, "nav:1");
    }

    #[tokio::test]
    async fn test_toggle_callback_edits_keyboard_and_answers() {
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(messenger.clone());
        let message_ref = MessageRef {
            chat_id: ChatId(10),
            message_id: 42,
        };
        let cb = IncomingCallback {
            chat_id: ChatId(10),
            message: Some(message_ref),
            data: "toggle:Telegram:1".to_string(),
        };

        let answer = ctx.handle_callback(&cb).await;
        assert_eq!(answer.as_deref(), Some("Subscribed to Telegram"));
        assert_eq!(
            ctx.store.subscribers_of("Telegram").await.unwrap(),
            vec![ChatId(10)]
        );

        let edits = messenger.edits.lock().await;
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0, message_ref);
        let labels: Vec<&str> = edits[0]
            .1
            .rows
            .iter()
            .flatten()
            .map(|b| b.label.as_str())
            .collect();
        assert!(labels.contains(&"✅ ✈️ Telegram"));
        assert!(labels.contains(&"⬅️ Previous"));
    }

    #[tokio::test]
    async fn test_unknown_callback_is_ignored() {
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(messenger.clone());
        let cb = IncomingCallback {
            chat_id: ChatId(10),
            message: None,
            data: "something:else".to_string(),
        };
        assert_eq!(ctx.handle_callback(&cb).await, None);
        assert!(messenger.edits.lock().await.is_empty());
        assert!(messenger.menus.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_everything() {
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(messenger.clone());
        ctx.store.toggle(ChatId(10), "WhatsApp").await.unwrap();

        ctx.handle_message(&message(10, "/unsubscribe")).await.unwrap();
        assert!(!ctx.store.is_subscribed(ChatId(10)).await.unwrap());
        assert!(ctx.store.subscribers_of("WhatsApp").await.unwrap().is_empty());

        ctx.handle_message(&message(10, "/unsubscribe")).await.unwrap();
        let sent = messenger.sent.lock().await;
        assert!(sent[0].1.contains("unsubscribed from all updates"));
        assert!(sent[1].1.contains("not subscribed"));
    }

    #[tokio::test]
    async fn test_store_failure_gets_explicit_reply() {
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(messenger.clone());
        ctx.store.drop_tables().await.unwrap();

        for text in ["/start", "/subscribe", "/unsubscribe", "/list"] {
            ctx.handle_message(&message(10, text)).await.unwrap();
        }

        let sent = messenger.sent.lock().await;
        let replies: Vec<&str> = sent.iter().map(|(_, text)| text.as_str()).collect();
        assert_eq!(replies.len(), 4);
        assert!(replies[0].starts_with("❌ Registration failed"));
        assert!(replies[1].starts_with("❌ Could not open the menu"));
        assert!(replies[2].starts_with("❌ Unsubscribe failed"));
        assert!(replies[3].starts_with("❌ Could not load your apps"));
        assert!(messenger.menus.lock().await.is_empty());

        let cb = IncomingCallback {
            chat_id: ChatId(10),
            message: Some(MessageRef {
                chat_id: ChatId(10),
                message_id: 7,
            }),
            data: "toggle:Telegram:0".to_string(),
        };
        assert_eq!(
            ctx.handle_callback(&cb).await.as_deref(),
            Some("❌ Update failed, please try again.")
        );
        assert!(messenger.edits.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_shows_followed_apps() {
        let messenger = Arc::new(RecordingMessenger::default());
        let ctx = context(messenger.clone());
        ctx.store.toggle(ChatId(10), "Signal").await.unwrap();

        ctx.handle_message(&message(10, "/list")).await.unwrap();
        let sent = messenger.sent.lock().await;
        assert!(sent[0].1.contains("🔒 Signal"));
        assert!(!sent[0].1.contains("WhatsApp"));
    }
}
