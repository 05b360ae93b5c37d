use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, LinkPreviewOptions, MessageId, ParseMode,
};
use teloxide::{ApiError, RequestError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bot::BotContext;
use crate::platform::{
    ChatId, DeliveryOutcome, IncomingCallback, IncomingMessage, Keyboard, MessageRef, Messenger,
};

const SHUTDOWN_RETRY: Duration = Duration::from_millis(100);

/// Map a Bot API failure onto the three delivery outcomes
fn classify(err: &RequestError) -> DeliveryOutcome {
    match err {
        RequestError::Api(api) => match api {
            ApiError::MessageNotModified => DeliveryOutcome::Delivered,
            ApiError::BotBlocked
            | ApiError::ChatNotFound
            | ApiError::UserDeactivated
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::CantInitiateConversation => DeliveryOutcome::Unreachable(api.to_string()),
            other => DeliveryOutcome::Transient(other.to_string()),
        },
        RequestError::RetryAfter(secs) => {
            DeliveryOutcome::Transient(format!("rate limited, retry after {:?}", secs))
        }
        other => DeliveryOutcome::Transient(other.to_string()),
    }
}

fn to_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.callback_data.clone()))
            .collect::<Vec<_>>()
    }))
}

fn link_preview(enabled: bool) -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: !enabled,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Telegram implementation of the outbound messaging port
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_message(&self, chat_id: ChatId, text: &str, link_preview_enabled: bool) -> DeliveryOutcome {
        match self
            .bot
            .send_message(teloxide::types::ChatId(chat_id.0), text)
            .parse_mode(ParseMode::Html)
            .link_preview_options(link_preview(link_preview_enabled))
            .await
        {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) => classify(&e),
        }
    }

    async fn send_menu(&self, chat_id: ChatId, text: &str, keyboard: &Keyboard) -> DeliveryOutcome {
        match self
            .bot
            .send_message(teloxide::types::ChatId(chat_id.0), text)
            .reply_markup(to_markup(keyboard))
            .await
        {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) => classify(&e),
        }
    }

    async fn edit_keyboard(&self, message: MessageRef, keyboard: &Keyboard) -> DeliveryOutcome {
        match self
            .bot
            .edit_message_reply_markup(
                teloxide::types::ChatId(message.chat_id.0),
                MessageId(message.message_id),
            )
            .reply_markup(to_markup(keyboard))
            .await
        {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) => classify(&e),
        }
    }
}

/// Run the Telegram long-poll dispatcher until `cancel` fires
pub async fn run(bot: Bot, ctx: Arc<BotContext>, cancel: CancellationToken) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build();

    let shutdown = dispatcher.shutdown_token();
    // dispatch() returns once the shutdown is accepted
    tokio::spawn(shutdown_on_cancel(cancel, move || shutdown.shutdown().map(drop)));

    dispatcher.dispatch().await;
    info!("Telegram platform stopped");
    Ok(())
}

/// Once `cancel` fires, keep asking for shutdown until it is accepted.
/// An idle dispatcher refuses until `dispatch()` has started.
async fn shutdown_on_cancel<E: std::fmt::Debug>(
    cancel: CancellationToken,
    mut request: impl FnMut() -> Result<(), E>,
) {
    cancel.cancelled().await;
    loop {
        match request() {
            Ok(()) => return,
            Err(e) => {
                debug!("Dispatcher refused shutdown ({:?}), retrying", e);
                tokio::time::sleep(SHUTDOWN_RETRY).await;
            }
        }
    }
}

async fn handle_message(msg: Message, ctx: Arc<BotContext>) -> ResponseResult<()> {
    let text = match msg.text() {
        Some(t) => t.to_string(),
        None => return Ok(()),
    };

    let incoming = IncomingMessage {
        chat_id: ChatId(msg.chat.id.0),
        user_name: msg
            .from
            .as_ref()
            .map(|u| u.first_name.clone())
            .unwrap_or_default(),
        text,
    };

    if let Err(e) = ctx.handle_message(&incoming).await {
        error!("Error handling message: {:#}", e);
    }
    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, ctx: Arc<BotContext>) -> ResponseResult<()> {
    let message = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat().id.0),
        message_id: m.id().0,
    });
    let chat_id = message
        .map(|m| m.chat_id)
        .unwrap_or(ChatId(q.from.id.0 as i64));

    let incoming = IncomingCallback {
        chat_id,
        message,
        data: q.data.clone().unwrap_or_default(),
    };
    let answer = ctx.handle_callback(&incoming).await;

    // Always answer so the client stops its loading indicator
    let mut request = bot.answer_callback_query(q.id.clone());
    if let Some(text) = answer {
        request = request.text(text);
    }
    if let Err(e) = request.await {
        warn!("Failed to answer callback query: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Button;

    #[test]
    fn test_classify_delivery_errors() {
        assert_eq!(
            classify(&RequestError::Api(ApiError::MessageNotModified)),
            DeliveryOutcome::Delivered
        );
        assert!(matches!(
            classify(&RequestError::Api(ApiError::BotBlocked)),
            DeliveryOutcome::Unreachable(_)
        ));
        assert!(matches!(
            classify(&RequestError::Api(ApiError::ChatNotFound)),
            DeliveryOutcome::Unreachable(_)
        ));
        assert!(matches!(
            classify(&RequestError::Api(ApiError::Unknown("Bad Gateway".to_string()))),
            DeliveryOutcome::Transient(_)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_retries_while_dispatcher_idle() {
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let task = {
            let attempts = attempts.clone();
            tokio::spawn(shutdown_on_cancel(cancel.clone(), move || {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n < 2 {
                    Err("idle")
                } else {
                    Ok(())
                }
            }))
        };

        tokio::task::yield_now().await;
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn test_keyboard_conversion_keeps_layout() {
        let keyboard = Keyboard {
            rows: vec![
                vec![Button::new("a", "toggle:A:0"), Button::new("b", "toggle:A:0")],
                vec![Button::new("Next ➡️", "nav:1")],
            ],
        };
        let markup = to_markup(&keyboard);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[1][0].text, "Next ➡️");
    }
}
