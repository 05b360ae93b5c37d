use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::catalog::CatalogItem;
use crate::platform::{ChatId, DeliveryOutcome, Messenger};
use crate::store::SubscriptionStore;

/// A detected release, consumed once by the notifier
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub item: CatalogItem,
    pub new_version: String,
    pub title: String,
    pub link: String,
}

/// What an unreachable recipient loses
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PruneScope {
    /// Drop the subscriber record and every subscription.
    #[default]
    Subscriber,
    /// Drop only the subscription to the item being delivered.
    Item,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub unreachable: Vec<ChatId>,
    pub transient: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.unreachable.len() + self.transient
    }
}

/// Fans a notification out to subscribers, one at a time
pub struct Notifier {
    messenger: Arc<dyn Messenger>,
    store: SubscriptionStore,
    send_delay: Duration,
    prune_scope: PruneScope,
}

impl Notifier {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        store: SubscriptionStore,
        send_delay: Duration,
        prune_scope: PruneScope,
    ) -> Self {
        Self {
            messenger,
            store,
            send_delay,
            prune_scope,
        }
    }

    /// Deliver `event` to every recipient in order, pausing between sends.
    /// A failure for one recipient never stops the batch.
    pub async fn notify(&self, event: &NotificationEvent, recipients: &[ChatId]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if recipients.is_empty() {
            return report;
        }

        let text = render_message(event);
        let item_name = &event.item.name;

        for (idx, chat_id) in recipients.iter().copied().enumerate() {
            if idx > 0 && !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }

            match self.messenger.send_message(chat_id, &text, true).await {
                DeliveryOutcome::Delivered => {
                    debug!(item = %item_name, chat = %chat_id, "Notification delivered");
                    report.delivered += 1;
                }
                DeliveryOutcome::Unreachable(reason) => {
                    info!(item = %item_name, chat = %chat_id, %reason, "Recipient unreachable, pruning");
                    self.prune(chat_id, item_name).await;
                    report.unreachable.push(chat_id);
                }
                DeliveryOutcome::Transient(reason) => {
                    warn!(item = %item_name, chat = %chat_id, %reason, "Delivery failed, will not retry this cycle");
                    report.transient += 1;
                }
            }
        }

        info!(
            item = %item_name,
            version = %event.new_version,
            delivered = report.delivered,
            unreachable = report.unreachable.len(),
            transient = report.transient,
            "Fan-out finished"
        );
        report
    }

    async fn prune(&self, chat_id: ChatId, item_name: &str) {
        let result = match self.prune_scope {
            PruneScope::Subscriber => self.store.prune(chat_id).await,
            PruneScope::Item => self.store.prune_item(chat_id, item_name).await,
        };
        if let Err(e) = result {
            warn!(chat = %chat_id, "Failed to prune unreachable recipient: {:#}", e);
        }
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// HTML notification body for a release
pub fn render_message(event: &NotificationEvent) -> String {
    let item = &event.item;
    let link = item.render_link(&event.link, &event.new_version);
    format!(
        "{} <b>{}</b> has a new version!\n\n\
         🆕 Version: <code>{}</code>\n\
         📝 {}\n\n\
         🔗 <a href=\"{}\">Download</a>",
        item.emoji(),
        escape_html(&item.name),
        escape_html(&event.new_version),
        escape_html(&event.title),
        escape_html(&link),
    )
}
