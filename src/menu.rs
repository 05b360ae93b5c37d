//! Paginated subscription menu.
//!
//! The keyboard is a pure function of the chat's subscription set, the page
//! and the catalog. It is recomputed on every transition and never cached.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::catalog::Catalog;
use crate::platform::{Button, ChatId, Keyboard};
use crate::store::SubscriptionStore;

pub const MENU_TEXT: &str = "Choose the apps you want update notifications for.\n\
     Tap an app to subscribe or unsubscribe.";

const NAV_PREFIX: &str = "nav:";
const TOGGLE_PREFIX: &str = "toggle:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    Closed,
    PageView(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    Open,
    Navigate(usize),
    Toggle { item: String, page: usize },
}

impl MenuAction {
    /// Parse callback data (`nav:<page>` or `toggle:<item>:<page>`)
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(page) = data.strip_prefix(NAV_PREFIX) {
            return page.parse().ok().map(MenuAction::Navigate);
        }
        let rest = data.strip_prefix(TOGGLE_PREFIX)?;
        let (item, page) = rest.rsplit_once(':')?;
        if item.is_empty() {
            return None;
        }
        Some(MenuAction::Toggle {
            item: item.to_string(),
            page: page.parse().ok()?,
        })
    }

    pub fn callback_data(&self) -> String {
        match self {
            MenuAction::Open => format!("{}0", NAV_PREFIX),
            MenuAction::Navigate(page) => format!("{}{}", NAV_PREFIX, page),
            MenuAction::Toggle { item, page } => format!("{}{}:{}", TOGGLE_PREFIX, item, page),
        }
    }
}

/// Result of applying an action: the page to show and its keyboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuView {
    pub page: usize,
    pub keyboard: Keyboard,
    /// Item and its new membership, when the action was a toggle
    pub toggled: Option<(String, bool)>,
}

pub struct Menu {
    catalog: Arc<Catalog>,
    page_size: usize,
}

impl Menu {
    pub fn new(catalog: Arc<Catalog>, page_size: usize) -> Self {
        Self {
            catalog,
            page_size: page_size.max(1),
        }
    }

    pub fn page_count(&self) -> usize {
        self.catalog.len().div_ceil(self.page_size).max(1)
    }

    pub fn clamp_page(&self, page: usize) -> usize {
        page.min(self.page_count() - 1)
    }

    pub fn transition(&self, state: MenuState, action: &MenuAction) -> MenuState {
        match action {
            MenuAction::Open => MenuState::PageView(0),
            MenuAction::Navigate(page) => MenuState::PageView(self.clamp_page(*page)),
            MenuAction::Toggle { page, .. } => match state {
                MenuState::PageView(current) => MenuState::PageView(self.clamp_page(current)),
                MenuState::Closed => MenuState::PageView(self.clamp_page(*page)),
            },
        }
    }

    pub fn render(&self, subscribed: &BTreeSet<String>, page: usize) -> Keyboard {
        let page = self.clamp_page(page);
        let mut rows: Vec<Vec<Button>> = self
            .catalog
            .items()
            .iter()
            .skip(page * self.page_size)
            .take(self.page_size)
            .map(|item| {
                let data = MenuAction::Toggle {
                    item: item.name.clone(),
                    page,
                }
                .callback_data();
                let (marker, action) = if subscribed.contains(&item.name) {
                    ("✅", "Unsubscribe")
                } else {
                    ("⬜", "Subscribe")
                };
                vec![
                    Button::new(format!("{} {} {}", marker, item.emoji(), item.name), data.clone()),
                    Button::new(action, data),
                ]
            })
            .collect();

        let mut nav = Vec::new();
        if page > 0 {
            nav.push(Button::new(
                "⬅️ Previous",
                MenuAction::Navigate(page - 1).callback_data(),
            ));
        }
        if page + 1 < self.page_count() {
            nav.push(Button::new(
                "Next ➡️",
                MenuAction::Navigate(page + 1).callback_data(),
            ));
        }
        if !nav.is_empty() {
            rows.push(nav);
        }

        Keyboard { rows }
    }

    /// Apply an action for a chat currently showing `state`, performing the
    /// store toggle when asked and rendering the resulting page.
    pub async fn apply(
        &self,
        store: &SubscriptionStore,
        chat_id: ChatId,
        state: MenuState,
        action: &MenuAction,
    ) -> Result<MenuView> {
        let mut toggled = None;
        if let MenuAction::Toggle { item, .. } = action {
            if self.catalog.get(item).is_some() {
                let now_subscribed = store.toggle(chat_id, item).await?;
                debug!(chat = %chat_id, item = %item, subscribed = now_subscribed, "Toggled subscription");
                toggled = Some((item.clone(), now_subscribed));
            } else {
                debug!(chat = %chat_id, item = %item, "Ignoring toggle for unknown item");
            }
        }

        let page = match self.transition(state, action) {
            MenuState::PageView(page) => page,
            MenuState::Closed => 0,
        };
        let subscribed = store.subscriptions_of(chat_id).await?;
        Ok(MenuView {
            page,
            keyboard: self.render(&subscribed, page),
            toggled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogItem;

    fn catalog(n: usize) -> Arc<Catalog> {
        let items = (0..n)
            .map(|i| CatalogItem {
                name: format!("App{:02}", i),
                feed_url: format!("https://example.com/{}/feed", i),
                deep_link: "{link}".to_string(),
                emoji: Some("📦".to_string()),
            })
            .collect();
        Arc::new(Catalog::new(items))
    }

    fn nav_labels(kb: &Keyboard) -> Vec<String> {
        kb.rows
            .iter()
            .flatten()
            .filter(|b| b.callback_data.starts_with(NAV_PREFIX))
            .map(|b| b.label.clone())
            .collect()
    }

    fn item_rows(kb: &Keyboard) -> usize {
        kb.rows
            .iter()
            .filter(|row| row.iter().all(|b| b.callback_data.starts_with(TOGGLE_PREFIX)))
            .count()
    }

    #[test]
    fn test_parse_callback_data() {
        assert_eq!(MenuAction::parse("nav:2"), Some(MenuAction::Navigate(2)));
        assert_eq!(
            MenuAction::parse("toggle:WhatsApp:1"),
            Some(MenuAction::Toggle {
                item: "WhatsApp".to_string(),
                page: 1
            })
        );
        assert_eq!(MenuAction::parse("toggle::1"), None);
        assert_eq!(MenuAction::parse("toggle:WhatsApp"), None);
        assert_eq!(MenuAction::parse("nav:x"), None);
        assert_eq!(MenuAction::parse("askuser:1:2"), None);
    }

    #[test]
    fn test_pagination_controls_and_row_counts() {
        for (n, p) in [(20usize, 8usize), (16, 8), (3, 8), (1, 1), (9, 4)] {
            let menu = Menu::new(catalog(n), p);
            let pages = n.div_ceil(p);
            assert_eq!(menu.page_count(), pages);

            for page in 0..pages {
                let kb = menu.render(&BTreeSet::new(), page);
                assert_eq!(item_rows(&kb), p.min(n - page * p), "n={} p={} page={}", n, p, page);

                let nav = nav_labels(&kb);
                assert_eq!(nav.iter().any(|l| l.contains("Previous")), page > 0);
                assert_eq!(nav.iter().any(|l| l.contains("Next")), page + 1 < pages);
            }
        }
    }

    #[test]
    fn test_navigation_is_clamped() {
        let menu = Menu::new(catalog(20), 8);
        assert_eq!(
            menu.transition(MenuState::Closed, &MenuAction::Navigate(99)),
            MenuState::PageView(2)
        );
        assert_eq!(
            menu.transition(MenuState::PageView(2), &MenuAction::Open),
            MenuState::PageView(0)
        );
        assert_eq!(
            menu.transition(
                MenuState::PageView(1),
                &MenuAction::Toggle {
                    item: "App09".to_string(),
                    page: 1
                }
            ),
            MenuState::PageView(1)
        );
    }

    #[test]
    fn test_empty_catalog_renders_single_empty_page() {
        let menu = Menu::new(catalog(0), 8);
        assert_eq!(menu.page_count(), 1);
        assert!(menu.render(&BTreeSet::new(), 0).rows.is_empty());
    }

    #[test]
    fn test_render_marks_subscribed_items() {
        let menu = Menu::new(catalog(3), 8);
        let subscribed: BTreeSet<String> = ["App01".to_string()].into_iter().collect();
        let kb = menu.render(&subscribed, 0);

        assert_eq!(kb.rows[0][0].label, "⬜ 📦 App00");
        assert_eq!(kb.rows[0][1].label, "Subscribe");
        assert_eq!(kb.rows[1][0].label, "✅ 📦 App01");
        assert_eq!(kb.rows[1][1].label, "Unsubscribe");
        assert_eq!(kb.rows[1][1].callback_data, "toggle:App01:0");
    }

    #[tokio::test]
    async fn test_apply_toggle_rerenders_same_page() {
        let store = SubscriptionStore::open_in_memory().unwrap();
        let menu = Menu::new(catalog(10), 4);
        let chat = ChatId(5);
        let action = MenuAction::Toggle {
            item: "App05".to_string(),
            page: 1,
        };

        let view = menu
            .apply(&store, chat, MenuState::PageView(1), &action)
            .await
            .unwrap();
        assert_eq!(view.page, 1);
        assert_eq!(view.toggled, Some(("App05".to_string(), true)));
        assert_eq!(view.keyboard.rows[1][0].label, "✅ 📦 App05");

        let view = menu
            .apply(&store, chat, MenuState::PageView(1), &action)
            .await
            .unwrap();
        assert_eq!(view.toggled, Some(("App05".to_string(), false)));
        assert!(store.subscriptions_of(chat).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_ignores_unknown_item() {
        let store = SubscriptionStore::open_in_memory().unwrap();
        let menu = Menu::new(catalog(2), 8);
        let view = menu
            .apply(
                &store,
                ChatId(1),
                MenuState::PageView(0),
                &MenuAction::Toggle {
                    item: "Ghost".to_string(),
                    page: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(view.toggled, None);
        assert!(store.subscribers_of("Ghost").await.unwrap().is_empty());
    }
}
