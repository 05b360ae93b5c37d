use serde::Deserialize;

/// One tracked application: where its releases are published and where
/// users should be sent to get them.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CatalogItem {
    pub name: String,
    pub feed_url: String,
    /// Link shown in notifications. `{link}` is replaced by the entry link,
    /// `{version}` by the detected version.
    pub deep_link: String,
    #[serde(default)]
    pub emoji: Option<String>,
}

const DEFAULT_EMOJI: &str = "📱";

/// Decorations for well-known apps when the catalog entry has none.
const EMOJI_TABLE: &[(&str, &str)] = &[
    ("WhatsApp", "💬"),
    ("Telegram", "✈️"),
    ("Instagram", "📸"),
    ("Facebook", "📘"),
    ("Messenger", "💭"),
    ("TikTok", "🎵"),
    ("YouTube", "▶️"),
    ("Spotify", "🎧"),
    ("Chrome", "🌐"),
    ("Signal", "🔒"),
    ("Snapchat", "👻"),
    ("Netflix", "🎬"),
];

impl CatalogItem {
    pub fn emoji(&self) -> &str {
        if let Some(emoji) = self.emoji.as_deref().filter(|e| !e.is_empty()) {
            return emoji;
        }
        EMOJI_TABLE
            .iter()
            .find(|(name, _)| *name == self.name)
            .map(|(_, emoji)| *emoji)
            .unwrap_or(DEFAULT_EMOJI)
    }

    pub fn render_link(&self, entry_link: &str, version: &str) -> String {
        self.deep_link
            .replace("{link}", entry_link)
            .replace("{version}", version)
    }
}

/// The closed set of tracked items, kept in alphabetical order.
#[derive(Debug, Clone)]
pub struct Catalog {
    items: Vec<CatalogItem>,
}

impl Catalog {
    pub fn new(mut items: Vec<CatalogItem>) -> Self {
        items.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Self { items }
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn get(&self, name: &str) -> Option<&CatalogItem> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn apkmirror(name: &str, path: &str) -> CatalogItem {
    CatalogItem {
        name: name.to_string(),
        feed_url: format!("https://www.apkmirror.com/apk/{}/feed/", path),
        deep_link: "{link}".to_string(),
        emoji: None,
    }
}

/// Catalog used when the config file does not define one
pub fn default_items() -> Vec<CatalogItem> {
    vec![
        apkmirror("WhatsApp", "whatsapp-inc/whatsapp"),
        apkmirror("Telegram", "telegram-fz-llc/telegram"),
        apkmirror("Instagram", "instagram/instagram-instagram"),
        apkmirror("Facebook", "facebook-2/facebook"),
        apkmirror("Messenger", "facebook-2/messenger"),
        apkmirror("TikTok", "tiktok-pte-ltd/tik-tok-including-musical-ly"),
        apkmirror("YouTube", "google-inc/youtube"),
        apkmirror("Spotify", "spotify-ltd/spotify"),
        apkmirror("Chrome", "google-inc/chrome"),
        apkmirror("Signal", "signal-foundation/signal-private-messenger"),
        apkmirror("Snapchat", "snap-inc/snapchat"),
        apkmirror("Netflix", "netflix-inc/netflix"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_sorted_alphabetically() {
        let catalog = Catalog::new(default_items());
        let names: Vec<&str> = catalog.items().iter().map(|i| i.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_by_key(|n| n.to_lowercase());
        assert_eq!(names, sorted);
        assert_eq!(names[0], "Chrome");
    }

    #[test]
    fn test_emoji_falls_back_to_default() {
        let mut item = apkmirror("Obscure App", "x/y");
        assert_eq!(item.emoji(), DEFAULT_EMOJI);

        item.name = "Telegram".to_string();
        assert_eq!(item.emoji(), "✈️");

        item.emoji = Some("🚀".to_string());
        assert_eq!(item.emoji(), "🚀");
    }

    #[test]
    fn test_render_link_substitutes_placeholders() {
        let item = CatalogItem {
            name: "Signal".to_string(),
            feed_url: "https://example.com/feed".to_string(),
            deep_link: "https://dl.example.com/signal?v={version}&src={link}".to_string(),
            emoji: None,
        };
        assert_eq!(
            item.render_link("https://example.com/r/1", "7.1.0"),
            "https://dl.example.com/signal?v=7.1.0&src=https://example.com/r/1"
        );
    }
}
