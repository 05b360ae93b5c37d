use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::feed::UNKNOWN_VERSION;

/// Last-seen version per catalog item.
///
/// Only the poll cycle writes here. Markers live for the lifetime of the
/// process; a missing marker means "not observed yet", not "no update".
#[derive(Clone, Default)]
pub struct VersionTracker {
    markers: Arc<RwLock<HashMap<String, String>>>,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn last_seen(&self, item_name: &str) -> Option<String> {
        self.markers.read().await.get(item_name).cloned()
    }

    /// True iff the version is known and differs from the last-seen marker.
    pub async fn is_new_version(&self, item_name: &str, version: &str) -> bool {
        if version == UNKNOWN_VERSION {
            return false;
        }
        self.markers
            .read()
            .await
            .get(item_name)
            .map_or(true, |seen| seen != version)
    }

    /// Record a version as seen. Called once the fan-out for it has been attempted.
    pub async fn commit(&self, item_name: &str, version: &str) {
        self.markers
            .write()
            .await
            .insert(item_name.to_string(), version.to_string());
    }

    pub async fn len(&self) -> usize {
        self.markers.read().await.len()
    }
}
