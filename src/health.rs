use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::monitor::Monitor;
use crate::store::SubscriptionStore;

const SERVICE_NAME: &str = "App Update Monitor Bot";

#[derive(Clone)]
pub struct HealthState {
    pub monitor: Arc<Monitor>,
    pub store: SubscriptionStore,
    pub catalog_size: usize,
    pub bot_token_configured: bool,
    pub database_configured: bool,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let (status, code, subscribers) = match state.store.subscriber_count().await {
        Ok(count) => ("healthy", StatusCode::OK, Some(count)),
        Err(e) => {
            warn!("Health check could not reach the store: {:#}", e);
            ("degraded", StatusCode::SERVICE_UNAVAILABLE, None)
        }
    };

    let body = json!({
        "status": status,
        "service": SERVICE_NAME,
        "environment": {
            "BOT_TOKEN": state.bot_token_configured,
            "DATABASE_PATH": state.database_configured,
        },
        "catalog_size": state.catalog_size,
        "subscribers": subscribers,
        "last_cycle": state.monitor.last_report().await,
    });
    (code, Json(body))
}

/// Serve the health endpoint until `cancel` fires
pub async fn serve(port: u16, state: HealthState, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind health endpoint on port {}", port))?;
    info!("Health endpoint listening on port {}", port);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("Health endpoint failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CatalogItem};
    use crate::feed::{FeedSource, FetchError, LatestRelease};
    use crate::monitor::FirstObservation;
    use crate::notifier::tests::RecordingMessenger;
    use crate::notifier::{Notifier, PruneScope};
    use crate::platform::ChatId;
    use crate::tracker::VersionTracker;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    struct EmptyFeeds;

    #[async_trait]
    impl FeedSource for EmptyFeeds {
        async fn fetch_latest(&self, _item: &CatalogItem) -> Result<LatestRelease, FetchError> {
            Err(FetchError::NoEntries)
        }
    }

    fn state() -> HealthState {
        let store = SubscriptionStore::open_in_memory().unwrap();
        let catalog = Arc::new(Catalog::new(crate::catalog::default_items()));
        let notifier = Notifier::new(
            Arc::new(RecordingMessenger::default()),
            store.clone(),
            Duration::ZERO,
            PruneScope::Subscriber,
        );
        let monitor = Monitor::new(
            catalog.clone(),
            Arc::new(EmptyFeeds),
            VersionTracker::new(),
            store.clone(),
            notifier,
            FirstObservation::Seed,
        );
        HealthState {
            monitor: Arc::new(monitor),
            store,
            catalog_size: catalog.len(),
            bot_token_configured: true,
            database_configured: true,
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_root_reports_healthy() {
        let (status, body) = get_json(router(state()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_health_includes_counts_and_last_cycle() {
        let state = state();
        state.store.toggle(ChatId(1), "Telegram").await.unwrap();
        state
            .monitor
            .run_cycle(&CancellationToken::new())
            .await
            .unwrap();

        let (status, body) = get_json(router(state.clone()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["environment"]["BOT_TOKEN"], true);
        assert_eq!(body["subscribers"], 1);
        assert_eq!(body["catalog_size"], state.catalog_size);
        assert_eq!(body["last_cycle"]["failed"], state.catalog_size);
    }
}
