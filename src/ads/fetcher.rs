//! Periodic manifest pulls.
//!
//! Same shape as the heartbeat loop: an immediate fetch on start, then one
//! per tick. A successful fetch is persisted through [`AdStorage`], kept as
//! the retained copy, and handed to the single registered callback. On
//! failure the previous successful manifest is preserved untouched.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ads::AdStorage;
use crate::client::{RetryPolicy, ServerClient};
use crate::AdManifest;

type ManifestCallback = Box<dyn Fn(&AdManifest) + Send + Sync>;

/// Point-in-time view of the fetch loop's shared state.
#[derive(Debug, Clone)]
pub struct FetchSnapshot {
    pub last_fetch: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub ads_count: usize,
    pub interval: Duration,
}

#[derive(Default)]
struct State {
    last_manifest: Option<AdManifest>,
    last_fetch: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct AdFetcher {
    client: Arc<ServerClient>,
    storage: Arc<AdStorage>,
    interval: Duration,
    policy: RetryPolicy,
    state: Arc<RwLock<State>>,
    on_manifest: Arc<RwLock<Option<ManifestCallback>>>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AdFetcher {
    pub fn new(
        client: Arc<ServerClient>,
        storage: Arc<AdStorage>,
        interval: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            storage,
            interval,
            policy,
            state: Arc::new(RwLock::new(State::default())),
            on_manifest: Arc::new(RwLock::new(None)),
            token: CancellationToken::new(),
            handle: None,
        }
    }

    /// Register the single manifest callback. The fetcher knows nothing
    /// about its consumer; it only holds this notify handle.
    pub fn set_on_manifest(&self, callback: impl Fn(&AdManifest) + Send + Sync + 'static) {
        *self.on_manifest.write().expect("callback lock") = Some(Box::new(callback));
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let client = Arc::clone(&self.client);
        let storage = Arc::clone(&self.storage);
        let state = Arc::clone(&self.state);
        let on_manifest = Arc::clone(&self.on_manifest);
        let token = self.token.clone();
        let interval = self.interval;
        let policy = self.policy;

        self.handle = Some(tokio::spawn(async move {
            run(client, storage, state, on_manifest, token, interval, policy).await;
        }));
        info!(interval_secs = self.interval.as_secs(), "ad fetch loop started");
    }

    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("ad fetch loop stopped");
    }

    /// The last successfully fetched manifest, if any.
    pub fn last_manifest(&self) -> Option<AdManifest> {
        self.state
            .read()
            .expect("fetch state lock")
            .last_manifest
            .clone()
    }

    pub fn snapshot(&self) -> FetchSnapshot {
        let state = self.state.read().expect("fetch state lock");
        FetchSnapshot {
            last_fetch: state.last_fetch,
            last_error: state.last_error.clone(),
            ads_count: state
                .last_manifest
                .as_ref()
                .map(|m| m.ads.len())
                .unwrap_or(0),
            interval: self.interval,
        }
    }

    pub fn storage(&self) -> Arc<AdStorage> {
        Arc::clone(&self.storage)
    }
}

async fn run(
    client: Arc<ServerClient>,
    storage: Arc<AdStorage>,
    state: Arc<RwLock<State>>,
    on_manifest: Arc<RwLock<Option<ManifestCallback>>>,
    token: CancellationToken,
    interval: Duration,
    policy: RetryPolicy,
) {
    fetch_with_retries(&client, &storage, &state, &on_manifest, &token, policy).await;

    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tick.tick().await; // completes immediately

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("ad fetch loop shutting down");
                return;
            }
            _ = tick.tick() => {
                fetch_with_retries(&client, &storage, &state, &on_manifest, &token, policy).await;
            }
        }
    }
}

/// One fetch cycle: the attempt plus its in-loop retry budget.
async fn fetch_with_retries(
    client: &ServerClient,
    storage: &AdStorage,
    state: &RwLock<State>,
    on_manifest: &RwLock<Option<ManifestCallback>>,
    token: &CancellationToken,
    policy: RetryPolicy,
) {
    let mut last_err = None;

    for attempt in 0..=policy.attempts {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            debug!(attempt, ?delay, "retrying manifest fetch");
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = client.get_ads() => result,
        };

        match result {
            Ok(manifest) => {
                if let Err(e) = storage.save_manifest(&manifest) {
                    warn!(error = %e, "failed to persist manifest");
                }
                {
                    let mut state = state.write().expect("fetch state lock");
                    state.last_manifest = Some(manifest.clone());
                    state.last_fetch = Some(Utc::now());
                    state.last_error = None;
                }
                info!(ads = manifest.ads.len(), "manifest updated");
                if let Some(callback) = on_manifest.read().expect("callback lock").as_ref() {
                    callback(&manifest);
                }
                return;
            }
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "manifest fetch attempt failed");
                last_err = Some(e);
            }
        }
    }

    // Preserve the previous successful manifest; only record the error.
    let mut state = state.write().expect("fetch state lock");
    state.last_error = last_err.map(|e| e.to_string());
    error!(attempts = policy.attempts + 1, "manifest fetch cycle failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Credentials, StorageRoot};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }

    fn test_client(base_url: &str) -> Arc<ServerClient> {
        let policy = RetryPolicy {
            attempts: 0,
            base_delay: Duration::from_millis(1),
        };
        Arc::new(
            ServerClient::new(base_url, Credentials::new("scr-1", "pk-1"), policy)
                .expect("client"),
        )
    }

    #[tokio::test]
    async fn fetch_persists_manifest_and_invokes_callback() {
        let app = Router::new().route(
            "/api/v1/screens/scr-1/ads/deliver",
            get(|| async {
                Json(serde_json::json!({
                    "ads": [{
                        "id": "ad-A",
                        "type": "image",
                        "contentUrl": "http://cdn/x.jpg"
                    }],
                    "updatedAt": "2024-02-01T08:00:00Z"
                }))
            }),
        );
        let base = spawn_server(app).await;

        let dir = tempdir().expect("tempdir");
        let storage = Arc::new(AdStorage::new(&StorageRoot::new(dir.path())));
        let policy = RetryPolicy {
            attempts: 0,
            base_delay: Duration::from_millis(1),
        };
        let mut fetcher = AdFetcher::new(
            test_client(&base),
            Arc::clone(&storage),
            Duration::from_secs(300),
            policy,
        );

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_in_callback = Arc::clone(&delivered);
        fetcher.set_on_manifest(move |manifest| {
            assert_eq!(manifest.ads.len(), 1);
            delivered_in_callback.fetch_add(1, Ordering::SeqCst);
        });

        fetcher.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        fetcher.stop().await;

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert!(storage.exists(), "manifest persisted to disk");
        let loaded = storage.load_manifest().expect("load");
        assert_eq!(loaded.ads[0].id, "ad-A");
        assert_eq!(fetcher.snapshot().ads_count, 1);
    }

    #[tokio::test]
    async fn failed_fetch_preserves_previous_manifest() {
        let dir = tempdir().expect("tempdir");
        let storage = Arc::new(AdStorage::new(&StorageRoot::new(dir.path())));
        let policy = RetryPolicy {
            attempts: 0,
            base_delay: Duration::from_millis(1),
        };
        let mut fetcher = AdFetcher::new(
            test_client("http://127.0.0.1:9"),
            Arc::clone(&storage),
            Duration::from_secs(300),
            policy,
        );

        // Seed the retained copy as if an earlier cycle had succeeded.
        {
            let mut state = fetcher.state.write().expect("state lock");
            state.last_manifest = Some(AdManifest::empty(Utc::now()));
        }

        fetcher.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        fetcher.stop().await;

        let snapshot = fetcher.snapshot();
        assert!(snapshot.last_error.is_some());
        assert!(fetcher.last_manifest().is_some(), "previous manifest kept");
    }
}
