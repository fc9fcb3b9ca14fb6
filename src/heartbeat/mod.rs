//! Periodic liveness reporting.
//!
//! One cooperative task: an immediate heartbeat on start, then one per
//! interval tick. Each tick has its own retry budget; a failed heartbeat
//! never stops the loop. Observable state is published through a snapshot
//! readable from any task.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{RetryPolicy, ServerClient};
use crate::identity::IdentityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Unknown => "unknown",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Point-in-time view of the loop's shared state.
#[derive(Debug, Clone)]
pub struct HeartbeatSnapshot {
    pub status: ConnectionStatus,
    pub last_sent: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub interval: Duration,
}

impl HeartbeatSnapshot {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Elapsed time since the last successful send, for status lines.
    pub fn since_last_sent(&self) -> Option<Duration> {
        self.last_sent
            .map(|sent| (Utc::now() - sent).to_std().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct State {
    status: ConnectionStatus,
    last_sent: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct HeartbeatLoop {
    client: Arc<ServerClient>,
    identity: Arc<IdentityStore>,
    interval: Duration,
    policy: RetryPolicy,
    state: Arc<RwLock<State>>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatLoop {
    pub fn new(
        client: Arc<ServerClient>,
        identity: Arc<IdentityStore>,
        interval: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            identity,
            interval,
            policy,
            state: Arc::new(RwLock::new(State::default())),
            token: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let client = Arc::clone(&self.client);
        let identity = Arc::clone(&self.identity);
        let state = Arc::clone(&self.state);
        let token = self.token.clone();
        let interval = self.interval;
        let policy = self.policy;

        self.handle = Some(tokio::spawn(async move {
            run(client, identity, state, token, interval, policy).await;
        }));
        info!(interval_secs = self.interval.as_secs(), "heartbeat loop started");
    }

    /// Cancel the loop and wait for any in-flight attempt to finish.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("heartbeat loop stopped");
    }

    pub fn snapshot(&self) -> HeartbeatSnapshot {
        let state = self.state.read().expect("heartbeat state lock");
        HeartbeatSnapshot {
            status: state.status,
            last_sent: state.last_sent,
            last_error: state.last_error.clone(),
            interval: self.interval,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot().is_connected()
    }
}

async fn run(
    client: Arc<ServerClient>,
    identity: Arc<IdentityStore>,
    state: Arc<RwLock<State>>,
    token: CancellationToken,
    interval: Duration,
    policy: RetryPolicy,
) {
    // Report alive immediately rather than waiting out the first interval.
    send_with_retries(&client, &identity, &state, &token, policy).await;

    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tick.tick().await; // completes immediately

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let mut state = state.write().expect("heartbeat state lock");
                state.status = ConnectionStatus::Disconnected;
                debug!("heartbeat loop shutting down");
                return;
            }
            _ = tick.tick() => {
                send_with_retries(&client, &identity, &state, &token, policy).await;
            }
        }
    }
}

/// One heartbeat cycle: the attempt plus its in-loop retry budget.
async fn send_with_retries(
    client: &ServerClient,
    identity: &IdentityStore,
    state: &RwLock<State>,
    token: &CancellationToken,
    policy: RetryPolicy,
) {
    let mut last_err = None;

    for attempt in 0..=policy.attempts {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            debug!(attempt, ?delay, "retrying heartbeat");
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = client.heartbeat() => result,
        };

        match result {
            Ok(()) => {
                {
                    let mut state = state.write().expect("heartbeat state lock");
                    state.status = ConnectionStatus::Connected;
                    state.last_sent = Some(Utc::now());
                    state.last_error = None;
                }
                if let Err(e) = identity.touch_last_seen() {
                    warn!(error = %e, "failed to update lastSeen in identity");
                }
                debug!("heartbeat sent");
                return;
            }
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "heartbeat attempt failed");
                last_err = Some(e);
            }
        }
    }

    let mut state = state.write().expect("heartbeat state lock");
    state.status = ConnectionStatus::Error;
    state.last_error = last_err.map(|e| e.to_string());
    error!(attempts = policy.attempts + 1, "heartbeat cycle failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Credentials, StorageRoot};
    use axum::routing::put;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

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

    #[tokio::test]
    async fn immediate_beat_then_connected_status() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_handler = Arc::clone(&hits);
        let app = Router::new().route(
            "/api/v1/screens/scr-1/heartbeat",
            put(move || {
                let hits = Arc::clone(&hits_in_handler);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    axum::http::StatusCode::NO_CONTENT
                }
            }),
        );
        let base = spawn_server(app).await;

        let dir = tempdir().expect("tempdir");
        let identity = Arc::new(IdentityStore::new(&StorageRoot::new(dir.path())));
        let policy = RetryPolicy {
            attempts: 0,
            base_delay: Duration::from_millis(1),
        };
        let mut hb = HeartbeatLoop::new(
            test_client(&base),
            identity,
            Duration::from_secs(300),
            policy,
        );

        hb.start();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let snapshot = hb.snapshot();
        assert!(snapshot.is_connected());
        assert!(snapshot.last_sent.is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 1, "one immediate heartbeat");

        hb.stop().await;
        assert_eq!(hb.snapshot().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn failed_cycle_sets_error_but_loop_survives() {
        // Unreachable server: the cycle exhausts its budget and records the
        // error, but the loop keeps running until cancelled.
        let dir = tempdir().expect("tempdir");
        let identity = Arc::new(IdentityStore::new(&StorageRoot::new(dir.path())));
        let policy = RetryPolicy {
            attempts: 1,
            base_delay: Duration::from_millis(1),
        };
        let mut hb = HeartbeatLoop::new(
            test_client("http://127.0.0.1:9"),
            identity,
            Duration::from_secs(300),
            policy,
        );

        hb.start();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let snapshot = hb.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Error);
        assert!(snapshot.last_error.is_some());

        hb.stop().await;
    }
}
