//! Playback orchestration: selector → downloader → renderer dispatch.
//!
//! A single cooperative task wakes every second, asks the playlist for the
//! next eligible ad when the current one is due, materializes its media,
//! and hands the local path to the renderer dispatch. Download and render
//! failures are per-ad recoverable: the ad is skipped and the loop
//! continues. Locks are always released before any I/O, spawn, or sleep.

pub mod downloader;
pub mod playlist;
pub mod renderer;
pub mod renderers;
pub mod scheduler;

pub use downloader::Downloader;
pub use playlist::Playlist;
pub use renderer::{Renderer, RendererManager, RendererStatus};
pub use scheduler::Scheduler;

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ads::AdStorage;
use crate::{Ad, AdManifest, Result, RuntimeConfig};

const TICK: Duration = Duration::from_secs(1);
const IDLE_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Stopped,
    Loading,
    Playing,
    Paused,
    Error,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlayerState::Stopped => "stopped",
            PlayerState::Loading => "loading",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlayerStats {
    pub state: PlayerState,
    pub total_ads_played: u64,
    pub current_ad_id: Option<String>,
    pub current_ad_kind: Option<String>,
    pub playback_started: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Shared {
    state: PlayerState,
    current_ad: Option<Ad>,
    stats: PlayerStats,
}

type AdsUpdatedCallback = Box<dyn Fn(&AdManifest) + Send + Sync>;

pub struct Player {
    playlist: Arc<Playlist>,
    scheduler: Scheduler,
    downloader: Arc<Downloader>,
    storage: Arc<AdStorage>,
    shared: Arc<RwLock<Shared>>,
    on_ads_updated: RwLock<Option<AdsUpdatedCallback>>,
    run: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Player {
    pub fn new(storage: Arc<AdStorage>, config: &RuntimeConfig) -> Result<Self> {
        let downloader = Arc::new(Downloader::new(
            Arc::clone(&storage),
            config.retry_policy(),
        )?);
        Ok(Self {
            playlist: Arc::new(Playlist::new()),
            scheduler: Scheduler::default(),
            downloader,
            storage,
            shared: Arc::new(RwLock::new(Shared::default())),
            on_ads_updated: RwLock::new(None),
            run: Mutex::new(None),
        })
    }

    /// Start playback. Reloads the persisted manifest so cached media keeps
    /// playing across restarts even when the server is unreachable.
    pub fn start(&self) -> Result<()> {
        let mut run = self.run.lock().expect("player run lock");
        if run.is_some() {
            return Ok(());
        }

        if let Ok(manifest) = self.storage.load_manifest() {
            self.playlist.update(&manifest);
            info!(ads = manifest.ads.len(), "loaded manifest from storage");
        }

        {
            let mut shared = self.shared.write().expect("player state lock");
            shared.state = PlayerState::Playing;
            shared.stats.state = PlayerState::Playing;
        }

        // Renderer resolution happens here, once per start.
        let manager = RendererManager::new();
        let token = CancellationToken::new();
        let handle = tokio::spawn(playback_loop(
            Arc::clone(&self.playlist),
            self.scheduler,
            Arc::clone(&self.downloader),
            Arc::clone(&self.shared),
            token.clone(),
            manager,
        ));
        *run = Some((token, handle));
        info!("player started");
        Ok(())
    }

    /// Cancel the playback loop and wait for it to kill any renderer child.
    pub async fn stop(&self) {
        let Some((token, handle)) = self.run.lock().expect("player run lock").take() else {
            return;
        };
        token.cancel();
        let _ = handle.await;

        let mut shared = self.shared.write().expect("player state lock");
        shared.state = PlayerState::Stopped;
        shared.stats.state = PlayerState::Stopped;
        shared.current_ad = None;
        info!("player stopped");
    }

    pub fn pause(&self) {
        let mut shared = self.shared.write().expect("player state lock");
        if shared.state == PlayerState::Playing {
            shared.state = PlayerState::Paused;
            shared.stats.state = PlayerState::Paused;
            info!("player paused");
        }
    }

    pub fn resume(&self) {
        let mut shared = self.shared.write().expect("player state lock");
        if shared.state == PlayerState::Paused {
            shared.state = PlayerState::Playing;
            shared.stats.state = PlayerState::Playing;
            info!("player resumed");
        }
    }

    /// Feed a fresh manifest into the selector and reclaim media of ads no
    /// longer authorized.
    pub fn update_ads(&self, manifest: &AdManifest) {
        self.playlist.update(manifest);
        info!(
            total = self.playlist.count(),
            active = self.playlist.active_count(),
            "playlist updated"
        );

        if let Some(callback) = self.on_ads_updated.read().expect("callback lock").as_ref() {
            callback(manifest);
        }

        let downloader = Arc::clone(&self.downloader);
        let keep = manifest.ad_ids();
        tokio::spawn(async move {
            if let Err(e) = downloader.cleanup_old_media(&keep).await {
                warn!(error = %e, "media cleanup failed");
            }
        });
    }

    pub fn set_on_ads_updated(&self, callback: impl Fn(&AdManifest) + Send + Sync + 'static) {
        *self.on_ads_updated.write().expect("callback lock") = Some(Box::new(callback));
    }

    pub fn state(&self) -> PlayerState {
        self.shared.read().expect("player state lock").state
    }

    pub fn stats(&self) -> PlayerStats {
        self.shared.read().expect("player state lock").stats.clone()
    }

    pub fn current_ad(&self) -> Option<Ad> {
        self.shared
            .read()
            .expect("player state lock")
            .current_ad
            .clone()
    }

    pub fn playlist(&self) -> Arc<Playlist> {
        Arc::clone(&self.playlist)
    }
}

async fn playback_loop(
    playlist: Arc<Playlist>,
    scheduler: Scheduler,
    downloader: Arc<Downloader>,
    shared: Arc<RwLock<Shared>>,
    token: CancellationToken,
    mut manager: RendererManager,
) {
    let mut tick = tokio::time::interval(TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut started_at: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick.tick() => {}
        }

        let (state, current) = {
            let mut shared = shared.write().expect("player state lock");
            // A render failure leaves the error state visible for one tick
            // only; the loop then resumes with the next ad.
            if shared.state == PlayerState::Error {
                shared.state = PlayerState::Playing;
                shared.stats.state = PlayerState::Playing;
            }
            (shared.state, shared.current_ad.clone())
        };
        if state != PlayerState::Playing {
            continue;
        }

        let due = match (&current, started_at) {
            (Some(ad), Some(started)) => scheduler.should_transition(ad, started.elapsed()),
            _ => true,
        };
        if !due {
            continue;
        }

        set_state(&shared, PlayerState::Loading);

        let Some(ad) = playlist.next(Utc::now()) else {
            {
                let mut shared = shared.write().expect("player state lock");
                shared.current_ad = None;
                shared.state = PlayerState::Playing;
                shared.stats.state = PlayerState::Playing;
            }
            started_at = None;
            debug!("no active ads; idling");
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(IDLE_WAIT) => {}
            }
            continue;
        };

        let local_path = match downloader.ensure_local(&ad).await {
            Ok(path) => path,
            Err(e) => {
                warn!(ad = %ad.id, error = %e, "media unavailable");
                match downloader.cached_path(&ad) {
                    Some(path) => {
                        info!(ad = %ad.id, path = %path.display(), "falling back to cached media");
                        path
                    }
                    None => {
                        let mut shared = shared.write().expect("player state lock");
                        shared.state = PlayerState::Playing;
                        shared.stats.state = PlayerState::Playing;
                        shared.stats.last_error = Some(e.to_string());
                        warn!(ad = %ad.id, "skipping ad: no media available");
                        continue;
                    }
                }
            }
        };

        match manager.render(&ad, &local_path).await {
            Ok(()) => {
                {
                    let mut shared = shared.write().expect("player state lock");
                    shared.current_ad = Some(ad.clone());
                    shared.state = PlayerState::Playing;
                    shared.stats.state = PlayerState::Playing;
                    shared.stats.current_ad_id = Some(ad.id.clone());
                    shared.stats.current_ad_kind = Some(ad.kind.clone());
                    shared.stats.playback_started = Some(Utc::now());
                    shared.stats.total_ads_played += 1;
                }
                started_at = Some(Instant::now());
                info!(ad = %ad.id, kind = %ad.kind, "ad on screen");

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(scheduler.transition_delay()) => {}
                }
            }
            Err(e) => {
                warn!(ad = %ad.id, error = %e, "render failed; skipping ad");
                let mut shared = shared.write().expect("player state lock");
                shared.state = PlayerState::Error;
                shared.stats.state = PlayerState::Error;
                shared.stats.last_error = Some(e.to_string());
                shared.current_ad = None;
                started_at = None;
            }
        }
    }

    // No renderer child outlives the agent.
    manager.stop();
    debug!("playback loop exited");
}

fn set_state(shared: &RwLock<Shared>, state: PlayerState) {
    let mut shared = shared.write().expect("player state lock");
    shared.state = state;
    shared.stats.state = state;
}
