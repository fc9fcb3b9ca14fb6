//! Fullscreen video playback through an external player.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::info;

use crate::player::renderer::{Renderer, RendererStatus};
use crate::{Ad, AgentError, Result};

use super::{find_viewer, kill_child, require_file, spawn_viewer};

const CANDIDATES: &[&str] = &["mpv", "vlc", "ffplay", "xdg-open"];
const TYPE_TAGS: &[&str] = &["video", "mp4", "webm", "mov", "avi"];

pub struct VideoRenderer {
    player: Option<String>,
    child: Option<Child>,
    status: RendererStatus,
}

impl VideoRenderer {
    pub fn new() -> Self {
        Self {
            player: find_viewer(CANDIDATES),
            child: None,
            status: RendererStatus::default(),
        }
    }
}

impl Default for VideoRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Renderer for VideoRenderer {
    fn can_render(&self, ad: &Ad) -> bool {
        TYPE_TAGS.contains(&ad.kind.to_ascii_lowercase().as_str())
    }

    async fn render(&mut self, ad: &Ad, local_path: &Path) -> Result<()> {
        self.stop();

        let Some(player) = self.player.clone() else {
            return Err(AgentError::ViewerUnavailable("video".into()));
        };
        require_file(local_path)?;

        let target = local_path.to_string_lossy();
        let child = match player.as_str() {
            "mpv" => spawn_viewer("mpv", &["--fullscreen", "--loop=no"], &target),
            "vlc" => spawn_viewer("vlc", &["--fullscreen", "--no-loop"], &target),
            "ffplay" => spawn_viewer("ffplay", &["-fs", "-autoexit"], &target),
            _ => spawn_viewer("xdg-open", &[], &target),
        };

        match child {
            Ok(child) => {
                info!(ad = %ad.id, %player, "video player started");
                self.child = Some(child);
                self.status = RendererStatus {
                    is_playing: true,
                    last_error: None,
                };
                Ok(())
            }
            Err(e) => {
                self.status.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        kill_child(&mut self.child);
        self.status.is_playing = false;
    }

    fn status(&self) -> RendererStatus {
        self.status.clone()
    }
}
