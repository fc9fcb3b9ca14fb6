//! Fullscreen image display through an external viewer.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::info;

use crate::player::renderer::{Renderer, RendererStatus};
use crate::{Ad, AgentError, Result};

use super::{find_viewer, kill_child, require_file, spawn_viewer};

const CANDIDATES: &[&str] = &["feh", "imv", "sxiv", "xdg-open"];
const TYPE_TAGS: &[&str] = &["image", "jpg", "jpeg", "png", "gif", "webp"];

pub struct ImageRenderer {
    viewer: Option<String>,
    child: Option<Child>,
    status: RendererStatus,
}

impl ImageRenderer {
    pub fn new() -> Self {
        Self {
            viewer: find_viewer(CANDIDATES),
            child: None,
            status: RendererStatus::default(),
        }
    }
}

impl Default for ImageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Renderer for ImageRenderer {
    fn can_render(&self, ad: &Ad) -> bool {
        TYPE_TAGS.contains(&ad.kind.to_ascii_lowercase().as_str())
    }

    async fn render(&mut self, ad: &Ad, local_path: &Path) -> Result<()> {
        self.stop();

        let Some(viewer) = self.viewer.clone() else {
            return Err(AgentError::ViewerUnavailable("image".into()));
        };
        require_file(local_path)?;

        let target = local_path.to_string_lossy();
        let child = match viewer.as_str() {
            "feh" => spawn_viewer("feh", &["--fullscreen", "--auto-zoom"], &target),
            "imv" => spawn_viewer("imv", &["-f"], &target),
            "sxiv" => spawn_viewer("sxiv", &["-f"], &target),
            _ => spawn_viewer("xdg-open", &[], &target),
        };

        match child {
            Ok(child) => {
                info!(ad = %ad.id, %viewer, "image viewer started");
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
