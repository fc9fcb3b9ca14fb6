//! Renderer dispatch: a registry of per-category renderers, with at most
//! one viewer child alive across all of them at any moment.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::player::renderers::{HtmlRenderer, ImageRenderer, TextRenderer, VideoRenderer};
use crate::{Ad, AgentError, Result};

#[derive(Debug, Clone, Default)]
pub struct RendererStatus {
    pub is_playing: bool,
    pub last_error: Option<String>,
}

/// A recipe for displaying one category of ad content.
#[async_trait]
pub trait Renderer: Send {
    /// Whether this renderer handles the ad's type tag.
    fn can_render(&self, ad: &Ad) -> bool;

    /// Display the ad from its local media path. Any previous child of this
    /// renderer is stopped first.
    async fn render(&mut self, ad: &Ad, local_path: &Path) -> Result<()>;

    /// Terminate the in-flight child, if any. Never blocks on the child's
    /// exit.
    fn stop(&mut self);

    fn status(&self) -> RendererStatus;
}

pub struct RendererManager {
    renderers: Vec<Box<dyn Renderer>>,
    current: Option<usize>,
}

impl RendererManager {
    pub fn new() -> Self {
        Self {
            renderers: vec![
                Box::new(ImageRenderer::new()),
                Box::new(VideoRenderer::new()),
                Box::new(HtmlRenderer::new()),
                Box::new(TextRenderer::new()),
            ],
            current: None,
        }
    }

    /// Dispatch to the first renderer accepting the ad's type, stopping the
    /// previous one first so only one child is ever alive.
    pub async fn render(&mut self, ad: &Ad, local_path: &Path) -> Result<()> {
        self.stop();

        let index = self
            .renderers
            .iter()
            .position(|renderer| renderer.can_render(ad))
            .ok_or_else(|| AgentError::NoRenderer(ad.kind.clone()))?;

        debug!(ad = %ad.id, kind = %ad.kind, "dispatching renderer");
        self.current = Some(index);
        self.renderers[index].render(ad, local_path).await
    }

    pub fn stop(&mut self) {
        if let Some(index) = self.current.take() {
            self.renderers[index].stop();
        }
    }

    pub fn status(&self) -> RendererStatus {
        self.current
            .map(|index| self.renderers[index].status())
            .unwrap_or_default()
    }
}

impl Default for RendererManager {
    fn default() -> Self {
        Self::new()
    }
}
