//! Text ads rendered as a framed block on standard output.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::player::renderer::{Renderer, RendererStatus};
use crate::{Ad, Result};

pub struct TextRenderer {
    status: RendererStatus,
}

impl TextRenderer {
    pub fn new() -> Self {
        Self {
            status: RendererStatus::default(),
        }
    }

    /// File contents, falling back to the ad title, falling back to its id.
    fn content_for(ad: &Ad, local_path: &Path) -> String {
        if let Ok(contents) = std::fs::read_to_string(local_path) {
            return contents;
        }
        ad.title
            .clone()
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| ad.id.clone())
    }

    fn display(ad: &Ad, content: &str) {
        println!("\n{}", "=".repeat(80));
        println!("TEXT AD: {}", ad.id);
        if let Some(title) = ad.title.as_deref().filter(|t| !t.is_empty()) {
            println!("Title: {title}");
        }
        println!("{}", "-".repeat(80));
        println!("{content}");
        println!("{}\n", "=".repeat(80));
    }
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Renderer for TextRenderer {
    fn can_render(&self, ad: &Ad) -> bool {
        ad.kind.eq_ignore_ascii_case("text")
    }

    async fn render(&mut self, ad: &Ad, local_path: &Path) -> Result<()> {
        self.stop();

        let content = Self::content_for(ad, local_path);
        Self::display(ad, &content);
        info!(ad = %ad.id, "text ad displayed");

        self.status = RendererStatus {
            is_playing: true,
            last_error: None,
        };
        Ok(())
    }

    fn stop(&mut self) {
        self.status.is_playing = false;
    }

    fn status(&self) -> RendererStatus {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn text_ad(title: Option<&str>) -> Ad {
        Ad {
            id: "ad-t".into(),
            title: title.map(Into::into),
            kind: "text".into(),
            content_url: "http://cdn/copy.txt".into(),
            duration: None,
            start_time: None,
            end_time: None,
            priority: None,
            metadata: None,
        }
    }

    #[test]
    fn reads_content_from_file_when_present() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("copy.txt");
        std::fs::write(&file, "Grand opening!").expect("write");

        let content = TextRenderer::content_for(&text_ad(Some("Title")), &file);
        assert_eq!(content, "Grand opening!");
    }

    #[test]
    fn falls_back_to_title_then_id() {
        let missing = Path::new("/does/not/exist.txt");
        assert_eq!(
            TextRenderer::content_for(&text_ad(Some("Sale today")), missing),
            "Sale today"
        );
        assert_eq!(TextRenderer::content_for(&text_ad(None), missing), "ad-t");
    }

    #[tokio::test]
    async fn render_always_succeeds_and_flags_playing() {
        let mut renderer = TextRenderer::new();
        let ad = text_ad(Some("Sale"));
        renderer
            .render(&ad, Path::new("/does/not/exist.txt"))
            .await
            .expect("text render");
        assert!(renderer.status().is_playing);

        renderer.stop();
        assert!(!renderer.status().is_playing);
    }
}
