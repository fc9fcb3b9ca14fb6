//! HTML display: a loopback HTTP server plus a kiosk-mode browser.
//!
//! The embedded server binds 127.0.0.1:8081 and serves exactly one file.
//! If the port is occupied the render fails; there is no port scan. The
//! server is torn down together with the browser child on stop.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::player::renderer::{Renderer, RendererStatus};
use crate::{Ad, AgentError, Result};

use super::{find_viewer, kill_child, require_file, spawn_viewer};

const CANDIDATES: &[&str] = &["firefox", "chromium", "chrome", "xdg-open"];
pub const SERVER_PORT: u16 = 8081;

pub struct HtmlRenderer {
    browser: Option<String>,
    child: Option<Child>,
    server: Option<JoinHandle<()>>,
    status: RendererStatus,
}

impl HtmlRenderer {
    pub fn new() -> Self {
        Self {
            browser: find_viewer(CANDIDATES),
            child: None,
            server: None,
            status: RendererStatus::default(),
        }
    }

    /// Bind the loopback server and start serving the file in the
    /// background.
    async fn start_server(&mut self, file: PathBuf) -> Result<String> {
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], SERVER_PORT));
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            AgentError::Render(format!("failed to bind loopback port {SERVER_PORT}: {e}"))
        })?;

        let app = Router::new()
            .route("/", get(serve_file))
            .with_state(file);
        self.server = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "embedded HTML server error");
            }
        }));

        // Let the server settle before pointing a browser at it.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok(format!("http://127.0.0.1:{SERVER_PORT}"))
    }
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self::new()
    }
}

async fn serve_file(State(file): State<PathBuf>) -> Html<String> {
    match tokio::fs::read_to_string(&file).await {
        Ok(contents) => Html(contents),
        Err(e) => {
            warn!(path = %file.display(), error = %e, "failed to serve HTML file");
            Html(String::new())
        }
    }
}

#[async_trait]
impl Renderer for HtmlRenderer {
    fn can_render(&self, ad: &Ad) -> bool {
        ad.kind.eq_ignore_ascii_case("html")
    }

    async fn render(&mut self, ad: &Ad, local_path: &Path) -> Result<()> {
        self.stop();

        let Some(browser) = self.browser.clone() else {
            return Err(AgentError::ViewerUnavailable("html".into()));
        };
        require_file(local_path)?;

        let url = self.start_server(local_path.to_path_buf()).await?;

        let child = match browser.as_str() {
            "firefox" => spawn_viewer("firefox", &["--kiosk"], &url),
            "chromium" | "chrome" => spawn_viewer(&browser, &["--kiosk"], &url),
            _ => spawn_viewer("xdg-open", &[], &url),
        };

        match child {
            Ok(child) => {
                info!(ad = %ad.id, %browser, %url, "browser started");
                self.child = Some(child);
                self.status = RendererStatus {
                    is_playing: true,
                    last_error: None,
                };
                Ok(())
            }
            Err(e) => {
                self.stop();
                self.status.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        kill_child(&mut self.child);
        if let Some(server) = self.server.take() {
            server.abort();
        }
        self.status.is_playing = false;
    }

    fn status(&self) -> RendererStatus {
        self.status.clone()
    }
}
