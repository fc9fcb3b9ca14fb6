//! Concrete renderers, one per content category.
//!
//! Each renderer resolves its viewer executable from PATH once at
//! construction and drives at most one child process at a time. Children
//! inherit the parent's standard streams and are killed on stop; their
//! exit status never drives playback (the scheduler advances ads purely on
//! wall-clock duration).

pub mod html;
pub mod image;
pub mod text;
pub mod video;

pub use html::HtmlRenderer;
pub use image::ImageRenderer;
pub use text::TextRenderer;
pub use video::VideoRenderer;

use std::path::{Path, PathBuf};

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::{AgentError, Result};

/// First candidate with an executable present on PATH.
pub fn find_viewer(candidates: &[&str]) -> Option<String> {
    let path = std::env::var_os("PATH")?;
    for candidate in candidates {
        for dir in std::env::split_paths(&path) {
            if is_executable(&dir.join(candidate)) {
                return Some((*candidate).to_string());
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Spawn a viewer with the media path (or URL) as the final positional
/// argument. Standard streams are inherited.
pub(crate) fn spawn_viewer(program: &str, args: &[&str], target: &str) -> Result<Child> {
    debug!(%program, ?args, %target, "spawning viewer");
    Command::new(program)
        .args(args)
        .arg(target)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AgentError::Render(format!("failed to start {program}: {e}")))
}

/// Kill the child if one is alive and reap it in the background.
pub(crate) fn kill_child(child: &mut Option<Child>) {
    if let Some(mut child) = child.take() {
        if let Err(e) = child.start_kill() {
            warn!(error = %e, "failed to kill viewer process");
        }
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
    }
}

/// Reject paths that do not point at an existing regular file before
/// handing them to a viewer.
pub(crate) fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AgentError::LocalMissing(PathBuf::from(path)))
    }
}
