//! Browser-session seam used by the render pipeline and the bypass chain.
//!
//! [`PageSession`] is the handful of page operations the pipeline needs;
//! [`SessionLauncher`] starts one from a [`LaunchPlan`]. The Chromium
//! implementation lives in `render::chrome`; tests drive the pipeline with
//! scripted fakes.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::interceptor::ResponseObserver;

const PROFILE_PREFIX: &str = "page-acquirer-profile-";
const DISPOSE_RETRIES: u32 = 3;
const DISPOSE_RETRY_WAIT: Duration = Duration::from_millis(100);

/// Everything needed to start one isolated browser session.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub headless: bool,
    /// Extra flags for constrained server hosts.
    pub low_memory: bool,
    pub viewport: (u32, u32),
    pub user_agent: String,
    pub profile_dir: PathBuf,
    pub chromium_path: Option<PathBuf>,
    pub navigation_timeout: Duration,
    pub locale: String,
    pub timezone: Option<String>,
}

/// An open page in a launched browser.
///
/// Methods are blocking (the CDP client is synchronous); navigation errors
/// are reported but the session stays usable.
pub trait PageSession: Send + Sync {
    fn navigate(&self, url: &str) -> Result<()>;

    fn reload(&self) -> Result<()>;

    /// Current serialized DOM.
    fn content(&self) -> Result<String>;

    fn evaluate(&self, script: &str) -> Result<Option<Value>>;

    /// Call `function_declaration` with `args` bound as real arguments.
    fn call_with_args(&self, function_declaration: &str, args: Vec<Value>) -> Result<()>;

    /// One wheel step of `delta_y` pixels.
    fn scroll_by(&self, delta_y: f64) -> Result<()>;

    /// Body of an observed response, `None` if evicted or binary.
    fn response_body(&self, request_id: &str) -> Option<String>;

    /// Tear the session down; the browser process is gone when this returns.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Starts sessions. `observer` receives every network response the page sees.
pub trait SessionLauncher: Send + Sync {
    fn launch(&self, plan: &LaunchPlan, observer: ResponseObserver) -> Result<Box<dyn PageSession>>;
}

/// Disposable browser profile directory, never reused across sessions.
///
/// Call [`ProfileDir::dispose`] once the browser is closed; `Drop` does the
/// same as a fallback on early-exit paths.
#[derive(Debug)]
pub struct ProfileDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ProfileDir {
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(PROFILE_PREFIX).tempdir()?;
        let path = dir.path().to_path_buf();
        Ok(Self { dir: Some(dir), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory. Chromium may still be flushing files right after
    /// exit, so removal is retried a few times before giving up with a warning.
    pub fn dispose(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let mut last_error = match dir.close() {
            Ok(()) => return,
            Err(e) => e,
        };

        for attempt in 1..=DISPOSE_RETRIES {
            std::thread::sleep(DISPOSE_RETRY_WAIT);
            match std::fs::remove_dir_all(&self.path) {
                Ok(()) => {
                    debug!("🧹 Profile dir removed on retry {}", attempt);
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => return,
                Err(e) => last_error = e,
            }
        }
        warn!("⚠️ Could not delete profile dir {}: {}", self.path.display(), last_error);
    }
}

impl Drop for ProfileDir {
    fn drop(&mut self) {
        self.dispose();
    }
}
