//! Browser rendering strategy.
//!
//! Launches an isolated session per request, navigates, lets the
//! [`CaptchaGuard`] deal with challenges, scrolls to wake lazy loaders and
//! captures the final markup together with the API responses observed on the
//! way. The session and its profile directory are torn down on every path.

pub mod chrome;
pub mod session;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::captcha::{CapSolverClient, CaptchaGuard, ChallengeState, TokenSolver};
use crate::config::AcquirerConfig;
use crate::error::FetchError;
use crate::interceptor::{self, NetworkInterceptor, ObservedResponse};
use crate::models::FetchRequest;
use crate::sanitizer::visible_text_len;
use crate::stealth;

pub use chrome::{ChromeLauncher, ChromeSession};
pub use session::{LaunchPlan, PageSession, ProfileDir, SessionLauncher};

const DEFAULT_LOCALE: &str = "en-US";

/// Where a render is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Init,
    Navigating,
    ChallengeDetected,
    BypassAttempt,
    Stabilizing,
    Scrolling,
    Capturing,
    Done,
    Failed,
}

/// Raw rendered markup plus what was captured alongside it.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub markup: String,
    /// Serialized capture array, `""` when nothing was kept.
    pub api_payload: String,
    pub challenge: Option<ChallengeState>,
    /// Phases visited, in order.
    pub phases: Vec<RenderPhase>,
}

/// The expensive strategy: a real browser.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, request: &FetchRequest) -> Result<RenderOutput, FetchError>;
}

#[derive(Debug, Default)]
struct PhaseLog(Vec<RenderPhase>);

impl PhaseLog {
    fn enter(&mut self, phase: RenderPhase) {
        debug!("render phase -> {:?}", phase);
        self.0.push(phase);
    }
}

pub struct RenderedFetcher {
    config: AcquirerConfig,
    launcher: Arc<dyn SessionLauncher>,
    guard: CaptchaGuard,
}

impl RenderedFetcher {
    /// Chromium-backed renderer; the paid solver is wired in when a key is configured.
    pub fn new(config: AcquirerConfig) -> anyhow::Result<Self> {
        let solver = CapSolverClient::from_config(&config)?.map(|c| Arc::new(c) as Arc<dyn TokenSolver>);
        Ok(Self::with_launcher(config, Arc::new(ChromeLauncher), solver))
    }

    pub fn with_launcher(
        config: AcquirerConfig,
        launcher: Arc<dyn SessionLauncher>,
        solver: Option<Arc<dyn TokenSolver>>,
    ) -> Self {
        let guard = CaptchaGuard::new(config.bypass.clone(), solver);
        Self { config, launcher, guard }
    }

    fn plan(&self, request: &FetchRequest, profile_dir: &Path) -> LaunchPlan {
        LaunchPlan {
            headless: request.headless || self.config.server_mode,
            low_memory: self.config.server_mode,
            viewport: stealth::random_viewport(),
            user_agent: stealth::random_chromium_user_agent().to_string(),
            profile_dir: profile_dir.to_path_buf(),
            chromium_path: self.config.chromium_path.clone(),
            navigation_timeout: self.config.render.navigation_timeout,
            locale: DEFAULT_LOCALE.to_string(),
            timezone: self.config.timezone.clone(),
        }
    }

    async fn launch(&self, plan: &LaunchPlan, observer: &interceptor::ResponseObserver) -> Result<Box<dyn PageSession>, FetchError> {
        let attempts = if self.config.server_mode {
            1 + self.config.launch_retries
        } else {
            1
        };

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.launcher.launch(plan, observer.clone()) {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!("❌ Browser launch attempt {}/{} failed: {:#}", attempt, attempts, e);
                    last_error = format!("{:#}", e);
                }
            }
            if attempt < attempts {
                sleep(self.config.render.launch_retry_wait).await;
            }
        }
        Err(FetchError::Launch(last_error))
    }

    async fn drive(
        &self,
        session: &dyn PageSession,
        request: &FetchRequest,
        responses: &mut UnboundedReceiver<ObservedResponse>,
        phases: &mut PhaseLog,
    ) -> Result<(String, String, Option<ChallengeState>), FetchError> {
        let timings = &self.config.render;

        phases.enter(RenderPhase::Navigating);
        if let Err(e) = session.navigate(&request.url) {
            warn!("⚠️ Navigation incomplete, continuing with partial content: {:#}", e);
        }

        let mut challenge = None;
        let landed = session.content().unwrap_or_default();
        if let Some(mut state) = self.guard.detect(&landed) {
            phases.enter(RenderPhase::ChallengeDetected);
            info!("⚠️ Challenge detected: {} (site key: {:?})", state.family, state.site_key);

            phases.enter(RenderPhase::BypassAttempt);
            if self.guard.bypass(&mut state, session, &request.url).await {
                phases.enter(RenderPhase::Navigating);
            } else {
                warn!("⚠️ Challenge not bypassed, proceeding with partial content");
            }
            challenge = Some(state);
        }

        phases.enter(RenderPhase::Stabilizing);
        info!("⏳ Waiting for page to stabilize...");
        sleep(timings.stabilize).await;

        phases.enter(RenderPhase::Scrolling);
        let steps = if request.deep_scroll {
            timings.deep_scroll_steps
        } else {
            timings.scroll_steps
        };
        info!("⬇️ Scrolling {} steps to wake up the page...", steps);
        for _ in 0..steps {
            if let Err(e) = session.scroll_by(timings.scroll_step_px) {
                debug!("Scroll step failed: {}", e);
            }
            sleep(stealth::scroll_pause(timings.scroll_pause_min, timings.scroll_pause_max)).await;
        }

        let current_len = session.content().map(|m| m.chars().count()).unwrap_or(0);
        if current_len < self.config.thin_page_threshold {
            info!("⚠️ Page looks empty ({} chars). Waiting longer...", current_len);
            sleep(timings.thin_page_wait).await;
        }

        phases.enter(RenderPhase::Capturing);
        let markup = session
            .content()
            .map_err(|e| FetchError::Render(format!("{:#}", e)))?;

        let mut capture = NetworkInterceptor::new(request.api_budget, self.config.dedupe_api_responses);
        let kept = capture
            .drain(responses, timings.drain_window, |observed| {
                session.response_body(&observed.request_id)
            })
            .await;
        if kept > 0 {
            info!("📡 Captured {} API responses", kept);
        }

        if visible_text_len(&markup) == 0 {
            return Err(FetchError::BlankPage);
        }

        info!("✅ Captured {} chars", markup.chars().count());
        Ok((markup, capture.payload(), challenge))
    }
}

#[async_trait]
impl PageRenderer for RenderedFetcher {
    async fn render(&self, request: &FetchRequest) -> Result<RenderOutput, FetchError> {
        let mut phases = PhaseLog::default();
        phases.enter(RenderPhase::Init);

        let mut profile =
            ProfileDir::create().map_err(|e| FetchError::Launch(format!("creating profile dir: {}", e)))?;
        let plan = self.plan(request, profile.path());
        let (observer, mut responses) = interceptor::channel();

        let session = match self.launch(&plan, &observer).await {
            Ok(session) => session,
            Err(e) => {
                phases.enter(RenderPhase::Failed);
                profile.dispose();
                return Err(e);
            }
        };

        let outcome = self.drive(session.as_ref(), request, &mut responses, &mut phases).await;

        if let Err(e) = session.close() {
            warn!("⚠️ Session close failed: {}", e);
        }
        profile.dispose();

        match outcome {
            Ok((markup, api_payload, challenge)) => {
                phases.enter(RenderPhase::Done);
                Ok(RenderOutput {
                    markup,
                    api_payload,
                    challenge,
                    phases: phases.0,
                })
            }
            Err(e) => {
                phases.enter(RenderPhase::Failed);
                Err(e)
            }
        }
    }
}
