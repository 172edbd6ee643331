//! Acquisition configuration.
//!
//! Every tunable lives in an explicit struct handed to `ContentAcquirer::new`,
//! so concurrent acquirers with different settings never interfere.
//! `from_env` reads the deployment environment once; nothing here is global.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_CONTENT_CHARS: usize = 300_000;
pub const DEFAULT_API_BUDGET: usize = 50_000;
pub const DEFAULT_SPA_THRESHOLD: usize = 500;
pub const DEFAULT_THIN_PAGE_THRESHOLD: usize = 2_000;
pub const DEFAULT_CAPSOLVER_ENDPOINT: &str = "https://api.capsolver.com";

/// Top-level settings for `ContentAcquirer`.
#[derive(Debug, Clone)]
pub struct AcquirerConfig {
    /// Hard cap on `FetchResult::content`, in chars.
    pub max_content_chars: usize,
    /// Hard cap on the serialized intercepted-API payload, in bytes.
    pub api_budget: usize,
    /// Direct results with fewer visible chars than this are treated as
    /// client-rendered and escalated to the browser.
    pub spa_threshold: usize,
    /// Rendered markup shorter than this gets an extra wait before capture.
    pub thin_page_threshold: usize,
    pub direct_timeout: Duration,
    /// Skip the direct strategy entirely.
    pub force_browser: bool,
    /// Server deployment: forced headless, low-memory flags, launch retries.
    pub server_mode: bool,
    pub launch_retries: u32,
    pub chromium_path: Option<PathBuf>,
    pub timezone: Option<String>,
    /// Keep only the first capture per origin URL.
    pub dedupe_api_responses: bool,
    /// Paid-solver credential; the paid bypass step is skipped when unset.
    pub solver_api_key: Option<String>,
    pub solver_endpoint: String,
    pub render: RenderTimings,
    pub bypass: BypassTimings,
    pub solver: SolverTimings,
}

impl Default for AcquirerConfig {
    fn default() -> Self {
        Self {
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            api_budget: DEFAULT_API_BUDGET,
            spa_threshold: DEFAULT_SPA_THRESHOLD,
            thin_page_threshold: DEFAULT_THIN_PAGE_THRESHOLD,
            direct_timeout: Duration::from_secs(10),
            force_browser: false,
            server_mode: false,
            launch_retries: 2,
            chromium_path: None,
            timezone: None,
            dedupe_api_responses: true,
            solver_api_key: None,
            solver_endpoint: DEFAULT_CAPSOLVER_ENDPOINT.to_string(),
            render: RenderTimings::default(),
            bypass: BypassTimings::default(),
            solver: SolverTimings::default(),
        }
    }
}

impl AcquirerConfig {
    /// Build a config from the process environment (call `dotenv().ok()` first).
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let chromium_path = non_empty_var("CHROMIUM_PATH").map(PathBuf::from);
        // Render-style hosting sets RENDER; a pinned Chromium also means a container.
        let server_mode = non_empty_var("RENDER").is_some() || chromium_path.is_some();

        let mut render = RenderTimings::default();
        render.navigation_timeout =
            Duration::from_secs(env_or("ACQUIRER_NAV_TIMEOUT_SECS", render.navigation_timeout.as_secs()));

        Self {
            max_content_chars: env_or("ACQUIRER_MAX_CONTENT_CHARS", defaults.max_content_chars),
            api_budget: env_or("ACQUIRER_API_BUDGET", defaults.api_budget),
            spa_threshold: env_or("ACQUIRER_SPA_THRESHOLD", defaults.spa_threshold),
            thin_page_threshold: env_or("ACQUIRER_THIN_PAGE_THRESHOLD", defaults.thin_page_threshold),
            direct_timeout: Duration::from_secs(env_or(
                "ACQUIRER_DIRECT_TIMEOUT_SECS",
                defaults.direct_timeout.as_secs(),
            )),
            force_browser: env_flag("ACQUIRER_FORCE_BROWSER", defaults.force_browser),
            server_mode,
            launch_retries: env_or("ACQUIRER_LAUNCH_RETRIES", defaults.launch_retries),
            chromium_path,
            timezone: non_empty_var("ACQUIRER_TIMEZONE"),
            dedupe_api_responses: env_flag("ACQUIRER_DEDUPE_API_RESPONSES", defaults.dedupe_api_responses),
            solver_api_key: non_empty_var("CAPSOLVER_API_KEY"),
            solver_endpoint: non_empty_var("CAPSOLVER_ENDPOINT").unwrap_or(defaults.solver_endpoint),
            render,
            bypass: BypassTimings::default(),
            solver: SolverTimings::default(),
        }
    }

    /// All waits collapsed to zero; for driving the pipeline with fakes.
    pub fn without_delays(mut self) -> Self {
        self.render = RenderTimings::immediate();
        self.bypass = BypassTimings::immediate();
        self.solver = SolverTimings::immediate();
        self
    }
}

/// Waits and step counts used by the rendering pipeline.
#[derive(Debug, Clone)]
pub struct RenderTimings {
    pub navigation_timeout: Duration,
    /// Settle time after navigation, before scrolling.
    pub stabilize: Duration,
    pub scroll_steps: u32,
    pub deep_scroll_steps: u32,
    pub scroll_step_px: f64,
    pub scroll_pause_min: Duration,
    pub scroll_pause_max: Duration,
    pub thin_page_wait: Duration,
    /// Upper bound on the post-scroll interception drain.
    pub drain_window: Duration,
    pub launch_retry_wait: Duration,
}

impl Default for RenderTimings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            stabilize: Duration::from_secs(3),
            scroll_steps: 4,
            deep_scroll_steps: 10,
            scroll_step_px: 400.0,
            scroll_pause_min: Duration::from_millis(500),
            scroll_pause_max: Duration::from_millis(1200),
            thin_page_wait: Duration::from_secs(5),
            drain_window: Duration::from_secs(2),
            launch_retry_wait: Duration::from_secs(1),
        }
    }
}

impl RenderTimings {
    pub fn immediate() -> Self {
        Self {
            stabilize: Duration::ZERO,
            scroll_pause_min: Duration::ZERO,
            scroll_pause_max: Duration::ZERO,
            thin_page_wait: Duration::ZERO,
            drain_window: Duration::from_millis(50),
            launch_retry_wait: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Waits used by the free bypass strategies.
#[derive(Debug, Clone)]
pub struct BypassTimings {
    pub js_poll_attempts: u32,
    pub js_poll_interval: Duration,
    /// Wait after the single reload of the JS-challenge path.
    pub js_reload_wait: Duration,
    /// Settle time after the stealth reload of the other families.
    pub stealth_reload_wait: Duration,
    /// Pause after token injection so callbacks can run.
    pub token_settle: Duration,
}

impl Default for BypassTimings {
    fn default() -> Self {
        Self {
            js_poll_attempts: 3,
            js_poll_interval: Duration::from_secs(5),
            js_reload_wait: Duration::from_secs(5),
            stealth_reload_wait: Duration::from_secs(3),
            token_settle: Duration::from_millis(1500),
        }
    }
}

impl BypassTimings {
    pub fn immediate() -> Self {
        Self {
            js_poll_interval: Duration::ZERO,
            js_reload_wait: Duration::ZERO,
            stealth_reload_wait: Duration::ZERO,
            token_settle: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Polling schedule for the paid solver (30 x 4s = 2 minute ceiling).
#[derive(Debug, Clone)]
pub struct SolverTimings {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for SolverTimings {
    fn default() -> Self {
        Self {
            poll_attempts: 30,
            poll_interval: Duration::from_secs(4),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl SolverTimings {
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    non_empty_var(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Boolean switches; unrecognised values keep the default.
fn env_flag(key: &str, default: bool) -> bool {
    non_empty_var(key).and_then(|v| parse_flag(&v)).unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
