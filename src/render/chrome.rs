//! Chromium sessions over the DevTools protocol (`headless_chrome`).

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use headless_chrome::protocol::cdp::Network::{self, events::ResponseReceivedEventParams, GetResponseBodyReturnObject};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::session::{LaunchPlan, PageSession, SessionLauncher};
use crate::interceptor::{ObservedResponse, ResponseObserver};
use crate::stealth;

const CAPTURE_HANDLER: &str = "page-acquirer-capture";
/// Paid solving can keep the page idle for two minutes.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(300);

/// Launches a fresh Chromium process per session.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher;

impl SessionLauncher for ChromeLauncher {
    fn launch(&self, plan: &LaunchPlan, observer: ResponseObserver) -> Result<Box<dyn PageSession>> {
        let mut flags = stealth::launch_args(&plan.user_agent, plan.low_memory);
        if plan.headless {
            // new headless mode is much harder to fingerprint than the old one
            flags.push("--headless=new".to_string());
        }
        let args: Vec<&OsStr> = flags.iter().map(OsStr::new).collect();

        let browser = Browser::new(LaunchOptions {
            headless: false, // controlled through --headless=new
            window_size: Some(plan.viewport),
            user_data_dir: Some(plan.profile_dir.clone()),
            path: plan.chromium_path.clone(),
            idle_browser_timeout: IDLE_BROWSER_TIMEOUT,
            args,
            ..Default::default()
        })
        .context("launching chromium")?;

        let tab = browser.new_tab().context("opening tab")?;
        tab.set_default_timeout(plan.navigation_timeout);

        tab.enable_debugger()?;
        tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
            source: stealth::EVASION_SCRIPT.to_string(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })?;

        if let Err(e) = stealth::apply_locale_overrides(&tab, &plan.locale, plan.timezone.as_deref()) {
            warn!("⚠️ Failed to apply locale overrides: {}", e);
        }

        let on_response = move |params: ResponseReceivedEventParams,
                                _fetch_body: &dyn Fn() -> Result<GetResponseBodyReturnObject>| {
            let observed = ObservedResponse {
                request_id: params.request_id.clone(),
                url: params.response.url.clone(),
                mime_type: params.response.mime_type.clone(),
                status: params.response.status as u16,
            };
            // receiver gone means capture already finished
            let _ = observer.send(observed);
        };
        tab.register_response_handling(CAPTURE_HANDLER, Box::new(on_response))
            .context("attaching response observer")?;

        info!(
            "🕵️ Chromium session up ({}x{}, headless: {})",
            plan.viewport.0, plan.viewport.1, plan.headless
        );
        Ok(Box::new(ChromeSession { tab, browser }))
    }
}

/// One tab in its own browser process. Dropping it kills the process.
pub struct ChromeSession {
    tab: Arc<Tab>,
    browser: Browser,
}

impl PageSession for ChromeSession {
    fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .with_context(|| format!("navigating to {}", url))?
            .wait_until_navigated()
            .context("waiting for navigation")?;
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        self.tab.reload(false, None)?.wait_until_navigated()?;
        Ok(())
    }

    fn content(&self) -> Result<String> {
        self.tab.get_content()
    }

    fn evaluate(&self, script: &str) -> Result<Option<Value>> {
        Ok(self.tab.evaluate(script, false)?.value)
    }

    fn call_with_args(&self, function_declaration: &str, args: Vec<Value>) -> Result<()> {
        let root = self.tab.find_element("html")?;
        root.call_js_fn(function_declaration, args, false)?;
        Ok(())
    }

    fn scroll_by(&self, delta_y: f64) -> Result<()> {
        stealth::wheel_scroll(&self.tab, delta_y)
    }

    fn response_body(&self, request_id: &str) -> Option<String> {
        let body = self
            .tab
            .call_method(Network::GetResponseBody {
                request_id: request_id.to_string(),
            })
            .map_err(|e| debug!("No body for {}: {}", request_id, e))
            .ok()?;
        // base64 bodies are binary payloads, never JSON
        (!body.base_64_encoded).then_some(body.body)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let ChromeSession { tab, browser } = *self;
        if let Err(e) = tab.close(true) {
            debug!("Tab close failed: {}", e);
        }
        drop(tab);
        drop(browser);
        Ok(())
    }
}
