//! Escalating, cheapest-first bypass chain.
//!
//! 1. JS interstitials: re-assert the evasion overrides and wait them out,
//!    with a single reload as the last free try.
//! 2. Everything else: one stealth reload and a re-check.
//! 3. Paid solver, when a credential is configured; the token is passed to
//!    the page as a function argument, never spliced into script text.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::solver::{SolveTask, TokenSolver};
use super::{any_challenge_present, detect, ChallengeFamily, ChallengeOutcome, ChallengeState};
use crate::config::BypassTimings;
use crate::render::session::PageSession;
use crate::stealth::EVASION_SCRIPT;

/// Fills every known response carrier with `token` and fires any callbacks
/// the page registered with the checkbox widget.
pub const TOKEN_INJECTION_FN: &str = r#"function (token) {
    var carriers = [
        '#g-recaptcha-response',
        '[name="g-recaptcha-response"]',
        '[name="h-captcha-response"]',
        '[name="cf-turnstile-response"]'
    ];
    carriers.forEach(function (selector) {
        document.querySelectorAll(selector).forEach(function (el) {
            el.style.display = 'block';
            el.value = token;
        });
    });
    if (typeof ___grecaptcha_cfg !== 'undefined' && ___grecaptcha_cfg.clients) {
        var clients = ___grecaptcha_cfg.clients;
        for (var id in clients) {
            for (var key in clients[id]) {
                var client = clients[id][key];
                if (client && typeof client.callback === 'function') {
                    client.callback(token);
                }
            }
        }
    }
}"#;

/// Detects challenges and drives a [`ChallengeState`] to a terminal outcome.
pub struct CaptchaGuard {
    timings: BypassTimings,
    solver: Option<Arc<dyn TokenSolver>>,
}

impl CaptchaGuard {
    pub fn new(timings: BypassTimings, solver: Option<Arc<dyn TokenSolver>>) -> Self {
        Self { timings, solver }
    }

    pub fn has_solver(&self) -> bool {
        self.solver.is_some()
    }

    pub fn detect(&self, markup: &str) -> Option<ChallengeState> {
        detect(markup)
    }

    /// Run the chain once. Returns `true` when the page is usable again;
    /// `state` always ends terminal.
    pub async fn bypass(&self, state: &mut ChallengeState, session: &dyn PageSession, url: &str) -> bool {
        if state.outcome().is_terminal() {
            return matches!(
                state.outcome(),
                ChallengeOutcome::Bypassed | ChallengeOutcome::EscalatedPaid
            );
        }
        info!("🛡️ Attempting bypass for {}", state.family);

        state.record_attempt();
        let cleared = if state.family == ChallengeFamily::BrowserJsChallenge {
            self.wait_out_js_challenge(state.family, session).await
        } else {
            self.stealth_reload(session, url).await
        };
        if cleared {
            state.advance(ChallengeOutcome::Bypassed);
            return true;
        }

        let Some(solver) = &self.solver else {
            info!("ℹ️ No solver configured, proceeding with partial content");
            state.advance(ChallengeOutcome::Failed);
            return false;
        };

        state.record_attempt();
        if self.solve_and_inject(solver.as_ref(), state, session, url).await {
            state.advance(ChallengeOutcome::EscalatedPaid);
            return true;
        }

        state.advance(ChallengeOutcome::Failed);
        false
    }

    async fn wait_out_js_challenge(&self, family: ChallengeFamily, session: &dyn PageSession) -> bool {
        if let Err(e) = session.evaluate(EVASION_SCRIPT) {
            debug!("Re-asserting overrides failed: {}", e);
        }

        for attempt in 1..=self.timings.js_poll_attempts {
            sleep(self.timings.js_poll_interval).await;
            if !still_blocked(session, family) {
                info!("✅ JS challenge cleared after {} checks", attempt);
                return true;
            }
            debug!("Still blocked ({}/{})", attempt, self.timings.js_poll_attempts);
        }

        info!("🔄 Reloading once...");
        if let Err(e) = session.reload() {
            debug!("Reload failed: {}", e);
        }
        sleep(self.timings.js_reload_wait).await;

        if still_blocked(session, family) {
            warn!("❌ JS challenge persisted after reload");
            false
        } else {
            info!("✅ JS challenge cleared after reload");
            true
        }
    }

    async fn stealth_reload(&self, session: &dyn PageSession, url: &str) -> bool {
        if let Err(e) = session.evaluate(EVASION_SCRIPT) {
            debug!("Re-asserting overrides failed: {}", e);
        }
        if let Err(e) = session.navigate(url) {
            debug!("Stealth reload navigation error: {}", e);
        }
        sleep(self.timings.stealth_reload_wait).await;

        match session.content() {
            Ok(markup) if !any_challenge_present(&markup) => {
                info!("✅ Page cleared after stealth reload");
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!("Could not read page after stealth reload: {}", e);
                false
            }
        }
    }

    async fn solve_and_inject(
        &self,
        solver: &dyn TokenSolver,
        state: &ChallengeState,
        session: &dyn PageSession,
        url: &str,
    ) -> bool {
        let task = SolveTask {
            family: state.family,
            target_url: url.to_string(),
            site_key: state.site_key.clone(),
        };
        let token = match solver.solve(&task).await {
            Ok(token) => token,
            Err(e) => {
                warn!("💳 Paid solver failed: {:#}", e);
                return false;
            }
        };

        if let Err(e) = session.call_with_args(TOKEN_INJECTION_FN, vec![serde_json::Value::String(token)]) {
            warn!("Token injection failed: {}", e);
            return false;
        }
        sleep(self.timings.token_settle).await;
        info!("✅ Token injected");
        true
    }
}

/// Unreadable pages count as blocked.
fn still_blocked(session: &dyn PageSession, family: ChallengeFamily) -> bool {
    match session.content() {
        Ok(markup) => family.is_present_in(&markup),
        Err(_) => true,
    }
}
