//! Challenge detection and the bypass state machine.
//!
//! Detection scans markup for per-family fingerprints; the first family (in
//! [`ChallengeFamily::ALL`] order) with a matching fingerprint wins. The
//! escalating bypass chain lives in [`bypass`], the paid solver in [`solver`].

pub mod bypass;
pub mod solver;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use bypass::CaptchaGuard;
pub use solver::{CapSolverClient, SolveTask, TokenSolver};

/// Class of anti-automation mechanism, told apart by markup fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeFamily {
    /// Interstitial that runs JS and usually clears itself (Cloudflare).
    BrowserJsChallenge,
    /// Checkbox widget (reCAPTCHA v2).
    VerificationCheckboxV2,
    /// Invisible score-based check (reCAPTCHA v3).
    VerificationScoreV3,
    /// Human-verification widget (hCaptcha).
    HumanVerificationWidget,
}

static CHECKBOX_V2_KEYS: Lazy<Vec<Regex>> = Lazy::new(|| {
    key_patterns(&[r#"data-sitekey=["']([^"']+)"#, r#"sitekey:\s*["']([^"']+)"#])
});
static SCORE_V3_KEYS: Lazy<Vec<Regex>> = Lazy::new(|| key_patterns(&[r"render=([A-Za-z0-9_-]{30,})"]));
static BROWSER_JS_KEYS: Lazy<Vec<Regex>> = Lazy::new(|| key_patterns(&[r#"data-sitekey=["']([^"']+)"#]));
static HUMAN_WIDGET_KEYS: Lazy<Vec<Regex>> = Lazy::new(|| {
    key_patterns(&[
        r#"data-hcaptcha-sitekey=["']([^"']+)"#,
        r#"data-sitekey=["']([^"']+)"#,
    ])
});

fn key_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("static regex"))
        .collect()
}

impl ChallengeFamily {
    /// Detection order.
    pub const ALL: [ChallengeFamily; 4] = [
        ChallengeFamily::BrowserJsChallenge,
        ChallengeFamily::VerificationCheckboxV2,
        ChallengeFamily::VerificationScoreV3,
        ChallengeFamily::HumanVerificationWidget,
    ];

    pub fn signatures(self) -> &'static [&'static str] {
        match self {
            ChallengeFamily::BrowserJsChallenge => &[
                "challenges.cloudflare.com",
                "cf-turnstile",
                "__cf_bm",
                "cf_clearance",
                "Checking if the site connection is secure",
                "Just a moment",
            ],
            ChallengeFamily::VerificationCheckboxV2 => &["g-recaptcha", "google.com/recaptcha/api2"],
            ChallengeFamily::VerificationScoreV3 => &["grecaptcha.execute", "recaptcha/api.js?render="],
            ChallengeFamily::HumanVerificationWidget => {
                &["hcaptcha.com/1/api", "h-captcha", "data-hcaptcha-sitekey"]
            }
        }
    }

    fn site_key_patterns(self) -> &'static [Regex] {
        match self {
            ChallengeFamily::BrowserJsChallenge => &BROWSER_JS_KEYS,
            ChallengeFamily::VerificationCheckboxV2 => &CHECKBOX_V2_KEYS,
            ChallengeFamily::VerificationScoreV3 => &SCORE_V3_KEYS,
            ChallengeFamily::HumanVerificationWidget => &HUMAN_WIDGET_KEYS,
        }
    }

    /// `lowered` must already be lower-cased.
    fn matches_lowered(self, lowered: &str) -> bool {
        self.signatures()
            .iter()
            .any(|sig| lowered.contains(&sig.to_lowercase()))
    }

    /// Whether any fingerprint of this family appears in `markup`.
    pub fn is_present_in(self, markup: &str) -> bool {
        self.matches_lowered(&markup.to_lowercase())
    }

    /// Site key as written in the page (case preserved).
    pub fn extract_site_key(self, markup: &str) -> Option<String> {
        self.site_key_patterns()
            .iter()
            .find_map(|re| re.captures(markup))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Paid-solver task type for this family.
    pub fn solver_task_type(self) -> &'static str {
        match self {
            ChallengeFamily::BrowserJsChallenge => "AntiTurnstileTaskProxyless",
            ChallengeFamily::VerificationCheckboxV2 => "ReCaptchaV2TaskProxyless",
            ChallengeFamily::VerificationScoreV3 => "ReCaptchaV3TaskProxyless",
            ChallengeFamily::HumanVerificationWidget => "HCaptchaTaskProxyless",
        }
    }
}

impl std::fmt::Display for ChallengeFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChallengeFamily::BrowserJsChallenge => "browser-js-challenge",
            ChallengeFamily::VerificationCheckboxV2 => "verification-checkbox-v2",
            ChallengeFamily::VerificationScoreV3 => "verification-score-v3",
            ChallengeFamily::HumanVerificationWidget => "human-verification-widget",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeOutcome {
    Unresolved,
    Bypassed,
    EscalatedPaid,
    Failed,
}

impl ChallengeOutcome {
    pub fn is_terminal(self) -> bool {
        self != ChallengeOutcome::Unresolved
    }
}

/// A detected challenge and how far the bypass chain got with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeState {
    pub family: ChallengeFamily,
    pub site_key: Option<String>,
    pub attempts: u32,
    outcome: ChallengeOutcome,
}

impl ChallengeState {
    pub fn new(family: ChallengeFamily, site_key: Option<String>) -> Self {
        Self {
            family,
            site_key,
            attempts: 0,
            outcome: ChallengeOutcome::Unresolved,
        }
    }

    pub fn outcome(&self) -> ChallengeOutcome {
        self.outcome
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Move to `outcome`. Terminal outcomes never change again; returns
    /// whether the transition happened.
    pub fn advance(&mut self, outcome: ChallengeOutcome) -> bool {
        if self.outcome.is_terminal() || outcome == ChallengeOutcome::Unresolved {
            return false;
        }
        self.outcome = outcome;
        true
    }
}

/// Classify `markup`, extracting the site key of the detected family.
pub fn detect(markup: &str) -> Option<ChallengeState> {
    let lowered = markup.to_lowercase();
    ChallengeFamily::ALL
        .into_iter()
        .find(|family| family.matches_lowered(&lowered))
        .map(|family| ChallengeState::new(family, family.extract_site_key(markup)))
}

/// Whether any family's fingerprint is still on the page.
pub fn any_challenge_present(markup: &str) -> bool {
    detect(markup).is_some()
}
