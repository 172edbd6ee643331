//! Anti-fingerprint evasion for rendered sessions
//!
//! This module provides:
//! - The override script injected before any page script runs
//! - Chromium launch flags (including the low-memory server profile)
//! - Per-session randomization of viewport and user agent
//! - Native (CDP) wheel scrolling and locale/timezone overrides

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use headless_chrome::protocol::cdp::Emulation::{SetLocaleOverride, SetTimezoneOverride};
use headless_chrome::protocol::cdp::Input::{
    DispatchMouseEvent, DispatchMouseEventPointer_TypeOption, DispatchMouseEventTypeOption,
};
use headless_chrome::Tab;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;

/// Desktop user agents for plain HTTP requests.
pub static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
    ]
});

/// Only Chromium-family agents are believable on a Chromium session.
pub static CHROMIUM_USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    USER_AGENTS
        .iter()
        .copied()
        .filter(|ua| ua.contains("Chrome/"))
        .collect()
});

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

pub const VIEWPORT_WIDTH: std::ops::RangeInclusive<u32> = 1024..=1920;
pub const VIEWPORT_HEIGHT: std::ops::RangeInclusive<u32> = 768..=1080;

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_USER_AGENT)
}

pub fn random_chromium_user_agent() -> &'static str {
    CHROMIUM_USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_USER_AGENT)
}

/// Bots usually run at a stock resolution; pick something a person might have.
pub fn random_viewport() -> (u32, u32) {
    let mut rng = rand::thread_rng();
    (rng.gen_range(VIEWPORT_WIDTH), rng.gen_range(VIEWPORT_HEIGHT))
}

/// Human-looking pause between scroll steps.
pub fn scroll_pause(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

/// Chromium flags for a stealth session. `low_memory` adds the flags used
/// on constrained server hosts.
pub fn launch_args(user_agent: &str, low_memory: bool) -> Vec<String> {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--no-sandbox".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-infobars".to_string(),
        "--window-position=0,0".to_string(),
        format!("--user-agent={}", user_agent),
    ];
    if low_memory {
        args.extend(
            [
                "--disable-gpu",
                "--single-process",
                "--no-zygote",
                "--renderer-process-limit=1",
                "--disable-extensions",
                "--disable-background-networking",
                "--js-flags=--max-old-space-size=256",
            ]
            .map(String::from),
        );
    }
    args
}

/// Overrides read by in-page detection scripts. Injected through
/// `Page.addScriptToEvaluateOnNewDocument` and re-asserted during bypass, so
/// every property stays `configurable` and the script can run twice.
pub const EVASION_SCRIPT: &str = r#"
    (() => {
        // 1. Unmasking: remove `navigator.webdriver`
        Object.defineProperty(navigator, 'webdriver', {
            get: () => undefined,
            configurable: true,
        });

        // 2. Languages consistent with the locale override
        Object.defineProperty(navigator, 'languages', {
            get: () => ['en-US', 'en'],
            configurable: true,
        });

        // 3. Standard Chrome plugin set (headless reports none)
        Object.defineProperty(navigator, 'plugins', {
            get: () => {
                const pdf = {
                    0: { type: "application/x-google-chrome-pdf", suffixes: "pdf", description: "Portable Document Format" },
                    description: "Portable Document Format",
                    filename: "internal-pdf-viewer",
                    length: 1,
                    name: "Chrome PDF Plugin"
                };
                const p = [pdf, pdf, pdf, pdf, pdf];
                if (typeof PluginArray !== 'undefined') {
                    Object.setPrototypeOf(p, PluginArray.prototype);
                }
                return p;
            },
            configurable: true,
        });

        // 4. Hardware concurrency (4, 6, 8, 10)
        Object.defineProperty(navigator, 'hardwareConcurrency', {
            get: () => 4 + Math.floor(Math.random() * 4) * 2,
            configurable: true,
        });

        // 5. Chrome runtime stub, essential for "headless" checks
        if (!window.chrome) {
            window.chrome = {};
        }
        if (!window.chrome.runtime) {
            window.chrome.runtime = {
                connect: function() {
                    return {
                        onMessage: { addListener: function() {}, removeListener: function() {} },
                        postMessage: function() {},
                        disconnect: function() {}
                    };
                },
                sendMessage: function() {},
                onMessage: { addListener: function() {}, removeListener: function() {} }
            };
        }

        // 6. Notifications permission reads 'default', not 'prompt'
        if (window.navigator.permissions && window.navigator.permissions.query) {
            const originalQuery = window.navigator.permissions.query.bind(window.navigator.permissions);
            window.navigator.permissions.query = (parameters) => (
                parameters && parameters.name === 'notifications' ?
                Promise.resolve({ state: Notification.permission }) :
                originalQuery(parameters)
            );
        }
    })();
"#;

/// Apply locale (and optionally timezone) overrides matching the spoofed languages.
pub fn apply_locale_overrides(tab: &Arc<Tab>, locale: &str, timezone_id: Option<&str>) -> Result<()> {
    tab.call_method(SetLocaleOverride {
        locale: Some(locale.to_string()),
    })?;

    if let Some(timezone_id) = timezone_id {
        tab.call_method(SetTimezoneOverride {
            timezone_id: timezone_id.to_string(),
        })?;
    }

    Ok(())
}

/// One native wheel step (trusted event) of `delta_y` pixels.
pub fn wheel_scroll(tab: &Arc<Tab>, delta_y: f64) -> Result<()> {
    tab.call_method(DispatchMouseEvent {
        Type: DispatchMouseEventTypeOption::MouseWheel,
        x: 100.0,
        y: 100.0,
        button: None,
        buttons: None,
        modifiers: None,
        timestamp: None,
        delta_x: Some(0.0),
        delta_y: Some(delta_y),
        pointer_Type: Some(DispatchMouseEventPointer_TypeOption::Mouse),
        force: None,
        tangential_pressure: None,
        tilt_x: None,
        tilt_y: None,
        twist: None,
        click_count: None,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evasion_script_overrides_detectable_properties() {
        assert!(EVASION_SCRIPT.contains("Object.defineProperty(navigator, 'webdriver'"));
        assert!(EVASION_SCRIPT.contains("Object.defineProperty(navigator, 'plugins'"));
        assert!(EVASION_SCRIPT.contains("Object.defineProperty(navigator, 'languages'"));
        assert!(EVASION_SCRIPT.contains("window.chrome.runtime"));
    }

    #[test]
    fn test_evasion_script_can_be_reapplied() {
        // a non-configurable property throws on the second defineProperty
        let defines = EVASION_SCRIPT.matches("Object.defineProperty(").count();
        assert_eq!(defines, 4);
        assert_eq!(EVASION_SCRIPT.matches("configurable: true").count(), defines);
        assert!(!EVASION_SCRIPT.contains("configurable: false"));
    }

    #[test]
    fn test_viewport_stays_in_human_range() {
        for _ in 0..200 {
            let (w, h) = random_viewport();
            assert!(VIEWPORT_WIDTH.contains(&w), "width {w}");
            assert!(VIEWPORT_HEIGHT.contains(&h), "height {h}");
        }
    }

    #[test]
    fn test_chromium_agents_exclude_firefox() {
        assert!(!CHROMIUM_USER_AGENTS.is_empty());
        for _ in 0..50 {
            assert!(random_chromium_user_agent().contains("Chrome/"));
        }
    }

    #[test]
    fn test_low_memory_args_only_on_request() {
        let desktop = launch_args("UA", false);
        assert!(desktop.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(desktop.contains(&"--user-agent=UA".to_string()));
        assert!(!desktop.iter().any(|a| a == "--single-process"));

        let server = launch_args("UA", true);
        assert!(server.iter().any(|a| a == "--single-process"));
        assert!(server.iter().any(|a| a == "--disable-gpu"));
    }

    #[test]
    fn test_scroll_pause_bounds() {
        let min = Duration::from_millis(500);
        let max = Duration::from_millis(1200);
        for _ in 0..100 {
            let pause = scroll_pause(min, max);
            assert!(pause >= min && pause <= max);
        }
        assert_eq!(scroll_pause(Duration::ZERO, Duration::ZERO), Duration::ZERO);
    }
}
