//! Passive capture of API responses seen while a page renders.
//!
//! The browser's event thread pushes an [`ObservedResponse`] per network
//! response into an unbounded channel. After scrolling, the render pipeline
//! drains that channel for a bounded window, fetching bodies only for
//! candidates that survive the cheap URL filter. Accepted entries keep their
//! capture order and the serialized array never exceeds the byte budget.

use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

/// Bodies shorter than this are never interesting.
pub const MIN_BODY_BYTES: usize = 20;
/// Flat objects with this many keys or fewer are status pings, not data.
pub const MAX_FLAT_KEYS: usize = 2;
pub const MAX_STORED_URL_CHARS: usize = 200;

static NOISE_HOSTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(google-analytics\.com|googletagmanager\.com|doubleclick\.net|googlesyndication\.com|adservice\.google|facebook\.net|connect\.facebook|hotjar\.com|segment\.(io|com)|mixpanel\.com|amplitude\.com|sentry\.io|newrelic\.com|nr-data\.net|clarity\.ms|scorecardresearch\.com|criteo\.(com|net)|taboola\.com|outbrain\.com|adsrvr\.org|amazon-adsystem\.com)",
    )
    .expect("static regex")
});

static NOISE_PATHS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/(analytics|collect|track|tracking|pixel|beacon|telemetry|metrics|log_event)(/|\?|$)")
        .expect("static regex")
});

static ASSET_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(js|mjs|css|map|png|jpe?g|gif|webp|avif|svg|ico|bmp|woff2?|ttf|otf|eot|mp4|webm|mp3|wav|ogg)$")
        .expect("static regex")
});

/// One response event as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedResponse {
    pub request_id: String,
    pub url: String,
    pub mime_type: String,
    pub status: u16,
}

pub type ResponseObserver = UnboundedSender<ObservedResponse>;

/// Fresh observer/receiver pair for one session.
pub fn channel() -> (ResponseObserver, UnboundedReceiver<ObservedResponse>) {
    mpsc::unbounded_channel()
}

/// A kept API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub url: String,
    pub data: Value,
    /// Raw body length in bytes.
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Noise,
    NoBody,
    TooSmall,
    NotJson,
    FlatObject,
    Duplicate,
    Oversized,
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Dropped(DropReason),
}

/// Analytics, ad and tracking endpoints, plus static assets.
pub fn is_noise_url(url: &str) -> bool {
    if NOISE_HOSTS.is_match(url) || NOISE_PATHS.is_match(url) {
        return true;
    }
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    ASSET_EXTENSION.is_match(&path)
}

/// Error pages are not API data, whatever their shape.
fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Media types whose bodies are never JSON; skipped without fetching.
fn is_binary_mime(mime: &str) -> bool {
    let mime = mime.to_ascii_lowercase();
    ["image/", "font/", "video/", "audio/", "text/css", "text/html"]
        .iter()
        .any(|prefix| mime.starts_with(prefix))
}

fn is_flat_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.len() <= MAX_FLAT_KEYS && map.values().all(|v| !v.is_object() && !v.is_array())
        }
        _ => false,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Filters and accumulates responses under a serialized-size budget.
#[derive(Debug)]
pub struct NetworkInterceptor {
    budget: usize,
    dedupe: bool,
    entries: Vec<CapturedResponse>,
    seen: HashSet<String>,
    /// Length of the compact JSON array holding `entries`.
    serialized_len: usize,
    exhausted: bool,
}

impl NetworkInterceptor {
    pub fn new(budget: usize, dedupe: bool) -> Self {
        Self {
            budget,
            dedupe,
            entries: Vec::new(),
            seen: HashSet::new(),
            serialized_len: 2,
            exhausted: false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn entries(&self) -> &[CapturedResponse] {
        &self.entries
    }

    /// Run one response through the filter chain.
    pub fn offer(&mut self, url: &str, body: Option<&str>) -> Verdict {
        if self.exhausted {
            return Verdict::Dropped(DropReason::BudgetExhausted);
        }
        if is_noise_url(url) {
            return Verdict::Dropped(DropReason::Noise);
        }
        let Some(body) = body else {
            return Verdict::Dropped(DropReason::NoBody);
        };
        if body.len() < MIN_BODY_BYTES {
            return Verdict::Dropped(DropReason::TooSmall);
        }
        let data: Value = match serde_json::from_str(body) {
            Ok(data) => data,
            Err(e) => {
                trace!("Dropping non-JSON body from {}: {}", url, e);
                return Verdict::Dropped(DropReason::NotJson);
            }
        };
        if is_flat_object(&data) {
            return Verdict::Dropped(DropReason::FlatObject);
        }
        if self.dedupe && self.seen.contains(url) {
            return Verdict::Dropped(DropReason::Duplicate);
        }

        let entry = CapturedResponse {
            url: truncate_chars(url, MAX_STORED_URL_CHARS),
            data,
            size: body.len(),
        };
        let entry_len = match serde_json::to_string(&entry) {
            Ok(s) => s.len(),
            Err(_) => return Verdict::Dropped(DropReason::NotJson),
        };

        // Alone in the array it would still not fit: skip it, keep going.
        if 2 + entry_len > self.budget {
            debug!("Skipping {} byte response from {} (larger than budget)", entry_len, url);
            return Verdict::Dropped(DropReason::Oversized);
        }

        let separator = usize::from(!self.entries.is_empty());
        let next_len = self.serialized_len + separator + entry_len;
        if next_len > self.budget {
            debug!("API budget of {} bytes exhausted", self.budget);
            self.exhausted = true;
            return Verdict::Dropped(DropReason::BudgetExhausted);
        }

        if self.dedupe {
            self.seen.insert(url.to_string());
        }
        self.serialized_len = next_len;
        self.entries.push(entry);
        Verdict::Accepted
    }

    /// Pull observed responses until the window closes, the channel closes or
    /// the budget runs out. `body_of` is only called for 2xx URL-level
    /// survivors and never once the window has closed.
    /// Returns the number of accepted entries.
    pub async fn drain<F>(
        &mut self,
        rx: &mut UnboundedReceiver<ObservedResponse>,
        window: Duration,
        mut body_of: F,
    ) -> usize
    where
        F: FnMut(&ObservedResponse) -> Option<String>,
    {
        let deadline = Instant::now() + window;
        let mut accepted = 0;

        // timeout_at still yields already-queued messages past the deadline,
        // and body fetches block, so the clock is checked on every step.
        while !self.exhausted && Instant::now() < deadline {
            let observed = match timeout_at(deadline, rx.recv()).await {
                Ok(Some(observed)) => observed,
                Ok(None) | Err(_) => break,
            };

            if !is_success(observed.status) {
                trace!("Ignoring {} (HTTP {})", observed.url, observed.status);
                continue;
            }
            if is_noise_url(&observed.url) || is_binary_mime(&observed.mime_type) {
                trace!("Ignoring {} ({})", observed.url, observed.mime_type);
                continue;
            }
            if self.dedupe && self.seen.contains(&observed.url) {
                continue;
            }

            if Instant::now() >= deadline {
                debug!("Capture window closed with responses still queued");
                break;
            }
            let body = body_of(&observed);
            if self.offer(&observed.url, body.as_deref()) == Verdict::Accepted {
                accepted += 1;
            }
        }

        accepted
    }

    /// Serialized JSON array of everything kept, or `""` when empty.
    pub fn payload(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        serde_json::to_string(&self.entries).unwrap_or_default()
    }
}
