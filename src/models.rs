use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::captcha::ChallengeState;
use crate::config::AcquirerConfig;

/// How the acquirer may pick its strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Cheap HTTP first, browser only when the page looks client-rendered.
    #[default]
    Auto,
    /// Go straight to the browser.
    ForceBrowser,
}

/// Which strategy produced the returned content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Direct,
    Rendered,
}

/// One inbound acquisition call.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub mode: RenderMode,
    pub headless: bool,
    /// More scroll steps for infinite-scroll style pages.
    pub deep_scroll: bool,
    pub max_content_chars: usize,
    pub api_budget: usize,
}

impl FetchRequest {
    /// A request carrying the budgets of `config`.
    pub fn new(url: impl Into<String>, config: &AcquirerConfig) -> Self {
        Self {
            url: url.into(),
            mode: RenderMode::Auto,
            headless: true,
            deep_scroll: false,
            max_content_chars: config.max_content_chars,
            api_budget: config.api_budget,
        }
    }

    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn deep_scroll(mut self, deep_scroll: bool) -> Self {
        self.deep_scroll = deep_scroll;
        self
    }
}

/// The single answer to a `FetchRequest`, success or explicit failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
    pub url: String,
    /// Sanitized markup, at most `max_content_chars` chars.
    pub content: String,
    /// JSON array of intercepted API responses, `""` when nothing was kept.
    pub api_payload: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    /// Challenge met while rendering, with its final outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeState>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    pub fn success(
        url: impl Into<String>,
        strategy: Strategy,
        content: String,
        api_payload: String,
        challenge: Option<ChallengeState>,
    ) -> Self {
        Self {
            url: url.into(),
            content,
            api_payload,
            ok: true,
            error: None,
            strategy: Some(strategy),
            challenge,
            fetched_at: Utc::now(),
        }
    }

    pub fn failure(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: String::new(),
            api_payload: String::new(),
            ok: false,
            error: Some(error.into()),
            strategy: None,
            challenge: None,
            fetched_at: Utc::now(),
        }
    }

    /// What gets handed to the extraction collaborator.
    pub fn extraction_input(&self) -> ExtractionInput {
        ExtractionInput {
            content: self.content.clone(),
            api_payload: self.api_payload.clone(),
            source_url: self.url.clone(),
        }
    }
}

pub const API_DATA_SEPARATOR: &str =
    "===== INTERCEPTED API DATA (JSON from XHR/Fetch calls) =====";

/// Plain-text payload for the downstream structured-extraction step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionInput {
    pub content: String,
    pub api_payload: String,
    pub source_url: String,
}

impl ExtractionInput {
    /// Page content followed by the captured API data, if there is any.
    pub fn combined(&self) -> String {
        if self.api_payload.is_empty() {
            return self.content.clone();
        }
        format!("{}\n\n{}\n{}", self.content, API_DATA_SEPARATOR, self.api_payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_serializes_error_and_success_omits_it() {
        let failed = FetchResult::failure("https://example.com", "all strategies exhausted");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "all strategies exhausted");
        assert_eq!(json["apiPayload"], "");

        let ok = FetchResult::success("https://example.com", Strategy::Direct, "<body>x</body>".into(), String::new(), None);
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["strategy"], "direct");
    }

    #[test]
    fn test_combined_appends_api_data_only_when_present() {
        let mut input = ExtractionInput {
            content: "<body>page</body>".into(),
            api_payload: String::new(),
            source_url: "https://example.com".into(),
        };
        assert_eq!(input.combined(), "<body>page</body>");

        input.api_payload = r#"[{"url":"https://example.com/api","data":{"a":1,"b":2,"c":3},"size":19}]"#.into();
        let combined = input.combined();
        assert!(combined.starts_with("<body>page</body>\n\n"));
        assert!(combined.contains(API_DATA_SEPARATOR));
        assert!(combined.ends_with(&input.api_payload));
    }
}
