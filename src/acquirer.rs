//! Strategy orchestration: cheap HTTP first, browser only when needed.

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AcquirerConfig;
use crate::direct::{DirectFetcher, PageFetcher};
use crate::error::FetchError;
use crate::models::{FetchRequest, FetchResult, RenderMode, Strategy};
use crate::render::{PageRenderer, RenderedFetcher};
use crate::sanitizer::{sanitize, visible_text_len};

/// Sole entry point. Every call yields exactly one [`FetchResult`].
pub struct ContentAcquirer {
    config: AcquirerConfig,
    direct: Box<dyn PageFetcher>,
    renderer: Box<dyn PageRenderer>,
}

impl ContentAcquirer {
    /// Production wiring: reqwest for the direct path, Chromium for rendering.
    pub fn new(config: AcquirerConfig) -> anyhow::Result<Self> {
        let direct = DirectFetcher::new(config.direct_timeout)?;
        let renderer = RenderedFetcher::new(config.clone())?;
        Ok(Self::with_strategies(config, Box::new(direct), Box::new(renderer)))
    }

    pub fn with_strategies(
        config: AcquirerConfig,
        direct: Box<dyn PageFetcher>,
        renderer: Box<dyn PageRenderer>,
    ) -> Self {
        Self {
            config,
            direct,
            renderer,
        }
    }

    pub fn config(&self) -> &AcquirerConfig {
        &self.config
    }

    pub async fn acquire(&self, url: &str, headless: bool) -> FetchResult {
        let request = FetchRequest::new(url, &self.config).headless(headless);
        self.acquire_request(request).await
    }

    pub async fn acquire_request(&self, request: FetchRequest) -> FetchResult {
        let span = info_span!("acquire", id = %Uuid::new_v4(), url = %request.url);
        self.run(request).instrument(span).await
    }

    async fn run(&self, mut request: FetchRequest) -> FetchResult {
        if let Err(e) = validate_url(&request.url) {
            warn!("❌ Rejected: {}", e);
            return FetchResult::failure(&request.url, e.to_string());
        }
        if self.config.server_mode && !request.headless {
            info!("Server detected, forcing headless mode");
            request.headless = true;
        }

        let mut last_error: Option<FetchError> = None;
        let mut thin_direct: Option<String> = None;

        let browser_only = request.mode == RenderMode::ForceBrowser || self.config.force_browser;
        if !browser_only {
            match self.direct.fetch(&request.url).await {
                Ok(markup) => {
                    let content = sanitize(&markup, request.max_content_chars);
                    let visible = visible_text_len(&content);
                    if visible >= self.config.spa_threshold {
                        info!("✅ Direct fetch sufficient ({} visible chars)", visible);
                        return FetchResult::success(&request.url, Strategy::Direct, content, String::new(), None);
                    }
                    info!("📉 Only {} visible chars, escalating to browser", visible);
                    if visible > 0 {
                        thin_direct = Some(content);
                    }
                }
                Err(e) => {
                    warn!("⚠️ Direct fetch failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        match self.renderer.render(&request).await {
            Ok(output) => {
                let content = sanitize(&output.markup, request.max_content_chars);
                let api_payload = if output.api_payload.len() <= request.api_budget {
                    output.api_payload
                } else {
                    warn!("Dropping API payload over budget ({} bytes)", output.api_payload.len());
                    String::new()
                };
                return FetchResult::success(
                    &request.url,
                    Strategy::Rendered,
                    content,
                    api_payload,
                    output.challenge,
                );
            }
            Err(e) => {
                warn!("❌ Rendering failed: {}", e);
                last_error = Some(e);
            }
        }

        if let Some(content) = thin_direct {
            warn!("Returning thin direct content as partial result");
            return FetchResult::success(&request.url, Strategy::Direct, content, String::new(), None);
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no content".to_string());
        FetchResult::failure(&request.url, format!("all strategies exhausted: {}", reason))
    }
}

fn validate_url(url: &str) -> Result<(), FetchError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(FetchError::InvalidUrl(format!("unsupported scheme {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/a?b=c").is_ok());
        assert!(validate_url("http://localhost:8080").is_ok());
        assert!(matches!(validate_url("not a url"), Err(FetchError::InvalidUrl(_))));
        assert!(matches!(validate_url("ftp://example.com"), Err(FetchError::InvalidUrl(_))));
    }
}
