//! Content acquisition engine: fetch the rendered content of a possibly
//! hostile page, plus the API data it loaded, bounded and cleaned for a
//! downstream extraction step.

pub mod acquirer;
pub mod captcha;
pub mod config;
pub mod direct;
pub mod error;
pub mod interceptor;
pub mod models;
pub mod render;
pub mod sanitizer;
pub mod stealth;

pub use acquirer::ContentAcquirer;
pub use captcha::{ChallengeFamily, ChallengeOutcome, ChallengeState};
pub use config::AcquirerConfig;
pub use direct::{DirectFetcher, PageFetcher};
pub use error::FetchError;
pub use models::{ExtractionInput, FetchRequest, FetchResult, RenderMode, Strategy};
pub use render::{PageRenderer, RenderOutput, RenderPhase, RenderedFetcher};
