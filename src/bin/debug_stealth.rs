use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use page_acquirer::captcha;
use page_acquirer::interceptor;
use page_acquirer::render::{ChromeLauncher, LaunchPlan, ProfileDir, SessionLauncher};
use page_acquirer::stealth;
use page_acquirer::AcquirerConfig;

/// Launch one stealth session, print what a detection script would see and
/// how the landing page classifies.
#[derive(Debug, Parser)]
#[command(name = "debug_stealth")]
struct Args {
    /// Page to probe
    #[arg(default_value = "https://bot.sannysoft.com")]
    url: String,

    /// Show the browser window
    #[arg(long)]
    visible: bool,
}

const FINGERPRINT_PROBE: &str = r#"JSON.stringify({
    webdriver: navigator.webdriver === undefined ? "undefined" : String(navigator.webdriver),
    plugins: navigator.plugins.length,
    languages: navigator.languages,
    hardwareConcurrency: navigator.hardwareConcurrency,
    chromeRuntime: !!(window.chrome && window.chrome.runtime),
    timezone: Intl.DateTimeFormat().resolvedOptions().timeZone,
    userAgent: navigator.userAgent,
    viewport: [window.innerWidth, window.innerHeight]
})"#;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = AcquirerConfig::from_env();
    println!("🕵️ Starting Stealth Debugger...");

    let mut profile = ProfileDir::create().context("creating profile dir")?;
    let plan = LaunchPlan {
        headless: !args.visible || config.server_mode,
        low_memory: config.server_mode,
        viewport: stealth::random_viewport(),
        user_agent: stealth::random_chromium_user_agent().to_string(),
        profile_dir: profile.path().to_path_buf(),
        chromium_path: config.chromium_path.clone(),
        navigation_timeout: config.render.navigation_timeout,
        locale: "en-US".to_string(),
        timezone: config.timezone.clone(),
    };
    println!("Viewport {:?}, UA {}", plan.viewport, plan.user_agent);

    let (observer, mut responses) = interceptor::channel();
    let session = ChromeLauncher.launch(&plan, observer)?;

    println!("Navigating to {}...", args.url);
    if let Err(e) = session.navigate(&args.url) {
        println!("⚠️ Navigation incomplete: {:#}", e);
    }
    sleep(Duration::from_secs(3)).await;

    match session.evaluate(FINGERPRINT_PROBE) {
        Ok(Some(value)) => println!("Fingerprint: {}", value.as_str().unwrap_or_default()),
        Ok(None) => println!("Fingerprint probe returned nothing"),
        Err(e) => println!("❌ Fingerprint probe failed: {:#}", e),
    }

    let markup = session.content().unwrap_or_default();
    match captcha::detect(&markup) {
        Some(state) => println!("⚠️ Challenge: {} (site key: {:?})", state.family, state.site_key),
        None => println!("✅ No challenge detected"),
    }

    let mut seen = 0;
    while let Ok(observed) = responses.try_recv() {
        if !interceptor::is_noise_url(&observed.url) {
            seen += 1;
        }
    }
    println!("Observed {} non-noise responses", seen);

    session.close()?;
    profile.dispose();
    Ok(())
}
