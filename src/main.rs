use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use page_acquirer::{AcquirerConfig, ContentAcquirer, FetchRequest, RenderMode};

/// Fetch a page (direct or rendered) and print the result as JSON.
#[derive(Debug, Parser)]
#[command(name = "page-acquirer", version, about)]
struct Cli {
    /// Page to acquire
    url: String,

    /// Show the browser window (ignored in server mode)
    #[arg(long)]
    visible: bool,

    /// Skip the direct HTTP attempt
    #[arg(long)]
    force_browser: bool,

    /// Scroll further for infinite-scroll pages
    #[arg(long)]
    deep_scroll: bool,

    /// Print the extraction text (content + API data) instead of JSON
    #[arg(long)]
    combined: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AcquirerConfig::from_env();

    let mode = if cli.force_browser {
        RenderMode::ForceBrowser
    } else {
        RenderMode::Auto
    };
    let request = FetchRequest::new(&cli.url, &config)
        .with_mode(mode)
        .headless(!cli.visible)
        .deep_scroll(cli.deep_scroll);

    let acquirer = ContentAcquirer::new(config)?;
    let result = acquirer.acquire_request(request).await;

    if cli.combined && result.ok {
        println!("{}", result.extraction_input().combined());
    } else {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if !result.ok {
        std::process::exit(1);
    }
    Ok(())
}
