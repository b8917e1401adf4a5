use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use wispbrowser::browser::Browser;
use wispbrowser::config::{load_config, Config};
use wispbrowser::cookies;
use wispbrowser::logging::{init_logging, LogOptions};
use wispbrowser::{DriverConfig, LaunchOptions, OptionsPreset, UrlFilter, WaitGate};

#[derive(Parser)]
#[command(name = "wispbrowser", version, about = "Chromium automation convenience layer")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Shortcut for --log-level debug.
    #[arg(long, global = true)]
    debug: bool,

    /// Run the browser with a visible window.
    #[arg(long, global = true)]
    headful: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Navigate to a URL, optionally waiting for network quiet and saving a
    /// screenshot.
    Open(OpenArgs),
    /// Navigate and record network traffic for a fixed duration.
    Capture(CaptureArgs),
    /// Export or import cookie jars.
    Cookies(CookiesArgs),
}

#[derive(Args)]
struct OpenArgs {
    url: String,

    /// Wait until the page goes network-quiet before finishing.
    #[arg(long)]
    wait_quiet: bool,

    /// Save a screenshot to this path after loading.
    #[arg(long)]
    screenshot: Option<String>,
}

#[derive(Args)]
struct CaptureArgs {
    url: String,

    /// Capture duration in seconds.
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Capture only URLs containing any of these fragments.
    #[arg(long = "contains")]
    contains: Vec<String>,

    /// Capture only URLs exactly matching any of these.
    #[arg(long = "matches")]
    matches: Vec<String>,

    /// Write captured exchanges as JSON to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct CookiesArgs {
    #[command(subcommand)]
    action: CookieAction,
}

#[derive(Subcommand)]
enum CookieAction {
    /// Visit a URL and save its cookie jar.
    Export {
        url: String,
        /// Jar name; the file lands in the configured cookie directory.
        #[arg(long, default_value = "cookies")]
        name: String,
    },
    /// Load a cookie jar file into a fresh session on the URL.
    Import {
        url: String,
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref()).await?;

    let level = if cli.debug { "debug" } else { &cli.log_level };
    let _guards = init_logging(
        &LogOptions::default()
            .directory(&config.log_dir)
            .level(level),
    )?;

    let result = match &cli.command {
        Commands::Open(args) => cmd_open(args, &cli, &config).await,
        Commands::Capture(args) => cmd_capture(args, &cli, &config).await,
        Commands::Cookies(args) => cmd_cookies(args, &cli, &config).await,
    };

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn build_browser(cli: &Cli, config: &Config) -> Result<Browser> {
    let mut driver_config = DriverConfig {
        headless: config.headless && !cli.headful,
        websocket_url: config.websocket_url.clone(),
        ..DriverConfig::default()
    };
    if let Some(path) = &config.chrome_path {
        driver_config.executable = path.clone();
    }

    let launch = LaunchOptions::new(OptionsPreset::Base);

    Browser::builder()
        .config(driver_config)
        .launch_options(launch)
        .mobile_emulation(config.mobile_emulation)
        .log_dir(&config.log_dir)
        .build()
        .await
}

async fn cmd_open(args: &OpenArgs, cli: &Cli, config: &Config) -> Result<()> {
    let browser = build_browser(cli, config).await?;

    let outcome = async {
        browser.goto(&args.url).await?;
        if args.wait_quiet {
            browser.start_traffic_capture(UrlFilter::default()).await?;
            browser
                .wait_until(
                    WaitGate::NetworkQuiet {
                        window_ms: 1_000,
                        max_inflight: 0,
                    },
                    Duration::from_secs(30),
                )
                .await?;
        }
        if let Some(name) = &args.screenshot {
            let path = browser.screenshot(name).await?;
            info!("Screenshot saved to {}", path.display());
        }
        Ok(())
    }
    .await;

    if outcome.is_err() {
        browser.capture_failure("open").await;
    }
    browser.shutdown().await;
    outcome
}

async fn cmd_capture(args: &CaptureArgs, cli: &Cli, config: &Config) -> Result<()> {
    let browser = build_browser(cli, config).await?;

    let outcome = async {
        browser
            .start_traffic_capture(UrlFilter {
                contains: args.contains.clone(),
                matches: args.matches.clone(),
            })
            .await?;
        browser.goto(&args.url).await?;
        tokio::time::sleep(Duration::from_secs(args.duration)).await;

        let exchanges = browser.traffic_history().await?;
        info!(count = exchanges.len(), "capture finished");
        let payload = serde_json::to_string_pretty(&exchanges)?;
        match &args.output {
            Some(path) => {
                std::fs::write(path, payload)?;
                info!("Exchanges written to {}", path.display());
            }
            None => println!("{payload}"),
        }
        Ok(())
    }
    .await;

    if outcome.is_err() {
        browser.capture_failure("capture").await;
    }
    browser.shutdown().await;
    outcome
}

async fn cmd_cookies(args: &CookiesArgs, cli: &Cli, config: &Config) -> Result<()> {
    let browser = build_browser(cli, config).await?;

    let outcome = async {
        match &args.action {
            CookieAction::Export { url, name } => {
                browser.goto(url).await?;
                let path = browser
                    .save_cookies(name, Some(config.cookie_dir.as_path()))
                    .await?;
                info!("Cookies exported to {}", path.display());
            }
            CookieAction::Import { url, path } => {
                browser.goto(url).await?;
                let cookies = cookies::read_cookie_file(path)?;
                info!(count = cookies.len(), "loading cookies");
                browser.load_cookies(cookies).await?;
            }
        }
        Ok(())
    }
    .await;

    if outcome.is_err() {
        browser.capture_failure("cookies").await;
    }
    browser.shutdown().await;
    outcome
}
