use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use proxy_scraper_checker::checker::{check_all, CheckPlan};
use proxy_scraper_checker::config;
use proxy_scraper_checker::output;
use proxy_scraper_checker::scraper::{scrape_all, Source};
use proxy_scraper_checker::settings::Settings;
use proxy_scraper_checker::storage::ProxyStorage;

/// proxy-scraper-checker — scrapes public proxy lists, verifies each proxy actually works, and
/// writes the survivors out sorted and (optionally) geolocated.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "proxy-scraper-checker",
    version,
    about = "Async scraper and checker for free HTTP/SOCKS4/SOCKS5 proxy lists.",
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Force debug-level logging regardless of the config file's `debug` key.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match config::load(&cli.config).await {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load {}: {err:#}", cli.config.display());
            std::process::exit(1);
        }
    };

    let debug = cli.debug || config.debug;
    init_tracing(debug);

    match run(config).await {
        Ok(()) => std::process::exit(0),
        Err(err) if err.is::<Cancelled>() => {
            info!("interrupted, exiting");
            std::process::exit(130);
        }
        Err(err) => {
            error!("{err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[derive(Debug, thiserror::Error)]
#[error("cancelled")]
struct Cancelled;

async fn run(config: config::Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_ctrlc.cancel();
    });

    // reqwest never stores cookies unless the `cookies` feature + `cookie_store(true)` are both
    // set, so the default client already satisfies "cookies disabled".
    let client = reqwest::Client::builder().build()?;
    let settings = Settings::from_config(config, &client).await?;

    let storage = Arc::new(ProxyStorage::new(settings.sources.keys().copied()));

    let sources: Vec<Source> = settings
        .sources
        .iter()
        .flat_map(|(protocol, locations)| {
            locations.iter().map(move |location| Source { protocol: *protocol, location: location.clone() })
        })
        .collect();

    info!(sources = sources.len(), "scraping proxy sources");
    tokio::select! {
        _ = scrape_all(client.clone(), sources, settings.source_timeout, storage.clone()) => {}
        _ = cancel.cancelled() => return Err(Cancelled.into()),
    }

    let scraped = storage.count().await;
    for (protocol, count) in &scraped {
        info!(%protocol, count, "scraped");
    }

    if settings.checking_enabled() {
        let plan = Arc::new(CheckPlan::from_check_website(
            &settings.check_website,
            settings.timeout,
            settings.max_connections,
            settings.check_website_type,
            settings.real_ip.clone(),
            settings.shuffle_seed,
        )?);

        info!(max_connections = settings.max_connections, "checking proxies");
        tokio::select! {
            _ = check_all(storage.clone(), plan) => {}
            _ = cancel.cancelled() => return Err(Cancelled.into()),
        }

        let checked = storage.count().await;
        for (protocol, count) in &checked {
            info!(%protocol, count, "working");
        }
    } else {
        info!("check_website is empty, skipping the checker stage");
    }

    output::save(&storage, &settings).await?;
    info!(path = %settings.output_path, "wrote output");

    Ok(())
}
