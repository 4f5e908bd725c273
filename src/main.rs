//! Command-line entry point
//!
//! ```text
//! price-tracker [--config PATH] health
//! price-tracker [--config PATH] scrape PRODUCTS.json
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::info;

use price_tracker_lib::infrastructure::logging::init_logging_with_config;
use price_tracker_lib::{AppConfig, Product, ScrapeManager};

const USAGE: &str = "usage: price-tracker [--config PATH] health|scrape PRODUCTS.json";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Health,
    Scrape(PathBuf),
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut config = None;
    let mut positional = Vec::new();
    let mut raw = raw.into_iter();

    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = raw.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => bail!(USAGE),
            flag if flag.starts_with('-') => bail!("unknown option {flag}\n{USAGE}"),
            _ => positional.push(arg),
        }
    }

    let command = match positional.as_slice() {
        [cmd] if cmd == "health" => Command::Health,
        [cmd, file] if cmd == "scrape" => Command::Scrape(PathBuf::from(file)),
        _ => bail!(USAGE),
    };
    Ok(Args { config, command })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    let config = AppConfig::load(args.config.as_deref())?;
    init_logging_with_config(&config.logging)?;

    let manager = ScrapeManager::new(config)?;
    let output = match args.command {
        Command::Health => serde_json::to_string_pretty(&manager.health_check().await)?,
        Command::Scrape(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let products: Vec<Product> = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse products from {}", path.display()))?;
            info!("Loaded {} products from {}", products.len(), path.display());
            serde_json::to_string_pretty(&manager.scrape_all_products(&products).await)?
        }
    };

    println!("{output}");
    Ok(())
}
