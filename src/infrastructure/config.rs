//! Configuration infrastructure
//!
//! Layered like this, later layers winning:
//! 1. Built-in defaults (serde defaults on every struct)
//! 2. A JSON/TOML file: an explicit path, else `./config.json`, else
//!    `<config_dir>/price-tracker/config.json`
//! 3. Environment variables `PRICE_TRACKER__SECTION__KEY`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{SelectorSet, SiteProfile};
use crate::infrastructure::parsing_error::{ScrapeError, ScrapeResult};

pub const APP_DIR_NAME: &str = "price-tracker";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const ENV_PREFIX: &str = "PRICE_TRACKER";

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraping: ScrapingConfig,
    /// Site name → profile, in file order
    pub sites: IndexMap<String, SiteProfileConfig>,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let sites = [
            ("jjfoodservice", "https://www.jjfoodservice.com"),
            ("atoz_catering", "https://www.atoz-catering.co.uk"),
            ("amazon_uk", "https://www.amazon.co.uk"),
        ]
        .into_iter()
        .map(|(name, base_url)| {
            (
                name.to_string(),
                SiteProfileConfig {
                    enabled: true,
                    base_url: base_url.to_string(),
                    selectors: SelectorSet::default(),
                },
            )
        })
        .collect();

        Self {
            scraping: ScrapingConfig::default(),
            sites,
            logging: LoggingConfig::default(),
        }
    }
}

/// Global scraping parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Seconds between dispatching successive site tasks and products
    pub delay_between_requests: f64,
    pub max_concurrent_requests: usize,
    /// Per-request timeout in seconds
    pub timeout: u64,
    pub retry_attempts: u32,
    pub user_agents: Vec<String>,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            delay_between_requests: 2.0,
            max_concurrent_requests: 5,
            timeout: 30,
            retry_attempts: 3,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                    .to_string(),
            ],
        }
    }
}

impl ScrapingConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_between_requests).unwrap_or(Duration::ZERO)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// One site's entry in the `sites` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfileConfig {
    pub enabled: bool,
    pub base_url: String,
    pub selectors: SelectorSet,
}

impl SiteProfileConfig {
    pub fn to_profile(&self, name: &str) -> SiteProfile {
        SiteProfile {
            name: name.to_string(),
            base_url: self.base_url.clone(),
            enabled: self.enabled,
            selectors: self.selectors.clone(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to `<data_local_dir>/price-tracker/logs`
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Load defaults, then the config file, then environment overrides.
    ///
    /// An explicit `path` must exist; the fallback locations are optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(explicit) => {
                builder = builder.add_source(config::File::from(explicit).required(true));
            }
            None => {
                if let Some(found) = Self::default_config_path() {
                    info!("Using configuration file: {:?}", found);
                    builder = builder.add_source(config::File::from(found).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scraping.user_agents"),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let config: Self = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// `./config.json` if present, else the per-user config file if present
    pub fn default_config_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
            .filter(|candidate| candidate.exists())
    }

    pub fn validate(&self) -> ScrapeResult<()> {
        if self.scraping.max_concurrent_requests == 0 {
            return Err(ScrapeError::Configuration(
                "max_concurrent_requests must be greater than 0".to_string(),
            ));
        }
        if self.scraping.retry_attempts == 0 {
            return Err(ScrapeError::Configuration(
                "retry_attempts must be greater than 0".to_string(),
            ));
        }
        if self.scraping.timeout == 0 {
            return Err(ScrapeError::Configuration(
                "timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn site_profile(&self, name: &str) -> Option<SiteProfile> {
        self.sites.get(name).map(|site| site.to_profile(name))
    }

    pub fn is_site_enabled(&self, name: &str) -> bool {
        self.sites.get(name).is_some_and(|site| site.enabled)
    }

    /// Every configured site, enabled or not, in file order
    pub fn site_profiles(&self) -> Vec<SiteProfile> {
        self.sites
            .iter()
            .map(|(name, site)| site.to_profile(name))
            .collect()
    }

    pub fn enabled_sites(&self) -> Vec<SiteProfile> {
        self.sites
            .iter()
            .filter(|(_, site)| site.enabled)
            .map(|(name, site)| site.to_profile(name))
            .collect()
    }
}
