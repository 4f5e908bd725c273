//! Scrape task lifecycle, per-site result entries and health reporting

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use thiserror::Error;

use super::price::{CURRENCY_GBP, ExtractionResult};
use super::product::ProductId;

/// Where a running task currently is in the fetch → parse pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStage {
    Fetching,
    Parsing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running(ScrapeStage),
    Completed(ExtractionResult),
    Failed(String),
    Cancelled,
}

impl TaskState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_) | Self::Cancelled)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running(ScrapeStage::Fetching) => "fetching",
            Self::Running(ScrapeStage::Parsing) => "parsing",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid task transition for {site}: {from} -> {to}")]
pub struct InvalidTransition {
    pub site: String,
    pub from: &'static str,
    pub to: &'static str,
}

/// One (product, site) unit of scraping work
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeTask {
    pub product_id: ProductId,
    pub site_name: String,
    pub url: String,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScrapeTask {
    pub fn new(
        product_id: ProductId,
        site_name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            product_id,
            site_name: site_name.into(),
            url: url.into(),
            state: TaskState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`. Stages only go forward and terminal states are final.
    pub fn advance(&mut self, next: TaskState) -> Result<(), InvalidTransition> {
        use ScrapeStage::{Fetching, Parsing};
        use TaskState::{Cancelled, Completed, Failed, Pending, Running};

        let allowed = matches!(
            (&self.state, &next),
            (Pending, Running(Fetching))
                | (Running(Fetching), Running(Parsing))
                | (Running(Parsing), Completed(_))
                | (Pending | Running(_), Failed(_) | Cancelled)
        );

        if !allowed {
            return Err(InvalidTransition {
                site: self.site_name.clone(),
                from: self.state.label(),
                to: next.label(),
            });
        }

        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Result entry handed to the persistence collaborator for one site
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteScrapeResult {
    pub success: bool,
    pub price: Option<Decimal>,
    pub currency: String,
    pub title: Option<String>,
    pub availability: Option<bool>,
    pub url: String,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

impl SiteScrapeResult {
    pub fn succeeded(url: impl Into<String>, result: &ExtractionResult) -> Self {
        Self {
            success: result.price.is_some(),
            price: result.price,
            currency: result.currency.clone(),
            title: result.title.clone(),
            availability: Some(result.availability),
            url: url.into(),
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(url: impl Into<String>, kind: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            price: None,
            currency: CURRENCY_GBP.to_string(),
            title: None,
            availability: None,
            url: url.into(),
            error: Some(message.into()),
            error_kind: Some(kind.to_string()),
        }
    }
}

/// Per-site entries for one product, in the product's URL order
pub type SiteResults = IndexMap<String, SiteScrapeResult>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupedResults {
    pub successful: Vec<(String, SiteScrapeResult)>,
    pub blocked: Vec<(String, SiteScrapeResult)>,
    pub failed: Vec<(String, SiteScrapeResult)>,
}

/// Bucket result entries into successful, blocked and failed
pub fn group_results_by_status(results: &SiteResults) -> GroupedResults {
    let mut grouped = GroupedResults::default();
    for (site, entry) in results {
        let pair = (site.clone(), entry.clone());
        if entry.success {
            grouped.successful.push(pair);
            continue;
        }

        let message = entry.error.as_deref().unwrap_or_default().to_lowercase();
        let blocked = entry.error_kind.as_deref() == Some("blocked_by_origin")
            || message.contains("blocked")
            || message.contains("403");
        if blocked {
            grouped.blocked.push(pair);
        } else {
            grouped.failed.push(pair);
        }
    }
    grouped
}

/// Reachability of one site's base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteReachability {
    Accessible,
    Inaccessible,
    Error(String),
}

impl SiteReachability {
    pub const fn is_accessible(&self) -> bool {
        matches!(self, Self::Accessible)
    }
}

impl std::fmt::Display for SiteReachability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accessible => write!(f, "accessible"),
            Self::Inaccessible => write!(f, "inaccessible"),
            Self::Error(cause) => write!(f, "error:{cause}"),
        }
    }
}

impl Serialize for SiteReachability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// All accessible → healthy, all failing (or nothing to check) → unhealthy.
    pub fn from_checks<'a>(checks: impl IntoIterator<Item = &'a SiteReachability>) -> Self {
        let (mut total, mut failing) = (0usize, 0usize);
        for check in checks {
            total += 1;
            if !check.is_accessible() {
                failing += 1;
            }
        }

        if failing == total {
            Self::Unhealthy
        } else if failing > 0 {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub active_tasks: usize,
    pub enabled_sites: usize,
    pub site_checks: IndexMap<String, SiteReachability>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(site_checks: IndexMap<String, SiteReachability>, active_tasks: usize) -> Self {
        Self {
            status: HealthStatus::from_checks(site_checks.values()),
            active_tasks,
            enabled_sites: site_checks.len(),
            site_checks,
            checked_at: Utc::now(),
        }
    }
}
