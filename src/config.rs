use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::CrawlError;
use crate::pages::{SortDirection, SortField};

/// Results per page on the search listing; used to turn the result count into a page count.
pub const DEFAULT_PAGE_SIZE: u64 = 20;
const DEFAULT_WORKERS: usize = 8;

/// Tunables for a crawl run.
///
/// Loaded from built-in defaults, then an optional `immocrawl.toml` in the
/// working directory, then `IMMO_*` environment variables (`IMMO_WORKERS=4`).
/// CLI flags override whatever was loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workers: usize,
    pub page_size: u64,
    pub max_pages: Option<usize>,
    pub max_listings: Option<usize>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub user_agent: String,
    pub db_path: String,
    pub sort_direction: SortDirection,
    pub sort_field: SortField,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: None,
            max_listings: None,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 2000,
            user_agent: format!("immocrawl/{}", env!("CARGO_PKG_VERSION")),
            db_path: "data/listings.sqlite".to_string(),
            sort_direction: SortDirection::Desc,
            sort_field: SortField::Relevance,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Config::builder()
            .add_source(File::with_name("immocrawl").required(false))
            .add_source(Environment::with_prefix("IMMO").try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Reject settings that would make the crawl meaningless or unbounded.
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.workers == 0 {
            return Err(CrawlError::NoWorkers);
        }
        if self.page_size == 0 {
            return Err(CrawlError::InvalidPageSize);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.page_size, 20);
        assert_eq!(s.sort_direction, SortDirection::Desc);
    }

    #[test]
    fn zero_workers_is_a_config_error() {
        let s = Settings {
            workers: 0,
            ..Settings::default()
        };
        assert_eq!(s.validate(), Err(CrawlError::NoWorkers));
    }

    #[test]
    fn partial_source_keeps_defaults() {
        let s: Settings = Config::builder()
            .set_override("workers", 3)
            .unwrap()
            .set_override("sort_direction", "ASC")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(s.workers, 3);
        assert_eq!(s.sort_direction, SortDirection::Asc);
        assert_eq!(s.page_size, DEFAULT_PAGE_SIZE);
    }
}
