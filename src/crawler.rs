use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use indicatif::ProgressBar;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument, Span};

use crate::config::Settings;
use crate::error::CrawlError;
use crate::fetch::Fetcher;
use crate::links::{harvest_page, PageHarvest};
use crate::model::{CrawlResult, ListingLink, ListingRecord, PageUrl};
use crate::pages::{self, PageEnumeration, SearchUrl};
use crate::parser::fetch_listing;

/// What one spawned unit of work reports back to the collector.
enum Slot<T> {
    Done(T),
    /// Cancelled before a permit was granted.
    NotAttempted,
}

struct Collected<T> {
    done: Vec<T>,
    not_attempted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestReport {
    pub links: BTreeSet<ListingLink>,
    pub pages_skipped: usize,
    pub pages_not_attempted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    pub records: Vec<ListingRecord>,
    pub not_attempted: usize,
}

/// Enumerate → harvest → extract, with every fetch bounded by one pool per run.
pub struct Crawler {
    fetcher: Arc<dyn Fetcher>,
    settings: Settings,
    span: Span,
    cancel: CancellationToken,
    progress: ProgressBar,
}

impl Crawler {
    pub fn new(fetcher: Arc<dyn Fetcher>, settings: Settings) -> Self {
        Self {
            fetcher,
            settings,
            span: Span::none(),
            cancel: CancellationToken::new(),
            progress: ProgressBar::hidden(),
        }
    }

    /// Parent span for the run; every worker task gets a child of it.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Semaphore sized to the configured pool. Share it between stages of one run.
    pub fn pool(&self) -> Result<Arc<Semaphore>, CrawlError> {
        self.settings.validate()?;
        Ok(Arc::new(Semaphore::new(self.settings.workers)))
    }

    pub async fn run(&self, search: &SearchUrl) -> Result<CrawlResult, CrawlError> {
        let pool = self.pool()?;
        let started_at = Utc::now();

        let enumeration = if self.cancel.is_cancelled() {
            PageEnumeration {
                result_count: None,
                pages: Vec::new(),
            }
        } else {
            self.enumerate(search).await
        };
        let pages_total = enumeration.pages.len();
        if pages_total > 0 && enumeration.is_best_effort() {
            self.span.in_scope(|| {
                warn!(pages = pages_total, "no usable result count, crawl is best effort")
            });
        }

        let harvest = self.harvest(&pool, enumeration.pages).await;
        let links_found = harvest.links.len();

        let mut links: Vec<ListingLink> = harvest.links.into_iter().collect();
        let capped = self
            .settings
            .max_listings
            .map_or(0, |max| links_found.saturating_sub(max));
        links.truncate(links_found - capped);

        let extraction = self.extract(&pool, links).await;
        let mut records = extraction.records;
        records.sort_by(|a, b| a.link().cmp(b.link()));
        let listings_skipped = records.iter().filter(|r| r.is_unreachable()).count();

        let result = CrawlResult {
            result_count: enumeration.result_count,
            pages_total,
            pages_skipped: harvest.pages_skipped,
            pages_not_attempted: harvest.pages_not_attempted,
            links_found,
            listings_skipped,
            listings_not_attempted: capped + extraction.not_attempted,
            cancelled: self.cancel.is_cancelled(),
            started_at,
            finished_at: Utc::now(),
            records,
        };

        self.span.in_scope(|| {
            info!(
                pages = result.pages_total,
                pages_skipped = result.pages_skipped,
                links = result.links_found,
                listings_ok = result.listings_ok(),
                listings_skipped = result.listings_skipped,
                not_attempted = result.listings_not_attempted,
                cancelled = result.cancelled,
                "crawl finished"
            )
        });
        Ok(result)
    }

    pub async fn enumerate(&self, search: &SearchUrl) -> PageEnumeration {
        pages::enumerate(
            self.fetcher.as_ref(),
            search,
            self.settings.page_size,
            self.settings.max_pages,
        )
        .instrument(info_span!(parent: &self.span, "enumerate"))
        .await
    }

    /// Harvest every page concurrently and merge into one deduplicated set.
    pub async fn harvest(&self, pool: &Arc<Semaphore>, pages: Vec<PageUrl>) -> HarvestReport {
        let collected = self
            .fan_out(pool, "harvest", pages, |fetcher, page| async move {
                harvest_page(fetcher.as_ref(), &page).await
            })
            .await;

        let mut report = HarvestReport {
            pages_not_attempted: collected.not_attempted,
            ..Default::default()
        };
        for harvest in collected.done {
            match harvest {
                PageHarvest::Harvested(links) => report.links.extend(links),
                PageHarvest::Skipped { .. } => report.pages_skipped += 1,
            }
        }
        report
    }

    /// Extract every link concurrently. One record per attempted link.
    pub async fn extract(&self, pool: &Arc<Semaphore>, links: Vec<ListingLink>) -> ExtractReport {
        let collected = self
            .fan_out(pool, "extract", links, |fetcher, link| async move {
                fetch_listing(fetcher.as_ref(), link).await
            })
            .await;

        ExtractReport {
            records: collected.done,
            not_attempted: collected.not_attempted,
        }
    }

    async fn fan_out<I, T, F, Fut>(
        &self,
        pool: &Arc<Semaphore>,
        stage: &'static str,
        items: Vec<I>,
        work: F,
    ) -> Collected<T>
    where
        I: fmt::Display + Send + 'static,
        T: Send + 'static,
        F: Fn(Arc<dyn Fetcher>, I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.progress.set_length(items.len() as u64);
        self.progress.set_position(0);
        self.progress.set_message(stage);

        let (tx, mut rx) = mpsc::channel::<Slot<T>>((self.settings.workers * 2).max(1));

        // Dropping this stage (or the whole run) stops admission of queued tasks.
        let stage_cancel = self.cancel.child_token();
        let _abandon = stage_cancel.clone().drop_guard();

        for item in items {
            let pool = Arc::clone(pool);
            let cancel = stage_cancel.clone();
            let tx = tx.clone();
            let span = info_span!(parent: &self.span, "task", stage, item = %item);
            let job = work(Arc::clone(&self.fetcher), item);

            tokio::spawn(
                async move {
                    let slot = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Slot::NotAttempted,
                        permit = pool.acquire_owned() => match permit {
                            Ok(_permit) => Slot::Done(job.await),
                            Err(_) => Slot::NotAttempted,
                        },
                    };
                    let _ = tx.send(slot).await;
                }
                .instrument(span),
            );
        }

        // rx closes once every spawned task has reported
        drop(tx);

        let mut collected = Collected {
            done: Vec::new(),
            not_attempted: 0,
        };
        while let Some(slot) = rx.recv().await {
            match slot {
                Slot::Done(value) => collected.done.push(value),
                Slot::NotAttempted => collected.not_attempted += 1,
            }
            self.progress.inc(1);
        }

        if collected.not_attempted > 0 {
            self.span.in_scope(|| {
                warn!(stage, not_attempted = collected.not_attempted, "cancelled before admission")
            });
        }
        collected
    }
}
