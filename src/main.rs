use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn};

use immocrawl::{db, Crawler, HttpFetcher, SearchUrl, Settings, SortDirection, SortField};

#[derive(Parser)]
#[command(name = "immocrawl", about = "Crawl rental listings from an immowelt search")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every result page of a search and extract each listing
    Crawl {
        /// Search URL, e.g. https://www.immowelt.de/liste/hamburg/wohnungen/mieten
        url: String,
        /// Concurrent fetches (overrides IMMO_WORKERS)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Max result pages to crawl
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Max listings to extract
        #[arg(long)]
        listings: Option<usize>,
        /// Results per search page
        #[arg(long)]
        page_size: Option<u64>,
        #[arg(long, value_enum)]
        sort: Option<SortField>,
        #[arg(long, value_enum)]
        direction: Option<SortDirection>,
    },
    /// Show crawl statistics
    Stats,
    /// Print stored listings as JSON lines
    Export {
        /// Max rows to print
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;

    let result = match cli.command {
        Commands::Crawl {
            url,
            workers,
            limit,
            listings,
            page_size,
            sort,
            direction,
        } => {
            settings.workers = workers.unwrap_or(settings.workers);
            settings.max_pages = limit.or(settings.max_pages);
            settings.max_listings = listings.or(settings.max_listings);
            settings.page_size = page_size.unwrap_or(settings.page_size);
            settings.sort_field = sort.unwrap_or(settings.sort_field);
            settings.sort_direction = direction.unwrap_or(settings.sort_direction);
            crawl(&url, settings).await
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Runs:        {}", s.runs);
            println!("Listings:    {}", s.listings);
            println!("Fetched:     {}", s.fetched);
            println!("Unreachable: {}", s.unreachable);
            println!("Last run:    {}", s.last_run.as_deref().unwrap_or("-"));
            Ok(())
        }
        Commands::Export { limit } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            for row in db::fetch_listings(&conn, limit)? {
                println!("{}", serde_json::to_string(&row)?);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn crawl(url: &str, settings: Settings) -> anyhow::Result<()> {
    let search = SearchUrl::new(url, settings.sort_direction, settings.sort_field)?;
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;

    let fetcher = Arc::new(HttpFetcher::new(&settings).context("Failed to build HTTP client")?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight requests");
                cancel.cancel();
            }
        });
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:<8} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let span = info_span!("crawl", base = %search.base());
    let crawler = Crawler::new(fetcher, settings)
        .with_span(span)
        .with_cancellation(cancel)
        .with_progress(pb.clone());

    let result = crawler.run(&search).await?;
    pb.finish_and_clear();

    let run_id = db::save_crawl(&conn, search.base().as_str(), &result)?;

    match result.result_count {
        Some(count) => println!("{} results announced, {} pages", count, result.pages_total),
        None => println!("Result count unknown, crawled {} page(s)", result.pages_total),
    }
    println!(
        "Run {}: {} listings ({} ok, {} unreachable, {} not attempted), {} pages skipped, {} pages not attempted{}",
        run_id,
        result.records.len(),
        result.listings_ok(),
        result.listings_skipped,
        result.listings_not_attempted,
        result.pages_skipped,
        result.pages_not_attempted,
        if result.cancelled { " [cancelled]" } else { "" },
    );
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
