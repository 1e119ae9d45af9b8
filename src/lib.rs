pub mod config;
pub mod crawler;
pub mod db;
pub mod dom;
pub mod error;
pub mod fetch;
pub mod links;
pub mod model;
pub mod pages;
pub mod parser;

pub use config::Settings;
pub use crawler::Crawler;
pub use error::{CrawlError, DocumentError, FetchError, ParseError};
pub use fetch::{Fetcher, HttpFetcher};
pub use model::{CrawlResult, FieldResult, FieldValue, ListingLink, ListingRecord};
pub use pages::{SearchUrl, SortDirection, SortField};
