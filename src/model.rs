use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use url::Url;

/// Query parameters that only affect pagination or ordering of a result list.
/// They never identify a listing and are dropped from listing links.
const NOISE_PARAMS: &[&str] = &["sp", "sd", "sf", "d", "sort", "page"];

/// One result page of a search, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrl {
    number: u32,
    url: Url,
}

impl PageUrl {
    pub fn new(number: u32, url: Url) -> Self {
        Self { number, url }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for PageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} ({})", self.number, self.url)
    }
}

/// Canonical URL of one listing ("expose").
///
/// Equality, ordering and hashing all go through the canonical URL, so two
/// hrefs that differ only in fragment, sort/pagination noise, parameter order
/// or a trailing slash compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ListingLink(Url);

impl ListingLink {
    /// Resolve `href` against the page it was found on and canonicalize it.
    pub fn resolve(page: &Url, href: &str) -> Option<Self> {
        let url = page.join(href.trim()).ok()?;
        Self::canonical(url)
    }

    pub fn canonical(mut url: Url) -> Option<Self> {
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return None;
        }
        url.set_fragment(None);

        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !NOISE_PARAMS.iter().any(|noise| k == noise))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort();
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }

        let trimmed = url.path().trim_end_matches('/').to_string();
        if !trimmed.is_empty() {
            url.set_path(&trimmed);
        }
        Some(Self(url))
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ListingLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// A typed value pulled out of a listing document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Decimal(f64),
    Integer(i64),
    Date(NaiveDate),
    Category(String),
}

impl FieldValue {
    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            FieldValue::Decimal(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::Category(s) => Some(s),
            _ => None,
        }
    }
}

/// Outcome of extracting one field. `Absent` is an ordinary result.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldResult {
    Present(FieldValue),
    #[default]
    Absent,
}

impl FieldResult {
    pub fn is_present(&self) -> bool {
        matches!(self, FieldResult::Present(_))
    }

    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            FieldResult::Present(v) => Some(v),
            FieldResult::Absent => None,
        }
    }
}

impl From<Option<FieldValue>> for FieldResult {
    fn from(value: Option<FieldValue>) -> Self {
        value.map_or(FieldResult::Absent, FieldResult::Present)
    }
}

impl Serialize for FieldResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldResult::Present(v) => serializer.serialize_some(v),
            FieldResult::Absent => serializer.serialize_none(),
        }
    }
}

/// Whether the listing document itself could be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    Fetched,
    Unreachable { reason: String },
}

/// Every schema field of one listing, captured at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct ListingRecord {
    link: ListingLink,
    fields: BTreeMap<&'static str, FieldResult>,
    captured_at: DateTime<Utc>,
    #[serde(flatten)]
    status: DocumentStatus,
}

impl ListingRecord {
    pub fn new(
        link: ListingLink,
        fields: BTreeMap<&'static str, FieldResult>,
        captured_at: DateTime<Utc>,
        status: DocumentStatus,
    ) -> Self {
        Self {
            link,
            fields,
            captured_at,
            status,
        }
    }

    pub fn link(&self) -> &ListingLink {
        &self.link
    }

    pub fn fields(&self) -> &BTreeMap<&'static str, FieldResult> {
        &self.fields
    }

    /// `Absent` both for missing fields and for names outside the schema.
    pub fn field(&self, name: &str) -> &FieldResult {
        static ABSENT: FieldResult = FieldResult::Absent;
        self.fields.get(name).unwrap_or(&ABSENT)
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn status(&self) -> &DocumentStatus {
        &self.status
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self.status, DocumentStatus::Unreachable { .. })
    }

    pub fn present_count(&self) -> usize {
        self.fields.values().filter(|f| f.is_present()).count()
    }
}

/// Everything a crawl produced, plus counters of what it had to skip.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    pub records: Vec<ListingRecord>,
    /// Result count read from the first page, if it could be found.
    pub result_count: Option<u64>,
    pub pages_total: usize,
    pub pages_skipped: usize,
    pub pages_not_attempted: usize,
    pub links_found: usize,
    pub listings_skipped: usize,
    /// Links that were known but never submitted because the crawl was cancelled
    /// or capped by `max_listings`.
    pub listings_not_attempted: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CrawlResult {
    pub fn listings_ok(&self) -> usize {
        self.records.len() - self.listings_skipped
    }
}
