use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::dom::{normalize_whitespace, Document, DomQuery};
use crate::error::CrawlError;
use crate::fetch::Fetcher;
use crate::model::PageUrl;

const PAGE_PARAM: &str = "sp";
const DIRECTION_PARAM: &str = "sd";
const FIELD_PARAM: &str = "sf";

/// Pages crawled at most when no explicit page limit is configured.
pub const PAGE_CAP: u32 = 500;

/// Leading count token of a heading: digits, optionally grouped in thousands
/// by `.`, `,`, NBSP or space, followed by whitespace or the end.
static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3}(?:[.,\u{a0} ]\d{3})+|\d+)(?:\s|$)").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Desc,
    Asc,
}

impl SortDirection {
    pub fn as_param(self) -> &'static str {
        match self {
            SortDirection::Desc => "DESC",
            SortDirection::Asc => "ASC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortField {
    Relevance,
    Price,
    LivingArea,
    Timestamp,
}

impl SortField {
    pub fn as_param(self) -> &'static str {
        match self {
            SortField::Relevance => "RELEVANCE",
            SortField::Price => "PRICE",
            SortField::LivingArea => "LIVING_AREA",
            SortField::Timestamp => "TIMESTAMP",
        }
    }
}

/// Validated base URL of a search, with its sort parameters filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchUrl {
    base: Url,
}

impl SearchUrl {
    /// Parameters already present on `base` win over `direction`/`field`.
    pub fn new(base: &str, direction: SortDirection, field: SortField) -> Result<Self, CrawlError> {
        let invalid = |reason: String| CrawlError::InvalidBaseUrl {
            url: base.to_string(),
            reason,
        };

        let mut url = Url::parse(base.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".into()));
        }
        url.set_fragment(None);

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != PAGE_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        for (key, value) in [
            ("d", "true"),
            (DIRECTION_PARAM, direction.as_param()),
            (FIELD_PARAM, field.as_param()),
        ] {
            if !pairs.iter().any(|(k, _)| k == key) {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
        url.query_pairs_mut().clear().extend_pairs(pairs);

        Ok(Self { base: url })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// URL of result page `number`; every other parameter keeps its value and position.
    pub fn page(&self, number: u32) -> PageUrl {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair(PAGE_PARAM, &number.to_string());
        PageUrl::new(number, url)
    }
}

/// Result count announced at the start of the first heading that leads with one.
/// Digits elsewhere in a heading (postal codes, years) are not a count.
pub fn parse_result_count(doc: &impl DomQuery) -> Option<u64> {
    ["h1", "h2"].iter().find_map(|tag| {
        doc.select(tag).iter().find_map(|text| {
            let text = normalize_whitespace(text);
            let token = COUNT_RE.captures(&text)?.get(1)?.as_str();
            let digits: String = token.chars().filter(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
    })
}

pub fn page_count(count: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 0;
    }
    count.div_ceil(page_size)
}

#[derive(Debug, Clone)]
pub struct PageEnumeration {
    /// `None` when the first page was unreachable or had no usable count.
    pub result_count: Option<u64>,
    pub pages: Vec<PageUrl>,
}

impl PageEnumeration {
    pub fn is_best_effort(&self) -> bool {
        self.result_count.unwrap_or(0) == 0
    }
}

/// Fetch the first result page and derive the ordered list of page URLs.
///
/// Never fails: an unknown or zero count degrades to a single page.
pub async fn enumerate(
    fetcher: &dyn Fetcher,
    search: &SearchUrl,
    page_size: u64,
    max_pages: Option<usize>,
) -> PageEnumeration {
    let first = search.page(1);
    let result_count = match fetcher.fetch(first.url()).await {
        Ok(raw) => count_from_bytes(&raw),
        Err(e) => {
            warn!(url = %first.url(), error = %e, "first result page unreachable");
            None
        }
    };

    let total = match result_count {
        Some(count) if count > 0 => page_count(count, page_size),
        _ => {
            warn!(url = %search.base(), "result count unknown, crawling first page only");
            1
        }
    };
    let total = u32::try_from(total).unwrap_or(u32::MAX);
    let limit = match max_pages {
        Some(m) => total.min(u32::try_from(m).unwrap_or(u32::MAX)),
        None if total > PAGE_CAP => {
            warn!(pages = total, cap = PAGE_CAP, "page count implausible, capping");
            PAGE_CAP
        }
        None => total,
    };

    info!(?result_count, pages = total, limit, "enumerated result pages");
    let pages = (1..=limit).map(|n| search.page(n)).collect();
    PageEnumeration {
        result_count,
        pages,
    }
}

fn count_from_bytes(raw: &[u8]) -> Option<u64> {
    match Document::parse(raw) {
        Ok(doc) => parse_result_count(&doc),
        Err(e) => {
            warn!(error = %e, "first result page unparsable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::StaticFetcher;

    const BASE: &str = "https://www.immowelt.de/liste/hamburg/wohnungen/mieten";

    fn search() -> SearchUrl {
        SearchUrl::new(BASE, SortDirection::Desc, SortField::Relevance).unwrap()
    }

    fn doc(html: &str) -> Document {
        Document::parse(html.as_bytes()).unwrap()
    }

    #[test]
    fn ceil_page_count() {
        assert_eq!(page_count(41, 20), 3);
        assert_eq!(page_count(40, 20), 2);
        assert_eq!(page_count(1, 20), 1);
        assert_eq!(page_count(0, 20), 0);
    }

    #[test]
    fn count_with_thousands_separator() {
        assert_eq!(parse_result_count(&doc("<h1>1.234 Wohnungen zur Miete</h1>")), Some(1234));
        assert_eq!(parse_result_count(&doc("<h1>12,345 results</h1>")), Some(12345));
        assert_eq!(parse_result_count(&doc("<h1>41 Wohnungen</h1>")), Some(41));
    }

    #[test]
    fn count_skips_headings_without_digits() {
        let d = doc("<h1>Wohnungen mieten</h1><h2>87 Angebote in Hamburg</h2>");
        assert_eq!(parse_result_count(&d), Some(87));
        assert_eq!(parse_result_count(&doc("<h1>Keine Treffer</h1>")), None);
    }

    #[test]
    fn digits_inside_heading_are_not_a_count() {
        assert_eq!(
            parse_result_count(&doc("<h1>Wohnungen mieten in 22303 Hamburg</h1>")),
            None
        );
        assert_eq!(parse_result_count(&doc("<h1>Neubau 2024 in Hamburg</h1>")), None);
        assert_eq!(parse_result_count(&doc("<h1>2024er Neubau</h1>")), None);
        assert_eq!(parse_result_count(&doc("<h1>1 234 Wohnungen</h1>")), Some(1234));
    }

    #[test]
    fn page_urls_keep_sort_parameters() {
        let s = search();
        let p3 = s.page(3);
        assert_eq!(p3.number(), 3);
        assert_eq!(
            p3.url().as_str(),
            format!("{BASE}?d=true&sd=DESC&sf=RELEVANCE&sp=3")
        );
    }

    #[test]
    fn base_parameters_win_and_page_is_replaced() {
        let s = SearchUrl::new(
            &format!("{BASE}?sort=relevanz&sd=ASC&sp=9"),
            SortDirection::Desc,
            SortField::Price,
        )
        .unwrap();
        assert_eq!(
            s.page(2).url().as_str(),
            format!("{BASE}?sort=relevanz&sd=ASC&d=true&sf=PRICE&sp=2")
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        for bad in ["not a url", "ftp://example.com/list", "mailto:a@b.c"] {
            assert!(matches!(
                SearchUrl::new(bad, SortDirection::Desc, SortField::Relevance),
                Err(CrawlError::InvalidBaseUrl { .. })
            ));
        }
    }

    #[tokio::test]
    async fn enumerates_pages_from_first_page() {
        let s = search();
        let fetcher =
            StaticFetcher::new().with(s.page(1).url(), "<h1>41 Wohnungen zur Miete</h1>");
        let e = enumerate(&fetcher, &s, 20, None).await;
        assert_eq!(e.result_count, Some(41));
        let numbers: Vec<u32> = e.pages.iter().map(PageUrl::number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn max_pages_caps_the_sequence() {
        let s = search();
        let fetcher = StaticFetcher::new().with(s.page(1).url(), "<h1>1.000 Wohnungen</h1>");
        let e = enumerate(&fetcher, &s, 20, Some(4)).await;
        assert_eq!(e.pages.len(), 4);
    }

    #[tokio::test]
    async fn postal_code_heading_is_a_single_page() {
        let s = search();
        let fetcher = StaticFetcher::new()
            .with(s.page(1).url(), "<h1>Wohnungen mieten in 22303 Hamburg</h1>");
        let e = enumerate(&fetcher, &s, 20, None).await;
        assert_eq!(e.result_count, None);
        assert_eq!(e.pages, vec![s.page(1)]);
    }

    #[tokio::test]
    async fn huge_count_is_capped_without_page_limit() {
        let s = search();
        let fetcher =
            StaticFetcher::new().with(s.page(1).url(), "<h1>987654321987 Wohnungen</h1>");
        let e = enumerate(&fetcher, &s, 20, None).await;
        assert_eq!(e.pages.len(), PAGE_CAP as usize);
        assert_eq!(e.pages.last().map(PageUrl::number), Some(PAGE_CAP));
    }

    #[tokio::test]
    async fn unknown_count_degrades_to_single_page() {
        let s = search();
        let no_count = StaticFetcher::new().with(s.page(1).url(), "<h1>Wohnungen</h1>");
        let e = enumerate(&no_count, &s, 20, None).await;
        assert_eq!(e.result_count, None);
        assert_eq!(e.pages, vec![s.page(1)]);
        assert!(e.is_best_effort());

        let unreachable = StaticFetcher::new();
        let e = enumerate(&unreachable, &s, 20, None).await;
        assert_eq!(e.pages.len(), 1);
    }
}
