use std::collections::BTreeSet;

use tracing::{debug, warn};
use url::Url;

use crate::dom::{Document, DomQuery};
use crate::error::DocumentError;
use crate::fetch::Fetcher;
use crate::model::{ListingLink, PageUrl};

const LISTING_MARKER: &str = "/expose/";
/// Project listings live under `/projekte/expose/`, which also contains the listing marker.
const PROJECT_MARKER: &str = "/projekte/expose/";

/// Outcome of harvesting one result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageHarvest {
    Harvested(BTreeSet<ListingLink>),
    Skipped { reason: String },
}

pub fn is_listing_path(path: &str) -> bool {
    path.contains(LISTING_MARKER) && !path.contains(PROJECT_MARKER)
}

/// Listing links on one parsed page, canonicalized and deduplicated.
pub fn harvest_links(doc: &impl DomQuery, page: &Url) -> BTreeSet<ListingLink> {
    doc.hrefs()
        .iter()
        .filter_map(|href| ListingLink::resolve(page, href))
        .filter(|link| is_listing_path(link.url().path()))
        .collect()
}

/// Fetch and harvest one page. Failures are reported as `Skipped`, never raised.
pub async fn harvest_page(fetcher: &dyn Fetcher, page: &PageUrl) -> PageHarvest {
    let outcome = match fetcher.fetch(page.url()).await {
        Ok(raw) => links_from_bytes(&raw, page.url()),
        Err(e) => Err(DocumentError::from(e)),
    };

    match outcome {
        Ok(links) => {
            debug!(page = page.number(), links = links.len(), "harvested page");
            PageHarvest::Harvested(links)
        }
        Err(e) => {
            warn!(page = page.number(), url = %page.url(), error = %e, "skipping page");
            PageHarvest::Skipped {
                reason: e.to_string(),
            }
        }
    }
}

fn links_from_bytes(raw: &[u8], page: &Url) -> Result<BTreeSet<ListingLink>, DocumentError> {
    let doc = Document::parse(raw)?;
    Ok(harvest_links(&doc, page))
}
