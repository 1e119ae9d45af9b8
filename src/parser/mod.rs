pub mod field;
pub mod normalize;
pub mod schema;

use std::collections::BTreeMap;

use chrono::{DateTime, Local, Utc};
use tracing::{debug, warn};

use crate::dom::{Document, DomQuery};
use crate::error::DocumentError;
use crate::fetch::Fetcher;
use crate::model::{DocumentStatus, FieldResult, ListingLink, ListingRecord};
use field::{extract_field, FieldSpec};
use schema::LISTING_SCHEMA;

/// Run every schema field against one parsed listing document.
pub fn extract_listing<D: DomQuery + ?Sized>(
    doc: &D,
    link: ListingLink,
    captured_at: DateTime<Utc>,
) -> ListingRecord {
    extract_with_schema(doc, &LISTING_SCHEMA, link, captured_at)
}

pub fn extract_with_schema<D: DomQuery + ?Sized>(
    doc: &D,
    schema: &[FieldSpec],
    link: ListingLink,
    captured_at: DateTime<Utc>,
) -> ListingRecord {
    let today = captured_at.with_timezone(&Local).date_naive();
    let fields = schema
        .iter()
        .map(|spec| (spec.name, extract_field(doc, spec, today)))
        .collect();
    ListingRecord::new(link, fields, captured_at, DocumentStatus::Fetched)
}

/// Record for a listing whose document could not be obtained: every field absent.
pub fn unreachable_listing(
    link: ListingLink,
    captured_at: DateTime<Utc>,
    error: &DocumentError,
) -> ListingRecord {
    let fields: BTreeMap<_, _> = schema::field_names()
        .map(|name| (name, FieldResult::Absent))
        .collect();
    ListingRecord::new(
        link,
        fields,
        captured_at,
        DocumentStatus::Unreachable {
            reason: error.to_string(),
        },
    )
}

/// Parse a fetched body (or take the fetch failure) and produce exactly one record.
pub fn listing_from_fetch(
    fetched: Result<Vec<u8>, DocumentError>,
    link: ListingLink,
    captured_at: DateTime<Utc>,
) -> ListingRecord {
    match fetched.and_then(|raw| Document::parse(&raw).map_err(DocumentError::from)) {
        Ok(doc) => {
            let record = extract_listing(&doc, link, captured_at);
            debug!(
                url = %record.link(),
                present = record.present_count(),
                total = record.fields().len(),
                "extracted listing"
            );
            record
        }
        Err(e) => {
            warn!(url = %link, error = %e, "listing unreachable");
            unreachable_listing(link, captured_at, &e)
        }
    }
}

/// Fetch one listing once and extract it. Always returns a record.
pub async fn fetch_listing(fetcher: &dyn Fetcher, link: ListingLink) -> ListingRecord {
    let fetched = fetcher.fetch(link.url()).await.map_err(DocumentError::from);
    listing_from_fetch(fetched, link, Utc::now())
}

// ── Tests ──
