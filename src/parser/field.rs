use chrono::NaiveDate;
use tracing::trace;

use super::normalize::{parse_date, parse_decimal, parse_integer, token};
use crate::dom::{normalize_whitespace, DomQuery};
use crate::model::{FieldResult, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    Text,
    /// Values at or below `floor` are implausible and reported as absent.
    Decimal { floor: Option<f64> },
    Integer,
    Date,
    Category,
}

/// Where a strategy looks in the document. Each variant maps onto one
/// [`DomQuery`] capability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Locator {
    Select(&'static str),
    Attribute {
        tag: &'static str,
        attr: &'static str,
        needle: &'static str,
        value: Option<&'static str>,
    },
    LabeledContainer {
        tag: &'static str,
        label: &'static str,
        value: &'static str,
    },
    SiblingOfLabeled {
        tag: &'static str,
        label: &'static str,
    },
    FollowingHeading {
        heading: &'static str,
        label: &'static str,
        sibling: Option<&'static str>,
        value: Option<&'static str>,
    },
    SectionEntry {
        heading: &'static str,
        label: &'static str,
        section: &'static str,
        entry: &'static str,
        key: &'static str,
    },
}

impl Locator {
    fn locate<D: DomQuery + ?Sized>(&self, doc: &D) -> Vec<String> {
        match *self {
            Locator::Select(css) => doc.select(css),
            Locator::Attribute {
                tag,
                attr,
                needle,
                value,
            } => doc.find_by_attribute(tag, attr, needle, value),
            Locator::LabeledContainer { tag, label, value } => {
                doc.find_labeled_container(tag, label, value).into_iter().collect()
            }
            Locator::SiblingOfLabeled { tag, label } => {
                doc.find_sibling_of_labeled(tag, label).into_iter().collect()
            }
            Locator::FollowingHeading {
                heading,
                label,
                sibling,
                value,
            } => doc.find_following_heading(heading, label, sibling, value),
            Locator::SectionEntry {
                heading,
                label,
                section,
                entry,
                key,
            } => doc
                .find_section_entry(heading, label, section, entry, key)
                .into_iter()
                .collect(),
        }
    }
}

/// How located texts become one string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Take {
    First,
    /// Every non-empty match, joined with `", "`.
    All,
    /// Whitespace token `n` of the first match.
    Token(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Strategy {
    pub locator: Locator,
    pub take: Take,
}

impl Strategy {
    pub const fn new(locator: Locator) -> Self {
        Self {
            locator,
            take: Take::First,
        }
    }

    pub const fn all(mut self) -> Self {
        self.take = Take::All;
        self
    }

    pub const fn token(mut self, index: usize) -> Self {
        self.take = Take::Token(index);
        self
    }

    /// Normalised content this strategy locates, or `None` when it finds nothing.
    pub fn apply<D: DomQuery + ?Sized>(&self, doc: &D) -> Option<String> {
        let mut texts = self
            .locator
            .locate(doc)
            .into_iter()
            .map(|t| normalize_whitespace(&t))
            .filter(|t| !t.is_empty());

        match self.take {
            Take::First => texts.next(),
            Take::All => {
                let joined = texts.collect::<Vec<_>>().join(", ");
                (!joined.is_empty()).then_some(joined)
            }
            Take::Token(n) => texts.next().and_then(|t| token(&t, n).map(str::to_string)),
        }
    }
}

/// One extractable attribute and its fallback chain.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub strategies: Vec<Strategy>,
}

impl FieldSpec {
    pub fn new(name: &'static str, kind: FieldKind, strategies: Vec<Strategy>) -> Self {
        Self {
            name,
            kind,
            strategies,
        }
    }
}

/// Run the fallback chain; the first strategy that finds content decides the result.
pub fn extract_field<D: DomQuery + ?Sized>(
    doc: &D,
    spec: &FieldSpec,
    today: NaiveDate,
) -> FieldResult {
    let Some((index, text)) = spec
        .strategies
        .iter()
        .enumerate()
        .find_map(|(i, s)| s.apply(doc).map(|t| (i, t)))
    else {
        trace!(field = spec.name, "no strategy located content");
        return FieldResult::Absent;
    };

    let value = convert(spec.kind, &text, today);
    if value.is_none() {
        trace!(field = spec.name, strategy = index, raw = %text, "content rejected");
    }
    value.into()
}

fn convert(kind: FieldKind, text: &str, today: NaiveDate) -> Option<FieldValue> {
    match kind {
        FieldKind::Text => Some(FieldValue::Text(text.to_string())),
        FieldKind::Category => Some(FieldValue::Category(text.to_string())),
        FieldKind::Decimal { floor } => parse_decimal(text)
            .filter(|v| v.is_finite())
            .filter(|v| floor.map_or(true, |f| *v > f))
            .map(FieldValue::Decimal),
        FieldKind::Integer => parse_integer(text).map(FieldValue::Integer),
        FieldKind::Date => parse_date(text, today).map(FieldValue::Date),
    }
}
