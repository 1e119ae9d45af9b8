use std::sync::LazyLock;

use super::field::{FieldKind, FieldSpec, Locator, Strategy};

/// Deposits at or below this are qualitative notes ("3 Kaltmieten"), not amounts.
pub const DEPOSIT_FLOOR: f64 = 500.0;

/// The fields every listing record carries, with one fallback chain each.
pub static LISTING_SCHEMA: LazyLock<Vec<FieldSpec>> = LazyLock::new(build_schema);

const FLAT_HEADING: &str = "Die Wohnung";
const FLAT_SECTION: &str = "div.equipment";

fn flat_entry(key: &'static str) -> Strategy {
    Strategy::new(Locator::SectionEntry {
        heading: "h2",
        label: FLAT_HEADING,
        section: FLAT_SECTION,
        entry: "p",
        key,
    })
}

fn hardfact(label: &'static str, value: &'static str) -> Strategy {
    Strategy::new(Locator::LabeledContainer {
        tag: "div",
        label,
        value,
    })
}

fn text_block(label: &'static str) -> Strategy {
    Strategy::new(Locator::FollowingHeading {
        heading: "h3",
        label,
        sibling: None,
        value: Some("p"),
    })
}

fn build_schema() -> Vec<FieldSpec> {
    use FieldKind::*;

    vec![
        FieldSpec::new("title", Text, vec![Strategy::new(Locator::Select("h1"))]),
        FieldSpec::new(
            "address",
            Text,
            vec![Strategy::new(Locator::Attribute {
                tag: "span",
                attr: "data-cy",
                needle: "address",
                value: None,
            })
            .all()],
        ),
        FieldSpec::new(
            "cold_rent",
            Decimal { floor: None },
            vec![hardfact("Kaltmiete", "strong")],
        ),
        FieldSpec::new(
            "warm_rent",
            Decimal { floor: None },
            vec![
                Strategy::new(Locator::SiblingOfLabeled {
                    tag: "sd-cell-col",
                    label: "Warmmiete",
                }),
                hardfact("Warmmiete", "strong"),
            ],
        ),
        FieldSpec::new(
            "deposit",
            Decimal {
                floor: Some(DEPOSIT_FLOOR),
            },
            vec![Strategy::new(Locator::Attribute {
                tag: "div",
                attr: "data-cy",
                needle: "depos",
                value: Some("p.card-content"),
            })],
        ),
        FieldSpec::new(
            "living_space",
            Decimal { floor: None },
            vec![hardfact("Wohnfläche", "span").token(0)],
        ),
        FieldSpec::new(
            "room_number",
            Decimal { floor: None },
            vec![hardfact("Zimmer", "span")],
        ),
        FieldSpec::new("category", Category, vec![flat_entry("Kategorie")]),
        FieldSpec::new("floor", Text, vec![flat_entry("Wohnungslage")]),
        FieldSpec::new("availability", Date, vec![flat_entry("Bezug")]),
        FieldSpec::new(
            "amenities",
            Text,
            vec![Strategy::new(Locator::FollowingHeading {
                heading: "h2",
                label: FLAT_HEADING,
                sibling: Some("div.textlist--icon"),
                value: Some("li"),
            })
            .all()],
        ),
        FieldSpec::new(
            "built_year",
            Integer,
            vec![Strategy::new(Locator::FollowingHeading {
                heading: "h3",
                label: "Wohnanlage",
                sibling: Some("div"),
                value: Some("li"),
            })
            .token(1)],
        ),
        FieldSpec::new(
            "energy_consumption",
            Decimal { floor: None },
            vec![Strategy::new(Locator::Attribute {
                tag: "sd-cell-col",
                attr: "data-cy",
                needle: "energy-consumption",
                value: None,
            })
            .token(1)],
        ),
        FieldSpec::new("object_description", Text, vec![text_block("Objektbeschreibung")]),
        FieldSpec::new("furnishing", Text, vec![text_block("Ausstattung")]),
        FieldSpec::new("extra", Text, vec![text_block("Weitere Informationen")]),
    ]
}

pub fn field_names() -> impl Iterator<Item = &'static str> {
    LISTING_SCHEMA.iter().map(|f| f.name)
}
