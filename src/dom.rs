//! Typed query interface over a parsed HTML document.
//!
//! Field strategies only see [`DomQuery`]; they never walk the tree themselves.
//! All methods return raw element text (not yet whitespace-normalised) and
//! report "nothing found" as an empty `Vec` or `None`.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::ParseError;

pub trait DomQuery {
    /// Text of every element matching a CSS selector, in document order.
    fn select(&self, css: &str) -> Vec<String>;

    /// `href` of every anchor in the document.
    fn hrefs(&self) -> Vec<String>;

    /// Elements named `tag` whose `attr` contains `needle`. With `value`, the
    /// text of the first descendant matching that selector is returned instead
    /// (elements without one are skipped).
    fn find_by_attribute(&self, tag: &str, attr: &str, needle: &str, value: Option<&str>)
        -> Vec<String>;

    /// First `tag` element whose own text contains `label`, climbed up to the
    /// nearest enclosing `tag`, then the text of the first `value` inside it.
    fn find_labeled_container(&self, tag: &str, label: &str, value: &str) -> Option<String>;

    /// Next `tag` sibling of the `tag` element whose whole text is `label`.
    fn find_sibling_of_labeled(&self, tag: &str, label: &str) -> Option<String>;

    /// Content following a `heading` element whose text is `label`.
    ///
    /// `sibling` picks the first following sibling matching that selector
    /// (default: the next sibling element). `value` selects descendants of it
    /// (default: the sibling itself).
    fn find_following_heading(
        &self,
        heading: &str,
        label: &str,
        sibling: Option<&str>,
        value: Option<&str>,
    ) -> Vec<String>;

    /// Key/value entry inside a section introduced by a heading: the `entry`
    /// element whose text is `key`, and the text of its next `entry` sibling.
    fn find_section_entry(
        &self,
        heading: &str,
        label: &str,
        section: &str,
        entry: &str,
        key: &str,
    ) -> Option<String>;
}

/// Collapse runs of whitespace (including newlines and NBSP) to one space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A parsed listing or result page.
///
/// Not `Send`: parse and query it inside one task, never across an `.await`.
pub struct Document {
    html: Html,
}

impl Document {
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ParseError::MalformedDocument(format!("not valid UTF-8: {e}")))?;
        if text.trim().is_empty() {
            return Err(ParseError::MalformedDocument("empty document".into()));
        }
        Ok(Self {
            html: Html::parse_document(text),
        })
    }

    fn elements<'a>(&'a self, css: &str) -> Vec<ElementRef<'a>> {
        match selector(css) {
            Some(sel) => self.html.select(&sel).collect(),
            None => Vec::new(),
        }
    }

    fn headings<'a>(&'a self, heading: &str, label: &str) -> Vec<ElementRef<'a>> {
        self.elements(heading)
            .into_iter()
            .filter(|h| full_text(h) == label)
            .collect()
    }
}

impl DomQuery for Document {
    fn select(&self, css: &str) -> Vec<String> {
        self.elements(css).iter().map(raw_text).collect()
    }

    fn hrefs(&self) -> Vec<String> {
        self.elements("a[href]")
            .iter()
            .filter_map(|a| a.value().attr("href"))
            .map(str::to_string)
            .collect()
    }

    fn find_by_attribute(
        &self,
        tag: &str,
        attr: &str,
        needle: &str,
        value: Option<&str>,
    ) -> Vec<String> {
        let value_sel = match value {
            Some(css) => match selector(css) {
                Some(sel) => Some(sel),
                None => return Vec::new(),
            },
            None => None,
        };

        self.elements(tag)
            .into_iter()
            .filter(|el| el.value().attr(attr).is_some_and(|v| v.contains(needle)))
            .filter_map(|el| match &value_sel {
                Some(sel) => el.select(sel).next().map(|v| raw_text(&v)),
                None => Some(raw_text(&el)),
            })
            .collect()
    }

    fn find_labeled_container(&self, tag: &str, label: &str, value: &str) -> Option<String> {
        let value_sel = selector(value)?;
        self.elements(tag)
            .into_iter()
            .filter(|el| own_text(el).contains(label))
            .find_map(|el| {
                let container = enclosing(&el, tag)?;
                container.select(&value_sel).next().map(|v| raw_text(&v))
            })
    }

    fn find_sibling_of_labeled(&self, tag: &str, label: &str) -> Option<String> {
        self.elements(tag)
            .into_iter()
            .filter(|el| full_text(el) == label)
            .find_map(|el| {
                el.next_siblings()
                    .filter_map(ElementRef::wrap)
                    .find(|s| s.value().name() == tag)
                    .map(|s| raw_text(&s))
            })
    }

    fn find_following_heading(
        &self,
        heading: &str,
        label: &str,
        sibling: Option<&str>,
        value: Option<&str>,
    ) -> Vec<String> {
        let sibling_sel = match sibling.map(selector) {
            Some(None) => return Vec::new(),
            Some(sel) => sel,
            None => None,
        };
        let value_sel = match value.map(selector) {
            Some(None) => return Vec::new(),
            Some(sel) => sel,
            None => None,
        };

        for h in self.headings(heading, label) {
            let Some(next) = following_sibling(&h, sibling_sel.as_ref()) else {
                continue;
            };
            let texts: Vec<String> = match &value_sel {
                Some(sel) => next.select(sel).map(|v| raw_text(&v)).collect(),
                None => vec![raw_text(&next)],
            };
            if !texts.is_empty() {
                return texts;
            }
        }
        Vec::new()
    }

    fn find_section_entry(
        &self,
        heading: &str,
        label: &str,
        section: &str,
        entry: &str,
        key: &str,
    ) -> Option<String> {
        let section_sel = selector(section)?;
        let entry_sel = selector(entry)?;

        self.headings(heading, label).into_iter().find_map(|h| {
            let block = following_sibling(&h, Some(&section_sel))?;
            block
                .select(&entry_sel)
                .filter(|e| full_text(e) == key)
                .find_map(|e| {
                    e.next_siblings()
                        .filter_map(ElementRef::wrap)
                        .find(|s| entry_sel.matches(s))
                        .map(|s| raw_text(&s))
                })
        })
    }
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            debug!(css, error = %e, "invalid selector");
            None
        }
    }
}

fn raw_text(el: &ElementRef) -> String {
    el.text().collect()
}

fn full_text(el: &ElementRef) -> String {
    normalize_whitespace(&raw_text(el))
}

/// Text of the element's direct text children only.
fn own_text(el: &ElementRef) -> String {
    let joined: String = el
        .children()
        .filter_map(|c| c.value().as_text().map(|t| &**t))
        .collect();
    normalize_whitespace(&joined)
}

fn enclosing<'a>(el: &ElementRef<'a>, tag: &str) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == tag)
}

fn following_sibling<'a>(el: &ElementRef<'a>, sel: Option<&Selector>) -> Option<ElementRef<'a>> {
    let mut siblings = el.next_siblings().filter_map(ElementRef::wrap);
    match sel {
        Some(sel) => siblings.find(|s| sel.matches(s)),
        None => siblings.next(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <h1>  Helle   2-Zimmer
             Wohnung </h1>
          <span data-cy="address-street">Musterweg 5</span>
          <span data-cy="address-city">22303 Hamburg</span>
          <div data-cy="deposit-card"><p class="card-content">1.500 €</p></div>
          <div class="costs">
            <div>Kaltmiete</div>
            <strong>900 €</strong>
          </div>
          <sd-cell-row>
            <sd-cell-col class="color-muted">Warmmiete</sd-cell-col>
            <sd-cell-col>1.100 €</sd-cell-col>
          </sd-cell-row>
          <h3>Objektbeschreibung</h3>
          <div><p>Schöne Wohnung.</p></div>
          <h2>Die Wohnung</h2>
          <div class="equipment">
            <p>Kategorie</p><p>Etagenwohnung</p>
            <p>Bezug</p><p>sofort</p>
          </div>
        </body></html>
    "#;

    fn doc() -> Document {
        Document::parse(PAGE.as_bytes()).unwrap()
    }

    #[test]
    fn rejects_empty_and_binary_input() {
        assert!(Document::parse(b"   \n").is_err());
        assert!(Document::parse(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\t b\u{a0}c "), "a b c");
    }

    #[test]
    fn selects_and_finds_attributes() {
        let d = doc();
        assert_eq!(normalize_whitespace(&d.select("h1")[0]), "Helle 2-Zimmer Wohnung");
        assert_eq!(d.find_by_attribute("span", "data-cy", "address", None).len(), 2);
        assert_eq!(
            d.find_by_attribute("div", "data-cy", "depos", Some("p.card-content")),
            vec!["1.500 €".to_string()]
        );
    }

    #[test]
    fn labeled_lookups() {
        let d = doc();
        assert_eq!(
            d.find_labeled_container("div", "Kaltmiete", "strong").as_deref(),
            Some("900 €")
        );
        assert_eq!(
            d.find_sibling_of_labeled("sd-cell-col", "Warmmiete").as_deref(),
            Some("1.100 €")
        );
        assert!(d.find_sibling_of_labeled("sd-cell-col", "Nebenkosten").is_none());
    }

    #[test]
    fn heading_lookups() {
        let d = doc();
        assert_eq!(
            d.find_following_heading("h3", "Objektbeschreibung", None, Some("p")),
            vec!["Schöne Wohnung.".to_string()]
        );
        assert_eq!(
            d.find_section_entry("h2", "Die Wohnung", "div.equipment", "p", "Kategorie")
                .as_deref(),
            Some("Etagenwohnung")
        );
        assert!(d
            .find_section_entry("h2", "Die Wohnung", "div.equipment", "p", "Wohnungslage")
            .is_none());
    }

    #[test]
    fn invalid_selector_finds_nothing() {
        let d = doc();
        assert!(d.select("div[").is_empty());
        assert!(d.find_labeled_container("div", "Kaltmiete", "[[").is_none());
    }
}
