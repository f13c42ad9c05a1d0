//! Declarative extraction rules and the interpreter that runs them.
//!
//! A rule names a root scope, an optional item scope inside it, and a list
//! of field specs. Each field spec says where to look (a CSS selector
//! relative to the item, or the item itself), what to read (text, leading
//! text node, inner HTML, an attribute, or every match joined), how to clean
//! it up, and what to fall back to. Rules are plain data over HTML text and
//! can be evaluated without a browser.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

use scraper::{ElementRef, Html, Selector};

use crate::pool::Session;
use crate::types::{ScoutError, ScoutResult};

/// What a field reads from the node its locator finds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// All descendant text.
    Text,
    /// Only the node's first child: its text if it is a text node, otherwise
    /// the text of that child element.
    LeadingText,
    /// Serialized inner HTML.
    InnerHtml,
    /// An attribute value.
    Attr(&'static str),
    /// The text of every match, in document order, joined by the separator.
    Joined(&'static str),
}

impl Source {
    fn read(&self, node: ElementRef<'_>) -> Option<String> {
        match self {
            Source::Text | Source::Joined(_) => Some(node.text().collect()),
            Source::LeadingText => node.children().next().map(|first| {
                if let Some(text) = first.value().as_text() {
                    text.to_string()
                } else if let Some(element) = ElementRef::wrap(first) {
                    element.text().collect()
                } else {
                    String::new()
                }
            }),
            Source::InnerHtml => Some(node.inner_html()),
            Source::Attr(name) => node.value().attr(name).map(str::to_string),
        }
    }
}

/// Clean-up step applied after whitespace normalization.
///
/// Every step trims the result again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    StripPrefix(String),
    StripSuffix(String),
    /// Remove a character repeated at either end.
    TrimChar(char),
}

impl Transform {
    fn apply(&self, value: String) -> String {
        let out = match self {
            Transform::StripPrefix(prefix) => value.strip_prefix(prefix.as_str()).unwrap_or(&value),
            Transform::StripSuffix(suffix) => value.strip_suffix(suffix.as_str()).unwrap_or(&value),
            Transform::TrimChar(c) => value.trim_matches(*c),
        };
        out.trim().to_string()
    }
}

/// One output field of a rule.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: &'static str,
    /// Selector relative to the item scope; `None` reads the item node itself.
    locator: Option<&'static str>,
    source: Source,
    transforms: Vec<Transform>,
    default: &'static str,
}

impl FieldSpec {
    pub fn new(name: &'static str, locator: Option<&'static str>, source: Source) -> Self {
        Self {
            name,
            locator,
            source,
            transforms: Vec::new(),
            default: "",
        }
    }

    pub fn text(name: &'static str, locator: &'static str) -> Self {
        Self::new(name, Some(locator), Source::Text)
    }

    pub fn leading_text(name: &'static str, locator: &'static str) -> Self {
        Self::new(name, Some(locator), Source::LeadingText)
    }

    pub fn inner_html(name: &'static str, locator: &'static str) -> Self {
        Self::new(name, Some(locator), Source::InnerHtml)
    }

    pub fn attr(name: &'static str, locator: &'static str, attr: &'static str) -> Self {
        Self::new(name, Some(locator), Source::Attr(attr))
    }

    pub fn joined(name: &'static str, locator: &'static str, separator: &'static str) -> Self {
        Self::new(name, Some(locator), Source::Joined(separator))
    }

    /// Text of the item node itself.
    pub fn own_text(name: &'static str) -> Self {
        Self::new(name, None, Source::Text)
    }

    /// Attribute of the item node itself.
    pub fn own_attr(name: &'static str, attr: &'static str) -> Self {
        Self::new(name, None, Source::Attr(attr))
    }

    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.transforms.push(Transform::StripPrefix(prefix.into()));
        self
    }

    pub fn strip_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.transforms.push(Transform::StripSuffix(suffix.into()));
        self
    }

    pub fn trim_char(mut self, c: char) -> Self {
        self.transforms.push(Transform::TrimChar(c));
        self
    }

    /// Value used when the node is missing or the cleaned value is empty.
    pub fn or_default(mut self, default: &'static str) -> Self {
        self.default = default;
        self
    }
}

/// Extracted values of one record, by field name.
#[derive(Debug, Clone, Default)]
pub struct FieldValues {
    values: HashMap<&'static str, String>,
}

impl FieldValues {
    /// Move a value out; missing fields come back empty.
    pub fn take(&mut self, name: &str) -> String {
        self.values.remove(name).unwrap_or_default()
    }

    /// Move a value out, treating an empty value as absent.
    pub fn take_non_empty(&mut self, name: &str) -> Option<String> {
        self.values.remove(name).filter(|v| !v.is_empty())
    }
}

/// A record shape that can be built from extracted field values.
pub trait Record: Sized + Send + 'static {
    fn from_fields(fields: FieldValues) -> Self;
}

#[derive(Debug)]
struct CompiledField {
    spec: FieldSpec,
    selector: Option<Selector>,
}

impl CompiledField {
    fn evaluate(&self, scope: ElementRef<'_>) -> String {
        let value = match &self.spec.source {
            Source::Joined(separator) => {
                let parts: Vec<String> = self
                    .targets(scope)
                    .filter_map(|node| self.spec.source.read(node))
                    .map(|raw| normalize_whitespace(&raw))
                    .filter(|text| !text.is_empty())
                    .collect();
                Some(parts.join(separator))
            }
            source => self
                .targets(scope)
                .next()
                .and_then(|node| source.read(node))
                .map(|raw| normalize_whitespace(&raw)),
        };

        let cleaned = value
            .map(|v| self.spec.transforms.iter().fold(v, |acc, t| t.apply(acc)))
            .unwrap_or_default();
        if cleaned.is_empty() {
            self.spec.default.to_string()
        } else {
            cleaned
        }
    }

    fn targets<'a>(&'a self, scope: ElementRef<'a>) -> Box<dyn Iterator<Item = ElementRef<'a>> + 'a> {
        match &self.selector {
            Some(selector) => Box::new(scope.select(selector)),
            None => Box::new(std::iter::once(scope)),
        }
    }
}

/// A compiled extraction rule producing records of type `T`.
#[derive(Debug)]
pub struct ExtractionRule<T> {
    name: &'static str,
    root_locator: &'static str,
    root: Selector,
    items: Option<Selector>,
    fields: Vec<CompiledField>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> ExtractionRule<T> {
    /// Compile a rule. Every selector is parsed here, so a malformed one
    /// fails at construction rather than per request.
    pub fn new(
        name: &'static str,
        root: &'static str,
        items: Option<&'static str>,
        fields: Vec<FieldSpec>,
    ) -> ScoutResult<Self> {
        let fields = fields
            .into_iter()
            .map(|spec| {
                let selector = spec.locator.map(|css| compile(name, css)).transpose()?;
                Ok(CompiledField { spec, selector })
            })
            .collect::<ScoutResult<Vec<_>>>()?;

        Ok(Self {
            name,
            root_locator: root,
            root: compile(name, root)?,
            items: items.map(|css| compile(name, css)).transpose()?,
            fields,
            _record: PhantomData,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// CSS selector of the root scope, usable as a readiness marker.
    pub fn root_locator(&self) -> &'static str {
        self.root_locator
    }

    /// Every record in document order. No root scope means no records.
    pub fn extract_all(&self, html: &str) -> Vec<T> {
        let document = Html::parse_document(html);
        self.item_scopes(&document)
            .into_iter()
            .map(|scope| self.record(scope))
            .collect()
    }

    /// The first record, or `None` when the root scope is absent.
    pub fn extract_one(&self, html: &str) -> Option<T> {
        let document = Html::parse_document(html);
        self.item_scopes(&document)
            .into_iter()
            .next()
            .map(|scope| self.record(scope))
    }

    fn item_scopes<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        let mut seen = HashSet::new();
        let mut scopes = Vec::new();
        for root in document.select(&self.root) {
            match &self.items {
                Some(items) => scopes.extend(root.select(items).filter(|item| seen.insert(item.id()))),
                None => {
                    if seen.insert(root.id()) {
                        scopes.push(root);
                    }
                }
            }
        }
        scopes
    }

    fn record(&self, scope: ElementRef<'_>) -> T {
        let values = self
            .fields
            .iter()
            .map(|field| (field.spec.name, field.evaluate(scope)))
            .collect();
        T::from_fields(FieldValues { values })
    }
}

fn compile(rule: &str, css: &str) -> ScoutResult<Selector> {
    Selector::parse(css)
        .map_err(|e| ScoutError::InvalidRule(format!("rule '{rule}': bad selector '{css}': {e}")))
}

/// Collapse whitespace runs to one space and trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Run a list rule against the session's current document.
pub async fn extract_list<T: Record>(session: &Session, rule: &ExtractionRule<T>) -> ScoutResult<Vec<T>> {
    let html = session.content().await?;
    let records = rule.extract_all(&html);
    tracing::debug!("Rule '{}' extracted {} records", rule.name(), records.len());
    Ok(records)
}

/// Run a single-record rule; an absent root scope is `NotFound`.
pub async fn extract_single<T: Record>(session: &Session, rule: &ExtractionRule<T>) -> ScoutResult<T> {
    let html = session.content().await?;
    rule.extract_one(&html).ok_or_else(|| {
        ScoutError::NotFound(format!(
            "{} root `{}` is absent from the page",
            rule.name(),
            rule.root_locator()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Card {
        title: String,
        link: String,
        badge: String,
        tags: String,
    }

    impl Record for Card {
        fn from_fields(mut fields: FieldValues) -> Self {
            Self {
                title: fields.take("title"),
                link: fields.take("link"),
                badge: fields.take("badge"),
                tags: fields.take("tags"),
            }
        }
    }

    fn card_rule() -> ExtractionRule<Card> {
        ExtractionRule::new(
            "card",
            ".cards",
            Some("article"),
            vec![
                FieldSpec::leading_text("title", "h2"),
                FieldSpec::attr("link", "a", "href")
                    .strip_prefix("https://site.test/")
                    .trim_char('/'),
                FieldSpec::text("badge", ".badge").or_default("Ongoing"),
                FieldSpec::joined("tags", ".tag", ", "),
            ],
        )
        .unwrap()
    }

    const CARDS: &str = r#"
        <div class="cards">
          <article>
            <h2>  Naruto   Shippuden
            <span>Sub</span></h2>
            <a href="https://site.test/naruto-shippuden/">go</a>
            <span class="tag">Action</span><span class="tag"> Drama </span>
          </article>
          <article>
            <h2>Bleach</h2>
            <a href="/bleach/">go</a>
            <span class="badge">Completed</span>
          </article>
          <article><h2>Mushishi</h2></article>
        </div>"#;

    #[test]
    fn test_records_in_document_order() {
        let cards = card_rule().extract_all(CARDS);
        let titles: Vec<&str> = cards.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Naruto Shippuden", "Bleach", "Mushishi"]);
    }

    #[test]
    fn test_whitespace_is_normalized() {
        assert_eq!(normalize_whitespace("  Naruto   Shippuden \n"), "Naruto Shippuden");
        assert_eq!(normalize_whitespace("\t\n "), "");
    }

    #[test]
    fn test_defaults_and_present_values() {
        let cards = card_rule().extract_all(CARDS);
        assert_eq!(cards[0].badge, "Ongoing");
        assert_eq!(cards[1].badge, "Completed");
    }

    #[test]
    fn test_transforms_strip_base_and_slashes() {
        let cards = card_rule().extract_all(CARDS);
        assert_eq!(cards[0].link, "naruto-shippuden");
        assert_eq!(cards[1].link, "bleach");
        // Missing node: no default configured, so empty.
        assert_eq!(cards[2].link, "");
    }

    #[test]
    fn test_suffix_and_chained_transforms() {
        let rule: ExtractionRule<Card> = ExtractionRule::new(
            "card",
            ".cards",
            Some("article"),
            vec![
                FieldSpec::leading_text("title", "h2").strip_suffix("(Dub)"),
                FieldSpec::text("badge", ".badge").strip_prefix("[").strip_suffix("]"),
            ],
        )
        .unwrap();
        let cards = rule.extract_all(
            "<div class='cards'><article><h2>Frieren  (Dub)</h2><span class='badge'>[ HD ]</span></article></div>",
        );
        assert_eq!(cards[0].title, "Frieren");
        assert_eq!(cards[0].badge, "HD");
        assert_eq!(Transform::StripSuffix("x".into()).apply("abc ".into()), "abc");
    }

    #[test]
    fn test_joined_field_keeps_order() {
        let cards = card_rule().extract_all(CARDS);
        assert_eq!(cards[0].tags, "Action, Drama");
        assert_eq!(cards[1].tags, "");
    }

    #[test]
    fn test_absent_root_yields_nothing() {
        let rule = card_rule();
        assert!(rule.extract_all("<div class='other'><article></article></div>").is_empty());
        assert!(rule.extract_one("<p>empty</p>").is_none());
    }

    #[test]
    fn test_root_with_no_items_is_empty_not_missing() {
        assert!(card_rule().extract_all("<div class='cards'></div>").is_empty());
    }

    #[test]
    fn test_nested_roots_do_not_duplicate_items() {
        let html = "<div class='cards'><div class='cards'><article><h2>One</h2></article></div></div>";
        assert_eq!(card_rule().extract_all(html).len(), 1);
    }

    #[test]
    fn test_inner_html_and_own_node_sources() {
        #[derive(Debug)]
        struct Blurb {
            body: String,
            label: String,
            target: String,
        }
        impl Record for Blurb {
            fn from_fields(mut fields: FieldValues) -> Self {
                Self {
                    body: fields.take("body"),
                    label: fields.take("label"),
                    target: fields.take("target"),
                }
            }
        }

        let rule: ExtractionRule<Blurb> = ExtractionRule::new(
            "blurb",
            "a.blurb",
            None,
            vec![
                FieldSpec::inner_html("body", "p"),
                FieldSpec::own_text("label").strip_prefix("Episode "),
                FieldSpec::own_attr("target", "href"),
            ],
        )
        .unwrap();

        let blurb = rule
            .extract_one("<a class='blurb' href='/x/'>Episode 12<p>A <b>bold</b>\n  move</p></a>")
            .unwrap();
        assert_eq!(blurb.body, "A <b>bold</b> move");
        assert_eq!(blurb.label, "12A bold move");
        assert_eq!(blurb.target, "/x/");
    }

    #[test]
    fn test_bad_selector_fails_at_construction() {
        let err = ExtractionRule::<Card>::new("broken", "div[", None, vec![]).unwrap_err();
        assert!(matches!(err, ScoutError::InvalidRule(_)));
    }
}
