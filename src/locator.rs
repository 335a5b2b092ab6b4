//! Content locator: first-non-empty lookup over an ordered candidate chain,
//! plus attribute scanning for values hidden in inline handlers or data
//! attributes.

use regex::Regex;
use scraper::{ElementRef, Selector};
use thiserror::Error;

use crate::config::CandidateSetting;
use crate::loader::Document;
use crate::models::NodeHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid CSS selector '{selector}': {message}")]
pub struct SelectorError {
    pub selector: String,
    pub message: String,
}

/// A (selector, optional attribute) pair. Without an attribute the node's
/// text content is read.
#[derive(Debug, Clone)]
pub struct Candidate {
    source: String,
    selector: Selector,
    attribute: Option<String>,
}

impl Candidate {
    pub fn new(selector: &str, attribute: Option<&str>) -> Result<Self, SelectorError> {
        let parsed = Selector::parse(selector).map_err(|e| SelectorError {
            selector: selector.to_string(),
            message: format!("{:?}", e),
        })?;
        Ok(Self {
            source: selector.to_string(),
            selector: parsed,
            attribute: attribute.map(str::to_string),
        })
    }

    pub fn text(selector: &str) -> Result<Self, SelectorError> {
        Self::new(selector, None)
    }

    pub fn attribute(selector: &str, name: &str) -> Result<Self, SelectorError> {
        Self::new(selector, Some(name))
    }

    pub fn from_setting(setting: &CandidateSetting) -> Result<Self, SelectorError> {
        Self::new(&setting.selector, setting.attribute.as_deref())
    }

    pub fn selector(&self) -> &str {
        &self.source
    }

    pub fn attribute_name(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    pub(crate) fn parsed(&self) -> &Selector {
        &self.selector
    }
}

/// A located non-empty value and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub value: String,
    pub candidate: usize,
    pub node: Option<NodeHandle>,
}

/// Rendered text of a node with whitespace runs collapsed.
pub fn text_content(element: ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Walk `candidates` in order and return the first non-empty value. Only the
/// first node matching each selector is read. Later candidates are never
/// consulted once something is found.
pub fn locate(document: &Document, candidates: &[Candidate]) -> Option<Located> {
    for (index, candidate) in candidates.iter().enumerate() {
        let Some(element) = document.select_first(candidate.parsed()) else {
            continue;
        };

        let value = match candidate.attribute_name() {
            Some(name) => element.value().attr(name).map(|v| v.trim().to_string()).unwrap_or_default(),
            None => text_content(element),
        };

        if value.is_empty() {
            tracing::trace!(selector = candidate.selector(), "Candidate matched an empty value");
            continue;
        }

        return Some(Located {
            value,
            candidate: index,
            node: document.handle_for(element),
        });
    }
    None
}

/// Something that can pull matches out of an attribute value.
pub trait AttributeMatcher {
    fn collect(&self, name: &str, value: &str, out: &mut Vec<String>);
}

/// Every match of the pattern; the first capture group when the pattern has one.
impl AttributeMatcher for Regex {
    fn collect(&self, _name: &str, value: &str, out: &mut Vec<String>) {
        for captures in self.captures_iter(value) {
            let hit = captures.get(1).or_else(|| captures.get(0));
            if let Some(hit) = hit {
                out.push(hit.as_str().to_string());
            }
        }
    }
}

/// Keeps whole attribute values accepted by a `(name, value)` predicate.
pub struct Predicate<F>(pub F);

impl<F> AttributeMatcher for Predicate<F>
where
    F: Fn(&str, &str) -> bool,
{
    fn collect(&self, name: &str, value: &str, out: &mut Vec<String>) {
        if (self.0)(name, value) {
            out.push(value.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMatch {
    pub attribute: String,
    pub value: String,
}

/// Apply `matcher` to every attribute on `element` itself (not its
/// subtree), in attribute encounter order.
pub fn scan_attribute_matches<M>(element: ElementRef<'_>, matcher: &M) -> Vec<AttributeMatch>
where
    M: AttributeMatcher + ?Sized,
{
    let mut matches = Vec::new();
    let mut scratch = Vec::new();
    for (name, value) in element.value().attrs() {
        matcher.collect(name, value, &mut scratch);
        matches.extend(scratch.drain(..).map(|value| AttributeMatch {
            attribute: name.to_string(),
            value,
        }));
    }
    matches
}

pub fn scan_attributes<M>(element: ElementRef<'_>, matcher: &M) -> Vec<String>
where
    M: AttributeMatcher + ?Sized,
{
    scan_attribute_matches(element, matcher)
        .into_iter()
        .map(|m| m.value)
        .collect()
}
