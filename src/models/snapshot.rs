use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::PriceValue;

/// Which extraction strategy produced a value, and with what selector or
/// expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ExtractionSource {
    Attribute { selector: String, name: String },
    ScriptEvaluated { expression: String },
    /// `attribute` is set when the node had no text and the value was
    /// recovered by scanning its attributes.
    TextNode { selector: String, attribute: Option<String> },
}

impl fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionSource::Attribute { selector, name } => write!(f, "{}@{}", selector, name),
            ExtractionSource::ScriptEvaluated { expression } => write!(f, "script:{}", expression),
            ExtractionSource::TextNode { selector, attribute: None } => write!(f, "{}::text", selector),
            ExtractionSource::TextNode { selector, attribute: Some(attr) } => {
                write!(f, "{}::scan({})", selector, attr)
            }
        }
    }
}

/// Identity of one loaded document. A new one is minted for every load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque pointer to the node a value was read from. Only resolvable
/// against the document that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle {
    pub(crate) page: PageId,
    pub(crate) ordinal: usize,
}

impl NodeHandle {
    pub fn page(&self) -> PageId {
        self.page
    }
}

/// The extracted (name, price, timestamp) for one check of one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub display_name: String,
    pub price: PriceValue,
    pub source: ExtractionSource,
    #[serde(skip)]
    pub source_node: Option<NodeHandle>,
    pub captured_at: DateTime<Utc>,
}

impl ProductSnapshot {
    /// Copy suitable for keeping beyond the current check.
    pub fn detached(&self) -> Self {
        Self {
            source_node: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_serialization_is_tagged() {
        let source = ExtractionSource::Attribute {
            selector: "meta[itemprop=price]".to_string(),
            name: "content".to_string(),
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["strategy"], "attribute");
        assert_eq!(json["name"], "content");

        let back: ExtractionSource = serde_json::from_value(json).unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn test_source_display() {
        let text = ExtractionSource::TextNode { selector: ".price".to_string(), attribute: None };
        assert_eq!(text.to_string(), ".price::text");
        let scanned = ExtractionSource::TextNode {
            selector: ".buy".to_string(),
            attribute: Some("onclick".to_string()),
        };
        assert_eq!(scanned.to_string(), ".buy::scan(onclick)");
    }

    #[test]
    fn test_page_ids_are_unique() {
        assert_ne!(PageId::new(), PageId::new());
    }
}
