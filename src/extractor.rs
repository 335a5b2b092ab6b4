use chrono::Utc;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

use crate::config::ExtractionSettings;
use crate::loader::{LoadMode, LoadedPage};
use crate::locator::{locate, scan_attribute_matches, text_content, Candidate};
use crate::models::{ExtractionSource, NodeHandle, ProductSnapshot};
use crate::normalizer::{PageContext, PriceNormalizer};
use crate::utils::error::AppError;

/// No strategy located a price on the page.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionFailure {
    #[error("no extraction strategy located a price")]
    NotLocated,

    #[error("redirected to {final_url} and no product markup was found")]
    NotFoundAfterRedirect { final_url: String },
}

/// Compiled candidate chains, built once from [`ExtractionSettings`].
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub price_attributes: Vec<Candidate>,
    pub price_scripts: Vec<String>,
    pub price_text: Vec<Candidate>,
    pub name: Vec<Candidate>,
    pub currency_symbols: HashSet<String>,
    pub attribute_price_pattern: Regex,
    pub default_currency: Option<String>,
}

impl ExtractionConfig {
    pub fn from_settings(settings: &ExtractionSettings) -> Result<Self, AppError> {
        let invalid = |e: crate::locator::SelectorError| AppError::Validation(e.to_string());

        let price_attributes = settings
            .price_attributes
            .iter()
            .map(Candidate::from_setting)
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        let price_text = settings
            .price_text
            .iter()
            .map(|selector| Candidate::text(selector))
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        let name = settings
            .name
            .iter()
            .map(Candidate::from_setting)
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;

        if price_attributes.is_empty() && price_text.is_empty() && settings.price_scripts.is_empty() {
            return Err(AppError::Validation("price candidate chain is empty".to_string()));
        }

        let attribute_price_pattern = Regex::new(&settings.attribute_price_pattern)
            .map_err(|e| AppError::Validation(format!("attribute_price_pattern: {}", e)))?;

        Ok(Self {
            price_attributes,
            price_scripts: settings.price_scripts.clone(),
            price_text,
            name,
            currency_symbols: settings.currency_symbols.iter().map(|s| s.trim().to_string()).collect(),
            attribute_price_pattern,
            default_currency: settings.default_currency.clone(),
        })
    }
}

/// A raw value found by one of the strategies.
#[derive(Debug, Clone)]
struct Found {
    value: String,
    source: ExtractionSource,
    node: Option<NodeHandle>,
}

pub struct PriceExtractor {
    config: ExtractionConfig,
    normalizer: PriceNormalizer,
}

impl PriceExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        let normalizer = PriceNormalizer::new(config.default_currency.clone());
        Self { config, normalizer }
    }

    pub fn from_settings(settings: &ExtractionSettings) -> Result<Self, AppError> {
        Ok(Self::new(ExtractionConfig::from_settings(settings)?))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Script strategies only work against pages loaded in ready mode.
    pub fn load_mode(&self) -> LoadMode {
        if self.config.price_scripts.is_empty() {
            LoadMode::Static
        } else {
            LoadMode::Ready
        }
    }

    /// Run the strategies in order (attribute, script, text) and stop at the
    /// first located value, valid or not. The name chain runs regardless.
    pub async fn extract(&self, page: &LoadedPage) -> Result<ProductSnapshot, ExtractionFailure> {
        // `Html` is not `Send`; every parse stays out of scope across awaits
        let (mut found, display_name, lang) = {
            let document = page.document();
            let name = locate(&document, &self.config.name)
                .map(|located| located.value)
                .unwrap_or_default();
            (self.by_attribute(page), name, document.lang())
        };

        if found.is_none() {
            found = self.by_script(page).await;
        }
        if found.is_none() {
            found = self.by_text(page);
        }

        let Some(found) = found else {
            tracing::debug!(url = %page.final_url, "No price candidate located");
            return Err(if page.redirected {
                ExtractionFailure::NotFoundAfterRedirect {
                    final_url: page.final_url.clone(),
                }
            } else {
                ExtractionFailure::NotLocated
            });
        };

        let mut price = self.normalizer.normalize(&found.value, &self.config.currency_symbols);
        self.normalizer.resolve_currency(
            &mut price,
            &PageContext {
                url: page.final_url.clone(),
                lang,
            },
        );

        tracing::debug!(
            url = %page.final_url,
            source = %found.source,
            valid = price.valid,
            raw = %found.value,
            "Located price"
        );

        Ok(ProductSnapshot {
            display_name,
            price,
            source: found.source,
            source_node: found.node,
            captured_at: Utc::now(),
        })
    }

    fn by_attribute(&self, page: &LoadedPage) -> Option<Found> {
        let document = page.document();
        let located = locate(&document, &self.config.price_attributes)?;
        let candidate = &self.config.price_attributes[located.candidate];

        let source = match candidate.attribute_name() {
            Some(name) => ExtractionSource::Attribute {
                selector: candidate.selector().to_string(),
                name: name.to_string(),
            },
            None => ExtractionSource::TextNode {
                selector: candidate.selector().to_string(),
                attribute: None,
            },
        };

        Some(Found {
            value: located.value,
            source,
            node: located.node,
        })
    }

    async fn by_script(&self, page: &LoadedPage) -> Option<Found> {
        if page.mode != LoadMode::Ready || self.config.price_scripts.is_empty() {
            return None;
        }
        let script = page.script.as_ref()?;

        for expression in &self.config.price_scripts {
            match script.evaluate(expression).await {
                Ok(Some(value)) if !value.trim().is_empty() => {
                    return Some(Found {
                        value: value.trim().to_string(),
                        source: ExtractionSource::ScriptEvaluated {
                            expression: expression.clone(),
                        },
                        node: None,
                    });
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(expression = %expression, "Script evaluation failed: {}", e);
                }
            }
        }
        None
    }

    fn by_text(&self, page: &LoadedPage) -> Option<Found> {
        let document = page.document();

        for candidate in &self.config.price_text {
            let Some(element) = document.select_first(candidate.parsed()) else {
                continue;
            };

            let text = text_content(element);
            if !text.is_empty() {
                return Some(Found {
                    value: text,
                    source: ExtractionSource::TextNode {
                        selector: candidate.selector().to_string(),
                        attribute: None,
                    },
                    node: document.handle_for(element),
                });
            }

            // Empty node: the price may live in an inline handler or data attribute
            if let Some(hit) = scan_attribute_matches(element, &self.config.attribute_price_pattern)
                .into_iter()
                .find(|m| !m.value.trim().is_empty())
            {
                return Some(Found {
                    value: hit.value.trim().to_string(),
                    source: ExtractionSource::TextNode {
                        selector: candidate.selector().to_string(),
                        attribute: Some(hit.attribute),
                    },
                    node: document.handle_for(element),
                });
            }
        }
        None
    }
}
