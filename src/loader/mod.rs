//! Page loading port.
//!
//! The monitoring engine never talks to the network or a browser directly;
//! it asks a [`DocumentLoader`] for a [`LoadedPage`] and parses that into a
//! [`Document`] for the extractor.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{NodeHandle, PageId};

pub mod chrome;
pub mod http;

pub use chrome::ChromeLoader;
pub use http::HttpLoader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Return as soon as the response body is available.
    Static,
    /// Wait for scripts and stylesheets; pages may expose a script context.
    Ready,
}

/// Every way a page load can fail, collapsed into one kind for the
/// extractor and state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("page load timed out")]
    Timeout,

    #[error("browser error: {0}")]
    Browser(String),
}

/// Evaluates expressions against a live page.
#[async_trait]
pub trait ScriptContext: Send + Sync {
    /// Returns the stringified value, or `None` for `null`/`undefined`.
    async fn evaluate(&self, expression: &str) -> Result<Option<String>, LoadFailure>;
}

pub struct LoadedPage {
    pub page_id: PageId,
    pub requested_url: String,
    pub final_url: String,
    pub redirected: bool,
    pub html: String,
    pub mode: LoadMode,
    pub script: Option<Arc<dyn ScriptContext>>,
}

impl fmt::Debug for LoadedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPage")
            .field("page_id", &self.page_id)
            .field("requested_url", &self.requested_url)
            .field("final_url", &self.final_url)
            .field("redirected", &self.redirected)
            .field("html_len", &self.html.len())
            .field("mode", &self.mode)
            .field("script", &self.script.is_some())
            .finish()
    }
}

impl LoadedPage {
    /// A statically loaded page with no script context.
    pub fn from_html(url: &str, html: impl Into<String>) -> Self {
        Self {
            page_id: PageId::new(),
            requested_url: url.to_string(),
            final_url: url.to_string(),
            redirected: false,
            html: html.into(),
            mode: LoadMode::Static,
            script: None,
        }
    }

    pub fn with_redirect(mut self, final_url: &str) -> Self {
        self.final_url = final_url.to_string();
        self.redirected = true;
        self
    }

    pub fn with_script(mut self, script: Arc<dyn ScriptContext>) -> Self {
        self.mode = LoadMode::Ready;
        self.script = Some(script);
        self
    }

    /// Parse the body. Every parse of the same page shares its `PageId`, so
    /// node handles stay valid across re-parses within one check.
    pub fn document(&self) -> Document {
        Document::parse(self.page_id, &self.html)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, url: &str, mode: LoadMode) -> Result<LoadedPage, LoadFailure>;

    async fn load_static(&self, url: &str) -> Result<LoadedPage, LoadFailure> {
        self.load(url, LoadMode::Static).await
    }

    /// Waits for scripts and stylesheets before returning.
    async fn load_ready(&self, url: &str) -> Result<LoadedPage, LoadFailure> {
        self.load(url, LoadMode::Ready).await
    }
}

/// Parsed page content tied to the load that produced it.
pub struct Document {
    page: PageId,
    html: Html,
}

impl Document {
    pub fn parse(page: PageId, html: &str) -> Self {
        Self {
            page,
            html: Html::parse_document(html),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    pub fn select_first(&self, selector: &Selector) -> Option<ElementRef<'_>> {
        self.html.select(selector).next()
    }

    /// `lang` attribute of the root element, if any.
    pub fn lang(&self) -> Option<String> {
        self.html
            .root_element()
            .value()
            .attr("lang")
            .map(|lang| lang.trim().to_string())
            .filter(|lang| !lang.is_empty())
    }

    pub fn handle_for(&self, element: ElementRef<'_>) -> Option<NodeHandle> {
        let id = element.id();
        self.html
            .tree
            .nodes()
            .position(|node| node.id() == id)
            .map(|ordinal| NodeHandle { page: self.page, ordinal })
    }

    /// Resolve a handle; `None` when it was minted by another document.
    pub fn resolve(&self, handle: &NodeHandle) -> Option<ElementRef<'_>> {
        if handle.page != self.page {
            return None;
        }
        self.html.tree.nodes().nth(handle.ordinal).and_then(ElementRef::wrap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"
        <html lang="en-AU">
            <body>
                <h1 id="title">Kettle</h1>
                <span class="price">$19.99</span>
            </body>
        </html>
    "#;

    #[test]
    fn test_handle_resolves_in_same_page_only() {
        let page = LoadedPage::from_html("https://shop.example.com/kettle", HTML);
        let document = page.document();
        let selector = Selector::parse(".price").unwrap();
        let element = document.select_first(&selector).unwrap();
        let handle = document.handle_for(element).unwrap();

        // A re-parse of the same load keeps the handle valid
        let reparsed = page.document();
        let resolved = reparsed.resolve(&handle).unwrap();
        assert_eq!(resolved.value().attr("class"), Some("price"));

        // A different load never resolves it
        let other = LoadedPage::from_html("https://shop.example.com/kettle", HTML).document();
        assert!(other.resolve(&handle).is_none());
    }

    #[test]
    fn test_document_lang() {
        let document = LoadedPage::from_html("https://shop.example.com", HTML).document();
        assert_eq!(document.lang(), Some("en-AU".to_string()));

        let bare = LoadedPage::from_html("https://shop.example.com", "<p>hi</p>").document();
        assert_eq!(bare.lang(), None);
    }

    #[test]
    fn test_redirect_builder() {
        let page = LoadedPage::from_html("https://a.example.com/x", "")
            .with_redirect("https://b.example.com/y");
        assert!(page.redirected);
        assert_eq!(page.final_url, "https://b.example.com/y");
        assert_eq!(page.mode, LoadMode::Static);
    }
}
