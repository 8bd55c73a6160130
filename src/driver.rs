//! Abstract browser interface consumed by the executor, discovery and crawl
//! loop. The production implementation wraps headless Chrome
//! (`browser::ChromeDriver`); tests script a `MockDriver` against the same
//! trait so the core logic runs without a browser.
//!
//! Locator expressions are CSS selectors, except strings starting with `//`
//! which are XPath.

use std::time::Duration;

use anyhow::Result;

use crate::types::ScrollEdge;

/// Identity of a form on the current page, used by discovery to avoid
/// re-testing the same form across repeated visits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormInfo {
    /// Position of the form in document order.
    pub index: usize,
    /// `action` attribute, if present.
    pub action: Option<String>,
    /// `id` attribute, if present.
    pub id: Option<String>,
}

/// Blocking, timeout-bounded browser primitives. One page, one session.
pub trait PageDriver {
    fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;
    fn current_url(&self) -> Result<String>;
    fn page_title(&self) -> Result<String>;
    fn page_content(&self) -> Result<String>;

    /// Wait until at least one element matching the locator is attached.
    /// `Ok(false)` means the timeout elapsed without a match; `Err` is a
    /// driver fault (bad expression, lost page).
    fn wait_attached(&self, locator: &str, timeout: Duration) -> Result<bool>;
    fn is_visible(&self, locator: &str) -> Result<bool>;
    fn is_enabled(&self, locator: &str) -> Result<bool>;
    /// Whether the first match has a non-empty hit-test area.
    fn has_hit_area(&self, locator: &str) -> Result<bool>;
    fn scroll_into_view(&self, locator: &str) -> Result<()>;

    fn click(&self, locator: &str) -> Result<()>;
    /// Replace the element's content with `value`.
    fn fill(&self, locator: &str, value: &str) -> Result<()>;
    /// Choose an option by visible label; `Ok(false)` if no option matched.
    fn select_by_label(&self, locator: &str, label: &str) -> Result<bool>;
    /// Choose an option by underlying value; `Ok(false)` if no option matched.
    fn select_by_value(&self, locator: &str, value: &str) -> Result<bool>;

    /// Text of the first match; `None` when nothing matches.
    fn text_of(&self, locator: &str) -> Result<Option<String>>;
    /// Text of every match, in document order.
    fn texts_of(&self, locator: &str) -> Result<Vec<String>>;

    fn scroll_element(&self, locator: &str, edge: ScrollEdge) -> Result<()>;
    fn scroll_page(&self, edge: ScrollEdge) -> Result<()>;
    /// Current scrollable document height, used to detect incrementally
    /// loaded content.
    fn page_height(&self) -> Result<u64>;
    /// Give dynamic content a chance to load.
    fn settle(&self, wait: Duration);

    /// PNG bytes of the current viewport.
    fn screenshot(&self) -> Result<Vec<u8>>;

    /// `href` attributes of all anchors on the page, as written.
    fn link_hrefs(&self) -> Result<Vec<String>>;
    /// Forms present on the page.
    fn forms(&self) -> Result<Vec<FormInfo>>;
    /// Populate the form's fillable fields with placeholder data.
    fn fill_form_placeholder(&self, form_index: usize) -> Result<()>;
    /// Invoke the form's submit control. `Ok(false)` if none was found.
    fn submit_form(&self, form_index: usize) -> Result<bool>;
}
