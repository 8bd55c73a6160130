//! Real browser session: headless Chrome over the DevTools protocol. One
//! browser, one tab, reused for the whole run. Most DOM work goes through
//! injected JavaScript so CSS and XPath locators share one code path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::debug;

use crate::driver::{FormInfo, PageDriver};
use crate::types::ScrollEdge;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct ChromeDriver {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeDriver {
    pub fn launch(headless: bool) -> Result<Self> {
        let options = LaunchOptions {
            headless,
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
                std::ffi::OsStr::new("--disable-blink-features=AutomationControlled"),
                std::ffi::OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        };

        let browser = Browser::new(options).context("browser launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    /// Evaluate JS and pull the value out, if any.
    fn eval(&self, js: &str) -> Result<Option<serde_json::Value>> {
        let result = self.tab.evaluate(js, false)?;
        Ok(result.value)
    }

    fn eval_bool(&self, js: &str) -> Result<bool> {
        Ok(self
            .eval(js)?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Evaluate JS that returns `JSON.stringify(...)` output and parse it.
    fn eval_json<T: serde::de::DeserializeOwned + Default>(&self, js: &str) -> Result<T> {
        match self.eval(js)? {
            Some(serde_json::Value::String(raw)) => {
                serde_json::from_str(&raw).context("parsing page script output")
            }
            _ => Ok(T::default()),
        }
    }
}

/// Locators starting with `//` (or a grouped `(//...)`) are XPath.
fn is_xpath(locator: &str) -> bool {
    locator.starts_with("//") || locator.starts_with("(//")
}

/// JS expression evaluating to the first match or null.
fn js_first(locator: &str) -> String {
    let lit = serde_json::to_string(locator).unwrap_or_default();
    if is_xpath(locator) {
        format!(
            "document.evaluate({lit}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue"
        )
    } else {
        format!("document.querySelector({lit})")
    }
}

/// JS expression evaluating to an array of every match.
fn js_all(locator: &str) -> String {
    let lit = serde_json::to_string(locator).unwrap_or_default();
    if is_xpath(locator) {
        format!(
            "(() => {{ const r = document.evaluate({lit}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); const out = []; for (let i = 0; i < r.snapshotLength; i++) out.push(r.snapshotItem(i)); return out; }})()"
        )
    } else {
        format!("Array.from(document.querySelectorAll({lit}))")
    }
}

impl PageDriver for ChromeDriver {
    fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        self.tab.navigate_to(url)?;
        self.tab
            .wait_for_element_with_custom_timeout("body", timeout)?;
        // Give client-side rendering a moment to settle.
        std::thread::sleep(Duration::from_millis(1500));
        Ok(())
    }

    fn current_url(&self) -> Result<String> {
        Ok(self
            .eval("window.location.href")?
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "unknown".to_string()))
    }

    fn page_title(&self) -> Result<String> {
        Ok(self
            .eval("document.title")?
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "untitled".to_string()))
    }

    fn page_content(&self) -> Result<String> {
        Ok(self
            .eval("document.documentElement.outerHTML")?
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default())
    }

    fn wait_attached(&self, locator: &str, timeout: Duration) -> Result<bool> {
        let js = format!("{} !== null", js_first(locator));
        let deadline = Instant::now() + timeout;
        loop {
            if self.eval_bool(&js)? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn is_visible(&self, locator: &str) -> Result<bool> {
        self.eval_bool(&format!(
            "(() => {{ const el = {}; if (!el) return false; const s = getComputedStyle(el); return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0' && el.getClientRects().length > 0; }})()",
            js_first(locator)
        ))
    }

    fn is_enabled(&self, locator: &str) -> Result<bool> {
        self.eval_bool(&format!(
            "(() => {{ const el = {}; return !!el && !el.disabled; }})()",
            js_first(locator)
        ))
    }

    fn has_hit_area(&self, locator: &str) -> Result<bool> {
        self.eval_bool(&format!(
            "(() => {{ const el = {}; if (!el) return false; const r = el.getBoundingClientRect(); return r.width > 0 && r.height > 0; }})()",
            js_first(locator)
        ))
    }

    fn scroll_into_view(&self, locator: &str) -> Result<()> {
        self.eval(&format!(
            "(() => {{ const el = {}; if (el) el.scrollIntoView({{block: 'center'}}); }})()",
            js_first(locator)
        ))?;
        Ok(())
    }

    fn click(&self, locator: &str) -> Result<()> {
        let element = if is_xpath(locator) {
            self.tab.find_element_by_xpath(locator)?
        } else {
            self.tab.find_element(locator)?
        };
        element.click()?;
        std::thread::sleep(Duration::from_millis(1000));
        Ok(())
    }

    fn fill(&self, locator: &str, value: &str) -> Result<()> {
        let element = if is_xpath(locator) {
            self.tab.find_element_by_xpath(locator)?
        } else {
            self.tab.find_element(locator)?
        };
        element.click()?;
        // Clear existing content, then type the replacement.
        self.eval(&format!(
            "(() => {{ const el = {}; if (el) el.value = ''; }})()",
            js_first(locator)
        ))?;
        self.tab.type_str(value)?;
        Ok(())
    }

    fn select_by_label(&self, locator: &str, label: &str) -> Result<bool> {
        let label_lit = serde_json::to_string(label).unwrap_or_default();
        self.eval_bool(&format!(
            "(() => {{ const el = {}; if (!el || !el.options) return false; for (const opt of el.options) {{ if (opt.text.trim() === {label_lit}) {{ el.value = opt.value; el.dispatchEvent(new Event('change', {{bubbles: true}})); return true; }} }} return false; }})()",
            js_first(locator)
        ))
    }

    fn select_by_value(&self, locator: &str, value: &str) -> Result<bool> {
        let value_lit = serde_json::to_string(value).unwrap_or_default();
        self.eval_bool(&format!(
            "(() => {{ const el = {}; if (!el || !el.options) return false; for (const opt of el.options) {{ if (opt.value === {value_lit}) {{ el.value = opt.value; el.dispatchEvent(new Event('change', {{bubbles: true}})); return true; }} }} return false; }})()",
            js_first(locator)
        ))
    }

    fn text_of(&self, locator: &str) -> Result<Option<String>> {
        Ok(self
            .eval(&format!(
                "(() => {{ const el = {}; return el ? (el.innerText ?? el.textContent ?? '') : null; }})()",
                js_first(locator)
            ))?
            .and_then(|v| v.as_str().map(String::from)))
    }

    fn texts_of(&self, locator: &str) -> Result<Vec<String>> {
        self.eval_json(&format!(
            "JSON.stringify({}.map(el => el.innerText ?? el.textContent ?? ''))",
            js_all(locator)
        ))
    }

    fn scroll_element(&self, locator: &str, edge: ScrollEdge) -> Result<()> {
        let target = match edge {
            ScrollEdge::Bottom => "el.scrollHeight",
            ScrollEdge::Top => "0",
        };
        self.eval(&format!(
            "(() => {{ const el = {}; if (el) el.scrollTop = {target}; }})()",
            js_first(locator)
        ))?;
        Ok(())
    }

    fn scroll_page(&self, edge: ScrollEdge) -> Result<()> {
        let js = match edge {
            ScrollEdge::Bottom => "window.scrollTo(0, document.body.scrollHeight)",
            ScrollEdge::Top => "window.scrollTo(0, 0)",
        };
        self.eval(js)?;
        Ok(())
    }

    fn page_height(&self) -> Result<u64> {
        Ok(self
            .eval("document.body.scrollHeight")?
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }

    fn settle(&self, wait: Duration) {
        std::thread::sleep(wait);
    }

    fn screenshot(&self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
    }

    fn link_hrefs(&self) -> Result<Vec<String>> {
        self.eval_json(
            "JSON.stringify(Array.from(document.querySelectorAll('a[href]')).map(a => a.getAttribute('href')))",
        )
    }

    fn forms(&self) -> Result<Vec<FormInfo>> {
        #[derive(serde::Deserialize)]
        struct RawForm {
            index: usize,
            action: Option<String>,
            id: Option<String>,
        }

        let raw: Vec<RawForm> = self.eval_json(
            "JSON.stringify(Array.from(document.forms).map((f, i) => ({index: i, action: f.getAttribute('action'), id: f.getAttribute('id')})))",
        )?;
        Ok(raw
            .into_iter()
            .map(|f| FormInfo {
                index: f.index,
                action: f.action,
                id: f.id.filter(|id| !id.is_empty()),
            })
            .collect())
    }

    fn fill_form_placeholder(&self, form_index: usize) -> Result<()> {
        debug!(form_index, "filling form with placeholder data");
        self.eval(&format!(
            r#"(() => {{
  const form = document.forms[{form_index}];
  if (!form) return;
  for (const el of form.elements) {{
    if (el.disabled || el.offsetParent === null) continue;
    const tag = el.tagName.toLowerCase();
    if (tag === 'input') {{
      const type = el.type || 'text';
      if (['text', 'search', 'email', 'url', 'tel', 'password'].includes(type)) {{
        el.value = 'test_data';
      }} else if (type === 'checkbox' && !el.checked) {{
        el.click();
      }} else if (type === 'radio') {{
        el.click();
      }}
    }} else if (tag === 'textarea') {{
      el.value = 'This is a test comment.';
    }} else if (tag === 'select' && el.options.length > 0) {{
      for (const opt of el.options) {{
        if (!opt.disabled) {{ el.value = opt.value; break; }}
      }}
    }}
    el.dispatchEvent(new Event('change', {{bubbles: true}}));
  }}
}})()"#
        ))?;
        Ok(())
    }

    fn submit_form(&self, form_index: usize) -> Result<bool> {
        self.eval_bool(&format!(
            r#"(() => {{
  const form = document.forms[{form_index}];
  if (!form) return false;
  const control = form.querySelector("input[type='submit'], button[type='submit']") || form.querySelector('button');
  if (!control || control.disabled || control.offsetParent === null) return false;
  control.click();
  return true;
}})()"#
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpath_locators_are_recognized_by_prefix() {
        assert!(is_xpath("//button[normalize-space(.)='Go']"));
        assert!(is_xpath("(//a)[1]"));
        assert!(!is_xpath("button.primary"));
        assert!(!is_xpath("[role='button']"));
    }

    #[test]
    fn js_first_quotes_locators_as_string_literals() {
        let js = js_first("input[name='q']");
        assert!(js.starts_with("document.querySelector(\"input[name='q']\")"));

        let js = js_first("//a[contains(., 'it\"s')]");
        assert!(js.contains("document.evaluate"));
        assert!(js.contains("FIRST_ORDERED_NODE_TYPE"));
    }

    #[test]
    fn js_all_uses_snapshot_for_xpath() {
        assert!(js_all("//li").contains("ORDERED_NODE_SNAPSHOT_TYPE"));
        assert!(js_all("li").starts_with("Array.from"));
    }
}
