//! Feeds the frontier after a page is processed: outbound anchors become
//! queue entries, and forms (when enabled) are filled with placeholder data
//! and submitted once each.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use url::Url;

use crate::driver::PageDriver;
use crate::frontier::Frontier;
use crate::report::Report;

/// Resolve every anchor on the page to an absolute URL and enqueue the ones
/// in scope. External targets are logged as skipped here, at the page that
/// linked them. Returns how many URLs were actually queued.
pub fn discover_links(
    driver: &dyn PageDriver,
    page_url: &str,
    frontier: &mut Frontier,
    report: &mut Report,
) -> Result<usize> {
    let base = Url::parse(page_url)?;
    let mut queued = 0;

    for href in driver.link_hrefs()? {
        let Ok(absolute) = base.join(&href) else {
            continue;
        };
        if !matches!(absolute.scheme(), "http" | "https") {
            continue;
        }
        let absolute = absolute.to_string();
        if !frontier.allow_external() && !frontier.in_scope(&absolute) {
            report.line(format!("Skipping external URL: {absolute}"));
            info!(url = %absolute, "external link skipped");
            continue;
        }
        if frontier.enqueue(&absolute)? {
            queued += 1;
        }
    }
    Ok(queued)
}

/// Stable identity of a form: page URL + action attribute + id-or-index.
/// Keeps repeat visits from re-submitting the same form.
type FormKey = (String, String, String);

#[derive(Default)]
pub struct FormTester {
    tested: HashSet<FormKey>,
}

impl FormTester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tested_count(&self) -> usize {
        self.tested.len()
    }

    /// Fill and submit each untested form on the page, once. If submission
    /// navigated somewhere new, that URL joins the frontier; either way the
    /// original page is re-fetched so discovery can continue from it.
    pub fn test_forms(
        &mut self,
        driver: &dyn PageDriver,
        page_url: &str,
        frontier: &mut Frontier,
        report: &mut Report,
        nav_timeout: Duration,
    ) -> Result<()> {
        for form in driver.forms()? {
            let key: FormKey = (
                page_url.to_string(),
                form.action.clone().unwrap_or_default(),
                form.id.clone().unwrap_or_else(|| form.index.to_string()),
            );
            if !self.tested.insert(key.clone()) {
                continue;
            }

            report.line(format!("Testing form '{}' on {page_url}", key.2));
            if let Err(e) = driver.fill_form_placeholder(form.index) {
                warn!(form = %key.2, error = %format!("{e:#}"), "form fill failed");
                report.line(format!("Form '{}' could not be filled: {e:#}", key.2));
                continue;
            }

            match driver.submit_form(form.index) {
                Ok(true) => {
                    driver.settle(Duration::from_millis(1500));
                    let landed = driver.current_url()?;
                    if landed != page_url {
                        report.line(format!("Form '{}' navigated to {landed}", key.2));
                        // Landing URLs can be unparseable (about:blank, data:);
                        // those just don't join the frontier.
                        if let Err(e) = frontier.enqueue(&landed) {
                            warn!(url = %landed, error = %format!("{e:#}"), "landing URL not queued");
                        }
                        // Back to the page under test to keep discovering.
                        driver.navigate(page_url, nav_timeout)?;
                    } else {
                        report.line(format!(
                            "Form '{}' submitted without redirect (same-page update)",
                            key.2
                        ));
                    }
                }
                Ok(false) => {
                    report.line(format!("Form '{}' has no submit control", key.2));
                }
                Err(e) => {
                    warn!(form = %key.2, error = %format!("{e:#}"), "form submit failed");
                    report.line(format!("Form '{}' submit failed: {e:#}", key.2));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::driver::FormInfo;
    use crate::frontier::NormalizePolicy;

    fn frontier() -> Frontier {
        Frontier::new(
            "https://example.test/",
            10,
            false,
            NormalizePolicy::StripQuery,
        )
        .unwrap()
    }

    #[test]
    fn relative_links_resolve_against_the_page_url() {
        let mut driver = MockDriver::default();
        driver.links = vec!["/about".into(), "contact".into(), "#frag".into()];
        let mut f = frontier();
        let mut report = Report::new();

        let queued =
            discover_links(&driver, "https://example.test/start/", &mut f, &mut report).unwrap();
        // "/about", "contact" -> ".../start/contact"; "#frag" normalizes to
        // the page itself which is not yet visited, so it queues too.
        assert_eq!(queued, 3);
    }

    #[test]
    fn external_links_are_logged_and_not_queued() {
        let mut driver = MockDriver::default();
        driver.links = vec![
            "https://example.test/a".into(),
            "https://elsewhere.test/b".into(),
        ];
        let mut f = frontier();
        let mut report = Report::new();

        let queued =
            discover_links(&driver, "https://example.test/", &mut f, &mut report).unwrap();
        assert_eq!(queued, 1);
        assert!(
            report
                .lines()
                .iter()
                .any(|l| l.contains("Skipping external URL: https://elsewhere.test/b"))
        );
    }

    #[test]
    fn non_http_schemes_are_ignored() {
        let mut driver = MockDriver::default();
        driver.links = vec![
            "mailto:hi@example.test".into(),
            "javascript:void(0)".into(),
            "https://example.test/ok".into(),
        ];
        let mut f = frontier();
        let mut report = Report::new();

        let queued =
            discover_links(&driver, "https://example.test/", &mut f, &mut report).unwrap();
        assert_eq!(queued, 1);
    }

    #[test]
    fn form_is_tested_once_across_repeat_visits() {
        let mut driver = MockDriver::default();
        *driver.url.borrow_mut() = "https://example.test/".to_string();
        driver.forms = vec![FormInfo {
            index: 0,
            action: Some("/login".into()),
            id: Some("login".into()),
        }];
        let mut f = frontier();
        let mut report = Report::new();
        let mut tester = FormTester::new();

        for _ in 0..3 {
            tester
                .test_forms(
                    &driver,
                    "https://example.test/",
                    &mut f,
                    &mut report,
                    Duration::from_secs(5),
                )
                .unwrap();
        }
        assert_eq!(tester.tested_count(), 1);
        let submits = driver
            .effects()
            .iter()
            .filter(|e| e.starts_with("submit_form"))
            .count();
        assert_eq!(submits, 1);
    }

    #[test]
    fn form_navigation_queues_landing_url_and_returns_to_page() {
        let mut driver = MockDriver::default();
        *driver.url.borrow_mut() = "https://example.test/".to_string();
        driver.submit_redirects_to = Some("https://example.test/welcome".to_string());
        driver.forms = vec![FormInfo {
            index: 0,
            action: None,
            id: None,
        }];
        let mut f = frontier();
        let mut report = Report::new();
        let mut tester = FormTester::new();

        tester
            .test_forms(
                &driver,
                "https://example.test/",
                &mut f,
                &mut report,
                Duration::from_secs(5),
            )
            .unwrap();

        let effects = driver.effects();
        assert!(effects.contains(&"fill_form:0".to_string()));
        assert!(effects.contains(&"submit_form:0".to_string()));
        assert!(effects.contains(&"navigate:https://example.test/".to_string()));

        // Landing URL is now discoverable.
        let mut queued = Vec::new();
        while let Some(d) = f.dequeue() {
            if let crate::frontier::Dequeued::Page(url) = d {
                queued.push(url);
            }
        }
        assert!(queued.contains(&"https://example.test/welcome".to_string()));
    }
}
