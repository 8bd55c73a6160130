//! Attempts a step's candidate locators in order until one completes the
//! full effect. A candidate failing a precondition or raising a driver error
//! fails only that candidate; the next one is tried. Exhausting the list is
//! an expected outcome, reported as `StepOutcome::Failure`, never as an
//! `Err`.

use std::time::Duration;

use tracing::{debug, info};

use crate::driver::PageDriver;
use crate::types::{ActionStep, ExtractedValue, ExtractionResult, ScrollEdge, StepOutcome};

pub struct Executor {
    /// Per-candidate wait for the element to attach.
    pub candidate_timeout: Duration,
    /// Pause for dynamic content during scroll-to-bottom rounds.
    pub settle: Duration,
    /// Hard cap on scroll rounds so a page that grows forever still
    /// terminates.
    pub max_scroll_rounds: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            candidate_timeout: Duration::from_secs(10),
            settle: Duration::from_millis(1500),
            max_scroll_rounds: 20,
        }
    }
}

impl Executor {
    /// Run one step against the page. `candidates` comes from the resolver
    /// (or from an operator override) and is consumed in order.
    pub fn execute(
        &self,
        step: &ActionStep,
        candidates: &[String],
        driver: &dyn PageDriver,
        extracted: &mut ExtractionResult,
    ) -> StepOutcome {
        // Whole-page scroll needs no element at all.
        if let ActionStep::Scroll {
            to,
            selector_description: None,
        } = step
        {
            return match self.scroll_page(*to, driver) {
                Ok(()) => StepOutcome::Success {
                    candidate: "(page)".to_string(),
                },
                Err(e) => StepOutcome::Failure { last_error: e },
            };
        }

        let mut last_error = format!("no candidates for '{}'", step.kind());
        for candidate in candidates {
            match self.try_candidate(step, candidate, driver, extracted) {
                Ok(()) => {
                    info!(kind = step.kind(), %candidate, "step succeeded");
                    return StepOutcome::Success {
                        candidate: candidate.clone(),
                    };
                }
                Err(reason) => {
                    debug!(kind = step.kind(), %candidate, %reason, "candidate failed");
                    last_error = format!("candidate '{candidate}' failed: {reason}");
                }
            }
        }
        StepOutcome::Failure { last_error }
    }

    /// One candidate, preconditions then effect. `Err` is the per-candidate
    /// failure reason; the caller moves on to the next candidate.
    fn try_candidate(
        &self,
        step: &ActionStep,
        locator: &str,
        driver: &dyn PageDriver,
        extracted: &mut ExtractionResult,
    ) -> Result<(), String> {
        let attached = driver
            .wait_attached(locator, self.candidate_timeout)
            .map_err(|e| format!("query error: {e:#}"))?;
        if !attached {
            return Err("no attached element".to_string());
        }

        if matches!(
            step,
            ActionStep::Click { .. } | ActionStep::Type { .. } | ActionStep::Select { .. }
        ) {
            if !driver.is_visible(locator).map_err(stringify)? {
                return Err("element not visible".to_string());
            }
            if !driver.is_enabled(locator).map_err(stringify)? {
                return Err("element disabled".to_string());
            }
            if matches!(step, ActionStep::Click { .. })
                && !driver.has_hit_area(locator).map_err(stringify)?
            {
                return Err("element has no hit-test area".to_string());
            }
            driver.scroll_into_view(locator).map_err(stringify)?;
        }

        match step {
            ActionStep::Click { .. } => driver.click(locator).map_err(stringify),
            ActionStep::Type { value, .. } => driver.fill(locator, value).map_err(stringify),
            ActionStep::Select { value, .. } => {
                // Visible label first, underlying value second; the
                // candidate fails only when both miss.
                if driver.select_by_label(locator, value).map_err(stringify)? {
                    return Ok(());
                }
                if driver.select_by_value(locator, value).map_err(stringify)? {
                    return Ok(());
                }
                Err(format!("no option matched '{value}' by label or value"))
            }
            ActionStep::Extract {
                selector_description,
                name,
            } => {
                let value = if wants_many(name, selector_description) {
                    let texts = driver
                        .texts_of(locator)
                        .map_err(stringify)?
                        .into_iter()
                        .map(|t| t.trim().to_string())
                        .collect();
                    ExtractedValue::Many(texts)
                } else {
                    // Empty text is still a successful extraction, distinct
                    // from "no element resolvable".
                    let text = driver
                        .text_of(locator)
                        .map_err(stringify)?
                        .unwrap_or_default();
                    ExtractedValue::Single(text.trim().to_string())
                };
                extracted.insert(name.clone(), value);
                Ok(())
            }
            ActionStep::Scroll { to, .. } => driver.scroll_element(locator, *to).map_err(stringify),
            // Presence (already established) is the whole contract.
            ActionStep::Wait { .. } | ActionStep::Assert { .. } => Ok(()),
            other => Err(format!(
                "step kind '{}' does not take an element candidate",
                other.kind()
            )),
        }
    }

    /// Whole-page scroll. Scrolling to the bottom chases incrementally
    /// loaded content until the document height holds still across two
    /// consecutive rounds.
    fn scroll_page(&self, edge: ScrollEdge, driver: &dyn PageDriver) -> Result<(), String> {
        if edge == ScrollEdge::Top {
            return driver.scroll_page(edge).map_err(stringify);
        }

        let mut previous = driver.page_height().map_err(stringify)?;
        for _ in 0..self.max_scroll_rounds {
            driver.scroll_page(ScrollEdge::Bottom).map_err(stringify)?;
            driver.settle(self.settle);
            let height = driver.page_height().map_err(stringify)?;
            if height == previous {
                break;
            }
            previous = height;
        }
        Ok(())
    }
}

/// Plural extraction is signalled by the step's wording, not by match count.
fn wants_many(name: &str, description: &str) -> bool {
    let name = name.to_lowercase();
    let description = description.to_lowercase();
    ["all", "list", "multiple"]
        .iter()
        .any(|marker| name.contains(marker) || description.contains(marker))
}

fn stringify(e: anyhow::Error) -> String {
    format!("{e:#}")
}
