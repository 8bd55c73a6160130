//! The run loop: one browser, one page, fully sequential. The frontier
//! yields URLs, each page gets a screenshot, optional AI analysis, the
//! scripted action plan, then link and form discovery. Terminal failures
//! still flush the report and extracted data before returning.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};
use url::Url;

use crate::ai::Analyzer;
use crate::discover::{FormTester, discover_links};
use crate::driver::PageDriver;
use crate::escalate::{Controller, Operator};
use crate::executor::Executor;
use crate::frontier::{Dequeued, Frontier, NormalizePolicy};
use crate::report::{Artifacts, Report};
use crate::resolve::{ResolutionContext, resolve};
use crate::types::{
    ActionStep, EscalationResult, ExtractionResult, FailurePolicy, StepOutcome, StepState,
};

pub struct RunConfig {
    pub start_url: String,
    pub max_pages: usize,
    pub allow_external: bool,
    pub test_forms: bool,
    pub policy: FailurePolicy,
    pub normalize: NormalizePolicy,
    pub nav_timeout: Duration,
    pub candidate_timeout: Duration,
    pub report_path: PathBuf,
    pub screenshot_dir: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub pages_visited: usize,
    pub forms_tested: usize,
    pub aborted: bool,
}

/// Execute the whole run. Blocking; the caller parks it on a blocking
/// thread. The action plan was produced once by the planner and is replayed,
/// read-only, on every page the crawl visits.
pub fn run(
    config: &RunConfig,
    driver: &dyn PageDriver,
    plan: &[ActionStep],
    analyzer: Option<&dyn Analyzer>,
    operator: &mut dyn Operator,
) -> Result<RunSummary> {
    let mut frontier = Frontier::new(
        &config.start_url,
        config.max_pages,
        config.allow_external,
        config.normalize,
    )?;
    let artifacts = Artifacts::new(&config.screenshot_dir)?;
    let mut report = Report::new();
    let mut extracted = ExtractionResult::new();
    let mut form_tester = FormTester::new();

    report.line("--- Starting AI Web Exploration ---");
    report.line(format!("Base URL: {}", config.start_url));
    report.line(format!("Max pages: {}", config.max_pages));

    let outcome = crawl_loop(
        config,
        driver,
        plan,
        analyzer,
        operator,
        &mut frontier,
        &artifacts,
        &mut report,
        &mut extracted,
        &mut form_tester,
    );

    let aborted = match &outcome {
        Ok(aborted) => *aborted,
        Err(e) => {
            report.line(format!("FATAL: {e:#}"));
            true
        }
    };

    if frontier.page_count() >= config.max_pages {
        report.line(format!(
            "--- Maximum pages to visit ({}) reached ---",
            config.max_pages
        ));
    }
    report.line("--- Exploration Complete ---");
    report.line(format!("Total pages visited: {}", frontier.visited_count()));
    report.line(format!("Total forms tested: {}", form_tester.tested_count()));

    // Flushed on every exit path, fatal ones included.
    report.flush(&config.report_path, &extracted)?;
    outcome?;

    Ok(RunSummary {
        pages_visited: frontier.page_count(),
        forms_tested: form_tester.tested_count(),
        aborted,
    })
}

/// Inner loop; `Ok(true)` means the run was aborted by policy or operator.
#[allow(clippy::too_many_arguments)]
fn crawl_loop(
    config: &RunConfig,
    driver: &dyn PageDriver,
    plan: &[ActionStep],
    analyzer: Option<&dyn Analyzer>,
    operator: &mut dyn Operator,
    frontier: &mut Frontier,
    artifacts: &Artifacts,
    report: &mut Report,
    extracted: &mut ExtractionResult,
    form_tester: &mut FormTester,
) -> Result<bool> {
    let executor = Executor {
        candidate_timeout: config.candidate_timeout,
        ..Executor::default()
    };
    let controller = Controller::new(config.policy);

    while frontier.has_work() {
        let url = match frontier.dequeue() {
            None => break,
            Some(Dequeued::AlreadyVisited) => continue,
            Some(Dequeued::ExternalSkipped(url)) => {
                report.line(format!("Skipping external URL: {url}"));
                continue;
            }
            Some(Dequeued::Page(url)) => url,
        };

        frontier.mark_processed(&url);
        let page_number = frontier.page_count();
        report.line(format!("--- Testing Page {page_number}: {url} ---"));
        info!(%url, page_number, "visiting page");

        // Recoverable-page: a navigation failure costs this page only.
        if let Err(e) = driver.navigate(&url, config.nav_timeout) {
            warn!(%url, error = %format!("{e:#}"), "page failed to load");
            report.line(format!("FAIL: page did not load: {e:#}"));
            if let Err(shot) =
                artifacts.save_named(driver, &format!("page_load_failure_{page_number}"))
            {
                warn!(error = %format!("{shot:#}"), "failure screenshot not saved");
            }
            continue;
        }

        let path = Url::parse(&url)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        if let Err(e) = artifacts.save_page_screenshot(driver, page_number, &path) {
            warn!(error = %format!("{e:#}"), "page screenshot not saved");
        }

        if let Some(analyzer) = analyzer {
            let content = driver.page_content().unwrap_or_default();
            report.line("--- AI Content Analysis ---");
            report.line(analyzer.analyze_page(&content));
        }

        // Link discovery before the plan and forms: both can navigate away.
        match discover_links(driver, &url, frontier, report) {
            Ok(queued) => debug!(queued, "links discovered"),
            Err(e) => report.line(format!("WARN: link discovery failed: {e:#}")),
        }

        let ctx = Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(ResolutionContext::with_host))
            .unwrap_or_default();
        for (index, step) in plan.iter().enumerate() {
            if run_step(
                step, index, &ctx, config, driver, &executor, &controller, operator, artifacts,
                report, extracted,
            )? {
                return Ok(true);
            }
        }

        if config.test_forms {
            if let Err(e) =
                form_tester.test_forms(driver, &url, frontier, report, config.nav_timeout)
            {
                report.line(format!("WARN: form testing failed: {e:#}"));
            }
        }
    }

    Ok(false)
}

/// One plan step on the current page; `Ok(true)` aborts the run.
#[allow(clippy::too_many_arguments)]
fn run_step(
    step: &ActionStep,
    index: usize,
    ctx: &ResolutionContext,
    config: &RunConfig,
    driver: &dyn PageDriver,
    executor: &Executor,
    controller: &Controller,
    operator: &mut dyn Operator,
    artifacts: &Artifacts,
    report: &mut Report,
    extracted: &mut ExtractionResult,
) -> Result<bool> {
    debug!(index, kind = step.kind(), state = ?StepState::Pending, "step");

    match step {
        ActionStep::Navigate { url } => {
            if let Err(e) = driver.navigate(url, config.nav_timeout) {
                let last_error = format!("navigation to {url} failed: {e:#}");
                report.line(format!("Step {}: FAIL: {last_error}", index + 1));
                return Ok(escalate(
                    step, index, &last_error, config, driver, executor, controller, operator,
                    artifacts, report, extracted,
                ));
            }
            report.line(format!("Step {}: navigated to {url}", index + 1));
            Ok(false)
        }
        ActionStep::Screenshot { name } => {
            let default_name = format!("screenshot_step_{}", index + 1);
            let name = name.as_deref().unwrap_or(&default_name);
            match artifacts.save_named(driver, name) {
                Ok(path) => report.line(format!(
                    "Step {}: screenshot saved to {}",
                    index + 1,
                    path.display()
                )),
                Err(e) => report.line(format!("Step {}: screenshot failed: {e:#}", index + 1)),
            }
            Ok(false)
        }
        ActionStep::Unrecognized { kind } => {
            // Distinct reported outcome, never a silent skip.
            warn!(index, kind, "unrecognized step kind");
            report.line(format!(
                "Step {}: unrecognized action kind '{kind}', not executed",
                index + 1
            ));
            Ok(false)
        }
        _ => {
            debug!(index, state = ?StepState::Resolving, "resolving description");
            let candidates = step
                .description()
                .map(|d| resolve(d, ctx))
                .unwrap_or_default();

            debug!(index, candidates = candidates.len(), state = ?StepState::Executing, "executing");
            match executor.execute(step, &candidates, driver, extracted) {
                StepOutcome::Success { candidate } => {
                    report.line(format!(
                        "Step {}: '{}' succeeded via {candidate}",
                        index + 1,
                        step.kind()
                    ));
                    Ok(false)
                }
                StepOutcome::Failure { last_error } => {
                    report.line(format!(
                        "Step {}: '{}' exhausted all candidates: {last_error}",
                        index + 1,
                        step.kind()
                    ));
                    Ok(escalate(
                        step, index, &last_error, config, driver, executor, controller, operator,
                        artifacts, report, extracted,
                    ))
                }
                StepOutcome::Escalated { .. } => unreachable!("executor never escalates"),
            }
        }
    }
}

/// Apply the failure policy; `true` aborts the run.
#[allow(clippy::too_many_arguments)]
fn escalate(
    step: &ActionStep,
    index: usize,
    last_error: &str,
    config: &RunConfig,
    driver: &dyn PageDriver,
    executor: &Executor,
    controller: &Controller,
    operator: &mut dyn Operator,
    artifacts: &Artifacts,
    report: &mut Report,
    extracted: &mut ExtractionResult,
) -> bool {
    let ctx = driver
        .current_url()
        .ok()
        .and_then(|u| Url::parse(&u).ok())
        .and_then(|u| u.host_str().map(ResolutionContext::with_host))
        .unwrap_or_default();

    match controller.on_failure(
        step, index, last_error, driver, executor, &ctx, extracted, operator, artifacts,
    ) {
        EscalationResult::Recovered { candidate } => {
            report.line(format!(
                "Step {}: recovered via operator override {candidate}",
                index + 1
            ));
            false
        }
        EscalationResult::Skipped => {
            report.line(format!("Step {}: skipped", index + 1));
            false
        }
        EscalationResult::Aborted => {
            report.line(format!("Step {}: aborting run", index + 1));
            true
        }
    }
}

impl RunConfig {
    /// Defaults shared by the CLI and tests; start URL is the only field
    /// without a sensible default.
    pub fn for_url(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            max_pages: 10,
            allow_external: false,
            test_forms: false,
            policy: FailurePolicy::Autonomous,
            normalize: NormalizePolicy::StripQuery,
            nav_timeout: Duration::from_secs(15),
            candidate_timeout: Duration::from_secs(10),
            report_path: PathBuf::from("web_test_report.txt"),
            screenshot_dir: PathBuf::from("screenshots"),
        }
    }
}
