//! Decides what happens after a step exhausts every candidate: capture a
//! diagnostic screenshot, then apply the deployment's failure policy. Under
//! the interactive policy the run suspends until an operator supplies a
//! decision; each override is retried at most once before control returns to
//! the operator.

use std::io::Write;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::driver::PageDriver;
use crate::executor::Executor;
use crate::report::Artifacts;
use crate::resolve::{ResolutionContext, resolve};
use crate::types::{
    ActionStep, EscalationResult, ExtractionResult, FailurePolicy, OperatorDecision, StepOutcome,
};

/// What the operator is shown at the suspension point.
#[derive(Debug, Clone)]
pub struct EscalationPrompt {
    pub step_index: usize,
    pub action: String,
    pub description: String,
    pub last_error: String,
    pub screenshot: Option<String>,
}

/// Source of operator decisions. Console-backed in deployment; tests feed a
/// scripted sequence.
pub trait Operator {
    fn decide(&mut self, prompt: &EscalationPrompt) -> Result<OperatorDecision>;
}

pub struct Controller {
    pub policy: FailurePolicy,
}

impl Controller {
    pub fn new(policy: FailurePolicy) -> Self {
        Self { policy }
    }

    /// Handle a `Failure` outcome for `step`. The returned result is
    /// terminal for this step: recovered, skipped, or run aborted.
    #[allow(clippy::too_many_arguments)]
    pub fn on_failure(
        &self,
        step: &ActionStep,
        step_index: usize,
        last_error: &str,
        driver: &dyn PageDriver,
        executor: &Executor,
        ctx: &ResolutionContext,
        extracted: &mut ExtractionResult,
        operator: &mut dyn Operator,
        artifacts: &Artifacts,
    ) -> EscalationResult {
        let description = step.description().unwrap_or("").to_string();
        let screenshot = match artifacts.save_failure_screenshot(driver, step_index, &description) {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "diagnostic screenshot failed");
                None
            }
        };

        match self.policy {
            FailurePolicy::Strict => {
                error!(step_index, %last_error, "strict policy: aborting run");
                EscalationResult::Aborted
            }
            FailurePolicy::Autonomous => {
                if step.is_critical() {
                    error!(step_index, %last_error, "critical step failed: aborting run");
                    EscalationResult::Aborted
                } else {
                    warn!(step_index, %last_error, "step failed, continuing");
                    EscalationResult::Skipped
                }
            }
            FailurePolicy::Interactive => {
                let prompt = EscalationPrompt {
                    step_index,
                    action: step.kind().to_string(),
                    description,
                    last_error: last_error.to_string(),
                    screenshot,
                };
                self.escalate(step, &prompt, driver, executor, ctx, extracted, operator)
            }
        }
    }

    /// Loop until an operator decision resolves the step. A supplied locator
    /// or description is tried exactly once per input.
    fn escalate(
        &self,
        step: &ActionStep,
        prompt: &EscalationPrompt,
        driver: &dyn PageDriver,
        executor: &Executor,
        ctx: &ResolutionContext,
        extracted: &mut ExtractionResult,
        operator: &mut dyn Operator,
    ) -> EscalationResult {
        loop {
            let decision = match operator.decide(prompt) {
                Ok(d) => d,
                Err(e) => {
                    // No operator channel left (EOF, closed terminal).
                    error!(error = %format!("{e:#}"), "operator unavailable, aborting");
                    return EscalationResult::Aborted;
                }
            };

            let candidates = match decision {
                OperatorDecision::Skip => {
                    info!(step_index = prompt.step_index, "operator skipped step");
                    return EscalationResult::Skipped;
                }
                OperatorDecision::Abort => {
                    info!(step_index = prompt.step_index, "operator aborted run");
                    return EscalationResult::Aborted;
                }
                // Literal locator bypasses the resolver.
                OperatorDecision::UseLocator(locator) => vec![locator],
                OperatorDecision::Redescribe(description) => resolve(&description, ctx),
            };

            match executor.execute(step, &candidates, driver, extracted) {
                StepOutcome::Success { candidate } => {
                    info!(%candidate, "operator override succeeded");
                    return EscalationResult::Recovered { candidate };
                }
                StepOutcome::Failure { last_error } => {
                    warn!(%last_error, "operator override failed, asking again");
                }
                StepOutcome::Escalated { .. } => unreachable!("executor never escalates"),
            }
        }
    }
}

/// Operator backed by the controlling terminal.
pub struct ConsoleOperator;

impl Operator for ConsoleOperator {
    fn decide(&mut self, prompt: &EscalationPrompt) -> Result<OperatorDecision> {
        let mut out = std::io::stderr();
        writeln!(out, "\n--- step {} needs attention ---", prompt.step_index + 1)?;
        writeln!(
            out,
            "action '{}' on '{}' failed: {}",
            prompt.action, prompt.description, prompt.last_error
        )?;
        if let Some(path) = &prompt.screenshot {
            writeln!(out, "screenshot: {path}")?;
        }
        writeln!(out, " 1) supply a literal locator (CSS, or XPath starting with //)")?;
        writeln!(out, " 2) supply a new element description")?;
        writeln!(out, " 3) skip this step")?;
        writeln!(out, " 4) abort the run")?;

        loop {
            let choice = read_line("choice (1/2/3/4): ")?;
            match choice.as_str() {
                "1" => {
                    let locator = read_line("locator: ")?;
                    if !locator.is_empty() {
                        return Ok(OperatorDecision::UseLocator(locator));
                    }
                }
                "2" => {
                    let description = read_line("description: ")?;
                    if !description.is_empty() {
                        return Ok(OperatorDecision::Redescribe(description));
                    }
                }
                "3" => return Ok(OperatorDecision::Skip),
                "4" => return Ok(OperatorDecision::Abort),
                _ => {}
            }
        }
    }
}

fn read_line(prompt: &str) -> Result<String> {
    use std::io::BufRead;
    eprint!("{prompt}");
    let mut line = String::new();
    let read = std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading operator input")?;
    anyhow::ensure!(read > 0, "operator input closed");
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockDriver, MockElement};
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedOperator {
        decisions: VecDeque<OperatorDecision>,
        prompts: Vec<EscalationPrompt>,
    }

    impl ScriptedOperator {
        fn new(decisions: Vec<OperatorDecision>) -> Self {
            Self {
                decisions: decisions.into(),
                prompts: Vec::new(),
            }
        }
    }

    impl Operator for ScriptedOperator {
        fn decide(&mut self, prompt: &EscalationPrompt) -> Result<OperatorDecision> {
            self.prompts.push(prompt.clone());
            self.decisions
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    fn executor() -> Executor {
        Executor {
            candidate_timeout: Duration::from_millis(10),
            settle: Duration::ZERO,
            max_scroll_rounds: 5,
        }
    }

    fn click_step() -> ActionStep {
        ActionStep::Click {
            selector_description: "the elusive button".to_string(),
        }
    }

    fn run(
        policy: FailurePolicy,
        step: &ActionStep,
        driver: &MockDriver,
        operator: &mut dyn Operator,
        dir: &tempfile::TempDir,
    ) -> EscalationResult {
        let artifacts = Artifacts::new(dir.path()).unwrap();
        Controller::new(policy).on_failure(
            step,
            3,
            "candidate 'button' failed: no attached element",
            driver,
            &executor(),
            &ResolutionContext::default(),
            &mut ExtractionResult::new(),
            operator,
            &artifacts,
        )
    }

    #[test]
    fn strict_policy_aborts_and_still_writes_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MockDriver::default();
        let mut operator = ScriptedOperator::new(vec![]);

        let result = run(FailurePolicy::Strict, &click_step(), &driver, &mut operator, &dir);
        assert_eq!(result, EscalationResult::Aborted);

        let shots: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(shots.len(), 1);
        assert!(operator.prompts.is_empty(), "strict mode never prompts");
    }

    #[test]
    fn autonomous_policy_skips_noncritical_and_aborts_critical() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MockDriver::default();
        let mut operator = ScriptedOperator::new(vec![]);

        let skipped = run(
            FailurePolicy::Autonomous,
            &click_step(),
            &driver,
            &mut operator,
            &dir,
        );
        assert_eq!(skipped, EscalationResult::Skipped);

        let nav = ActionStep::Navigate {
            url: "https://example.test/next".to_string(),
        };
        let aborted = run(FailurePolicy::Autonomous, &nav, &driver, &mut operator, &dir);
        assert_eq!(aborted, EscalationResult::Aborted);
    }

    #[test]
    fn interactive_locator_override_is_retried_once_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MockDriver::with_elements(&[("#the-button", MockElement::default())]);
        let mut operator = ScriptedOperator::new(vec![OperatorDecision::UseLocator(
            "#the-button".to_string(),
        )]);

        let result = run(
            FailurePolicy::Interactive,
            &click_step(),
            &driver,
            &mut operator,
            &dir,
        );
        assert_eq!(
            result,
            EscalationResult::Recovered {
                candidate: "#the-button".to_string()
            }
        );
        assert_eq!(driver.effects(), vec!["click:#the-button"]);
    }

    #[test]
    fn interactive_failed_override_loops_back_to_operator() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MockDriver::default();
        let mut operator = ScriptedOperator::new(vec![
            OperatorDecision::UseLocator("#nope".to_string()),
            OperatorDecision::Skip,
        ]);

        let result = run(
            FailurePolicy::Interactive,
            &click_step(),
            &driver,
            &mut operator,
            &dir,
        );
        assert_eq!(result, EscalationResult::Skipped);
        assert_eq!(operator.prompts.len(), 2);
    }

    #[test]
    fn interactive_redescribe_reenters_the_resolver() {
        let dir = tempfile::tempdir().unwrap();
        // The new description carries a quoted label the resolver turns into
        // an exact-text candidate.
        let driver = MockDriver::with_elements(&[(
            "//button[normalize-space(.)='Continue']",
            MockElement::default(),
        )]);
        let mut operator = ScriptedOperator::new(vec![OperatorDecision::Redescribe(
            "the 'Continue' button".to_string(),
        )]);

        let result = run(
            FailurePolicy::Interactive,
            &click_step(),
            &driver,
            &mut operator,
            &dir,
        );
        assert!(matches!(result, EscalationResult::Recovered { .. }));
    }

    #[test]
    fn operator_abort_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MockDriver::default();
        let mut operator = ScriptedOperator::new(vec![OperatorDecision::Abort]);

        let result = run(
            FailurePolicy::Interactive,
            &click_step(),
            &driver,
            &mut operator,
            &dir,
        );
        assert_eq!(result, EscalationResult::Aborted);
    }
}
