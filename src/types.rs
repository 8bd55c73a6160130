use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single scripted step the planner asks the agent to perform.
///
/// Element targets are natural-language descriptions, never raw selectors;
/// the resolver turns them into candidate locators at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionStep {
    Navigate {
        url: String,
    },
    Click {
        selector_description: String,
    },
    Type {
        selector_description: String,
        value: String,
    },
    Select {
        selector_description: String,
        value: String,
    },
    Scroll {
        to: ScrollEdge,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector_description: Option<String>,
    },
    Extract {
        selector_description: String,
        name: String,
    },
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Wait {
        selector_description: String,
    },
    Assert {
        selector_description: String,
    },
    /// Constructed by the plan parser for an unknown `action` tag. Reported
    /// as its own outcome, never executed and never silently dropped.
    #[serde(skip_deserializing)]
    Unrecognized { kind: String },
}

impl ActionStep {
    /// Short action name for logs and report lines.
    pub fn kind(&self) -> &str {
        match self {
            ActionStep::Navigate { .. } => "navigate",
            ActionStep::Click { .. } => "click",
            ActionStep::Type { .. } => "type",
            ActionStep::Select { .. } => "select",
            ActionStep::Scroll { .. } => "scroll",
            ActionStep::Extract { .. } => "extract",
            ActionStep::Screenshot { .. } => "screenshot",
            ActionStep::Wait { .. } => "wait",
            ActionStep::Assert { .. } => "assert",
            ActionStep::Unrecognized { kind } => kind,
        }
    }

    /// The element description this step targets, if it targets one.
    pub fn description(&self) -> Option<&str> {
        match self {
            ActionStep::Click {
                selector_description,
            }
            | ActionStep::Type {
                selector_description,
                ..
            }
            | ActionStep::Select {
                selector_description,
                ..
            }
            | ActionStep::Extract {
                selector_description,
                ..
            }
            | ActionStep::Wait {
                selector_description,
            }
            | ActionStep::Assert {
                selector_description,
            } => Some(selector_description),
            ActionStep::Scroll {
                selector_description,
                ..
            } => selector_description.as_deref(),
            _ => None,
        }
    }

    /// A failed navigate invalidates everything after it, so it aborts the
    /// run even under the autonomous policy.
    pub fn is_critical(&self) -> bool {
        matches!(self, ActionStep::Navigate { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollEdge {
    Top,
    Bottom,
}

impl std::fmt::Display for ScrollEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrollEdge::Top => write!(f, "top"),
            ScrollEdge::Bottom => write!(f, "bottom"),
        }
    }
}

/// Result of running one step's candidate list to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The candidate expression that completed the full effect.
    Success { candidate: String },
    /// Every candidate failed; carries the last per-candidate error.
    Failure { last_error: String },
    /// Execution was suspended and resolved by an operator decision.
    Escalated { decision: EscalationResult },
}

/// Terminal state of an escalated step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationResult {
    Recovered { candidate: String },
    Skipped,
    Aborted,
}

/// What an operator supplies at the escalation suspension point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorDecision {
    /// Literal locator, retried once, bypassing the resolver.
    UseLocator(String),
    /// Replacement natural-language description, re-enters the resolver.
    Redescribe(String),
    Skip,
    Abort,
}

/// How the run reacts when a step exhausts its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Log and continue; abort only on critical steps.
    Autonomous,
    /// Suspend and ask an operator for a resolution.
    Interactive,
    /// Any failure is fatal.
    Strict,
}

/// One extracted value, scalar or plural depending on how the step was
/// phrased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractedValue {
    Single(String),
    Many(Vec<String>),
}

/// Accumulated extraction output for the whole run, keyed by the `name`
/// field of extract steps. Later writes to the same key overwrite.
pub type ExtractionResult = BTreeMap<String, ExtractedValue>;

/// Lifecycle of a single step through resolve/execute/escalate. Mostly
/// useful for logging and for asserting transitions in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Resolving,
    Executing,
    Success,
    Failure,
    Escalated,
    Skipped,
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_step_parses_snake_case_tag() {
        let step: ActionStep = serde_json::from_str(
            r#"{"action":"type","selector_description":"email input","value":"a@b.c"}"#,
        )
        .unwrap();
        match step {
            ActionStep::Type {
                selector_description,
                value,
            } => {
                assert_eq!(selector_description, "email input");
                assert_eq!(value, "a@b.c");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn scroll_parses_without_description() {
        let step: ActionStep =
            serde_json::from_str(r#"{"action":"scroll","to":"bottom"}"#).unwrap();
        match step {
            ActionStep::Scroll {
                to,
                selector_description,
            } => {
                assert_eq!(to, ScrollEdge::Bottom);
                assert!(selector_description.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn only_navigate_is_critical() {
        let nav: ActionStep =
            serde_json::from_str(r#"{"action":"navigate","url":"https://example.test"}"#).unwrap();
        let click: ActionStep =
            serde_json::from_str(r#"{"action":"click","selector_description":"x"}"#).unwrap();
        assert!(nav.is_critical());
        assert!(!click.is_critical());
    }

    #[test]
    fn extracted_value_serializes_untagged() {
        let mut out = ExtractionResult::new();
        out.insert("title".into(), ExtractedValue::Single("Hi".into()));
        out.insert(
            "all_prices".into(),
            ExtractedValue::Many(vec!["$1".into(), "$2".into()]),
        );
        let json = serde_json::to_string(&out).unwrap();
        assert_eq!(json, r#"{"all_prices":["$1","$2"],"title":"Hi"}"#);
    }
}
