//! AI collaborators: the instruction planner (natural language -> action
//! plan) and the page analyzer (page content -> free-text assessment). Both
//! degrade instead of propagating: a malformed plan becomes an empty one and
//! an analyzer fault becomes a placeholder string, so the crawl keeps going.

use anyhow::{Result, anyhow};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::types::ActionStep;

const MODEL: &str = "gpt-4o-mini";

/// Cap on page content submitted for analysis.
pub const MAX_ANALYSIS_CHARS: usize = 15_000;
const TRUNCATION_MARKER: &str = "\n... [Content Truncated] ...";

const PLANNER_PROMPT: &str = r#"You convert user instructions into a JSON array of web automation actions.
Respond with ONLY a JSON object: {"actions": [...]}. No markdown, no explanation.

Each action is an object with an "action" key:
- {"action":"navigate","url":"https://..."}
- {"action":"click","selector_description":"<natural-language description of the element>"}
- {"action":"type","selector_description":"<description of the input>","value":"<text to type>"}
- {"action":"select","selector_description":"<description of the dropdown>","value":"<option text>"}
- {"action":"scroll","to":"bottom" or "top"} (add "selector_description" to scroll one element)
- {"action":"extract","selector_description":"<description>","name":"<output variable name>"}
  For multiple items say so in the description (e.g. "all product titles") and use a plural name.
- {"action":"screenshot","name":"<filename.png>"}
- {"action":"wait","selector_description":"<description>"}
- {"action":"assert","selector_description":"<description>"}

Only generate actions the user asked for or clearly implied. If the user gives
a starting URL, the first action must navigate to it."#;

pub struct AiClient {
    client: Client,
    api_key: String,
}

impl AiClient {
    pub fn new() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY not set in environment"))?;
        Ok(Self {
            client: Client::new(),
            api_key,
        })
    }

    /// Turn an instruction into an ordered action plan. Any failure --
    /// transport, HTTP, malformed output -- degrades to an empty plan.
    pub async fn plan(&self, instruction: &str) -> Vec<ActionStep> {
        match self.chat(PLANNER_PROMPT, instruction).await {
            Ok(text) => parse_plan(&text),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "planner call failed");
                Vec::new()
            }
        }
    }

    /// Free-text page assessment. Content is capped before submission;
    /// failures come back as a descriptive placeholder, never an error.
    pub async fn analyze(&self, content: &str, prompt: &str) -> String {
        let content = truncate_for_analysis(content);
        let user = format!("Analyze the following web page content. {prompt}\n\nContent:\n{content}");
        match self
            .chat("You are a meticulous web QA analyst.", &user)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => "AI analysis completed, but no text response was generated.".to_string(),
            Err(e) => format!("AI analysis failed: {e:#}"),
        }
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": MODEL,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "temperature": 0.2,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(anyhow!("API error ({status}): {message}"));
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("no content in response: {body}"))?;
        debug!(len = content.len(), "model replied");
        Ok(content.to_string())
    }
}

/// Per-page analysis as seen by the (synchronous) crawl loop. The real
/// implementation bridges onto the async client; tests script it.
pub trait Analyzer {
    fn analyze_page(&self, content: &str) -> String;
}

/// Bridges the crawl loop (which runs on a blocking thread) to the async
/// `AiClient`.
pub struct BlockingAnalyzer {
    handle: tokio::runtime::Handle,
    client: AiClient,
    prompt: String,
}

impl BlockingAnalyzer {
    pub fn new(client: AiClient, prompt: impl Into<String>) -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
            client,
            prompt: prompt.into(),
        }
    }
}

impl Analyzer for BlockingAnalyzer {
    fn analyze_page(&self, content: &str) -> String {
        self.handle.block_on(self.client.analyze(content, &self.prompt))
    }
}

/// Parse planner output into steps. Tolerant per element: an unknown
/// `action` tag becomes an explicit `Unrecognized` step instead of sinking
/// the whole plan; a plan that is not JSON at all becomes empty.
pub fn parse_plan(text: &str) -> Vec<ActionStep> {
    let cleaned = strip_fences(text);
    let Ok(value) = serde_json::from_str::<serde_json::Value>(cleaned) else {
        warn!("planner output is not valid JSON");
        return Vec::new();
    };

    let actions = match &value {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(map) => match map.get("actions").and_then(|a| a.as_array()) {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    actions
        .iter()
        .map(|item| match serde_json::from_value::<ActionStep>(item.clone()) {
            Ok(step) => step,
            Err(_) => ActionStep::Unrecognized {
                kind: item["action"].as_str().unwrap_or("(missing)").to_string(),
            },
        })
        .collect()
}

fn strip_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Cut content to the analysis cap on a character boundary, appending a
/// marker when anything was dropped.
pub fn truncate_for_analysis(content: &str) -> String {
    if content.chars().count() <= MAX_ANALYSIS_CHARS {
        return content.to_string();
    }
    let mut out: String = content.chars().take(MAX_ANALYSIS_CHARS).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plan_reads_actions_object() {
        let steps = parse_plan(
            r#"{"actions":[
                {"action":"navigate","url":"https://example.test"},
                {"action":"type","selector_description":"search input","value":"mugs"},
                {"action":"extract","selector_description":"all product titles","name":"titles"}
            ]}"#,
        );
        assert_eq!(steps.len(), 3);
        assert!(matches!(steps[0], ActionStep::Navigate { .. }));
        assert!(matches!(steps[2], ActionStep::Extract { .. }));
    }

    #[test]
    fn parse_plan_strips_markdown_fences() {
        let steps = parse_plan(
            "```json\n{\"actions\":[{\"action\":\"screenshot\"}]}\n```",
        );
        assert_eq!(steps.len(), 1);
        assert!(matches!(steps[0], ActionStep::Screenshot { .. }));
    }

    #[test]
    fn unknown_action_kind_becomes_explicit_unrecognized_step() {
        let steps = parse_plan(
            r#"{"actions":[{"action":"hover","selector_description":"menu"}]}"#,
        );
        assert_eq!(steps.len(), 1);
        match &steps[0] {
            ActionStep::Unrecognized { kind } => assert_eq!(kind, "hover"),
            other => panic!("expected unrecognized, got {other:?}"),
        }
    }

    #[test]
    fn malformed_planner_output_degrades_to_empty_plan() {
        assert!(parse_plan("sorry, I cannot do that").is_empty());
        assert!(parse_plan("{\"nope\":1}").is_empty());
        assert!(parse_plan("").is_empty());
    }

    #[test]
    fn truncation_respects_cap_and_appends_marker() {
        let short = "a".repeat(100);
        assert_eq!(truncate_for_analysis(&short), short);

        let long = "b".repeat(MAX_ANALYSIS_CHARS + 5);
        let cut = truncate_for_analysis(&long);
        assert!(cut.ends_with("[Content Truncated] ..."));
        assert_eq!(
            cut.chars().filter(|c| *c == 'b').count(),
            MAX_ANALYSIS_CHARS
        );
    }
}
