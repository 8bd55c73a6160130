use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use dotenvy::dotenv;
use tracing::{info, warn};

use webpilot::ai::{AiClient, Analyzer, BlockingAnalyzer};
use webpilot::browser::ChromeDriver;
use webpilot::crawl::{self, RunConfig};
use webpilot::escalate::ConsoleOperator;
use webpilot::frontier::NormalizePolicy;
use webpilot::types::FailurePolicy;

/// Explore a site with a real browser, performing interactions described in
/// natural language and recording what happened.
#[derive(Parser)]
#[command(name = "webpilot", version)]
struct Cli {
    /// Starting URL; its host becomes the crawl's domain scope.
    start_url: String,

    /// Natural-language instruction turned into an action plan by the AI
    /// planner and replayed on each visited page.
    #[arg(short, long)]
    instruction: Option<String>,

    /// Maximum number of pages to process.
    #[arg(long, default_value_t = 10)]
    max_pages: usize,

    /// Follow links that leave the starting host.
    #[arg(long)]
    allow_external: bool,

    /// Fill and submit each discovered form once with placeholder data.
    #[arg(long)]
    test_forms: bool,

    /// What to do when a step exhausts every candidate locator.
    #[arg(long, value_enum, default_value_t = FailurePolicy::Autonomous)]
    policy: FailurePolicy,

    /// URL normalization for frontier dedup.
    #[arg(long, value_enum, default_value_t = NormalizePolicy::StripQuery)]
    normalize: NormalizePolicy,

    /// Ask the AI analyzer this question about every visited page.
    #[arg(long)]
    analysis_prompt: Option<String>,

    /// Run with a visible browser window.
    #[arg(long)]
    headed: bool,

    #[arg(long, default_value_t = 15)]
    nav_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    candidate_timeout_secs: u64,

    #[arg(long, default_value = "web_test_report.txt")]
    report: PathBuf,

    #[arg(long, default_value = "screenshots")]
    screenshot_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webpilot=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let plan = match &cli.instruction {
        Some(instruction) => {
            let ai = AiClient::new()?;
            info!("asking planner for an action plan");
            let plan = ai.plan(instruction).await;
            if plan.is_empty() {
                // Fatal: an instruction was given but nothing actionable
                // came back.
                bail!("planner produced no actionable steps for the instruction");
            }
            info!(steps = plan.len(), "action plan ready");
            plan
        }
        None => Vec::new(),
    };

    let analyzer = match &cli.analysis_prompt {
        Some(prompt) => Some(BlockingAnalyzer::new(AiClient::new()?, prompt.clone())),
        None => None,
    };

    let config = RunConfig {
        start_url: cli.start_url.clone(),
        max_pages: cli.max_pages,
        allow_external: cli.allow_external,
        test_forms: cli.test_forms,
        policy: cli.policy,
        normalize: cli.normalize,
        nav_timeout: Duration::from_secs(cli.nav_timeout_secs),
        candidate_timeout: Duration::from_secs(cli.candidate_timeout_secs),
        report_path: cli.report.clone(),
        screenshot_dir: cli.screenshot_dir.clone(),
    };

    let headed = cli.headed;
    let summary = tokio::task::spawn_blocking(move || -> Result<crawl::RunSummary> {
        info!("launching Chrome");
        let driver = ChromeDriver::launch(!headed)?;
        let mut operator = ConsoleOperator;
        crawl::run(
            &config,
            &driver,
            &plan,
            analyzer.as_ref().map(|a| a as &dyn Analyzer),
            &mut operator,
        )
    })
    .await
    .map_err(|e| anyhow::anyhow!("crawl task panicked: {e}"))??;

    info!(
        pages = summary.pages_visited,
        forms = summary.forms_tested,
        "run finished; report at {}",
        cli.report.display()
    );
    if summary.aborted {
        warn!("run was aborted before completing; partial report written");
        std::process::exit(1);
    }
    Ok(())
}
