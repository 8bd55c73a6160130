pub mod ai;
pub mod browser;
pub mod crawl;
pub mod discover;
pub mod driver;
pub mod escalate;
pub mod executor;
pub mod frontier;
pub mod report;
pub mod resolve;
pub mod types;

pub use crawl::{RunConfig, RunSummary};
pub use types::{ActionStep, FailurePolicy, StepOutcome};
