//! Built-in host framework
//!
//! Runs YAML test plans whose tests are shell commands, calling the worker
//! interceptor around every test.

mod executor;
mod plan;

pub use executor::{execute, LocalRunSummary, PlanExecutor, UnitOutcome};
pub use plan::{PlanError, PlannedTest, SuitePlan, TestPlan, TestSpec};
