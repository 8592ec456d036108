//! Worker side of the protocol
//!
//! A host framework calls an [`Interceptor`] twice per unit of work: before
//! running it, to learn whether this process owns it, and after it finished,
//! to hand over the outcome. [`WorkerAgent`] is the distributed implementation;
//! [`PassthroughInterceptor`] runs everything locally.

mod agent;

pub use agent::WorkerAgent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Granularity, OwnerId, TestResult, WorkItemKey};
use crate::registry::RegistryError;

/// What to do when the registry cannot be reached during a claim
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnreachablePolicy {
    /// Do not run the unit; another worker may own it
    #[default]
    Skip,
    /// Do not run the unit and count it as failed
    Fail,
}

impl UnreachablePolicy {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "fail" | "failed" | "error" => UnreachablePolicy::Fail,
            _ => UnreachablePolicy::Skip,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UnreachablePolicy::Skip => "skip",
            UnreachablePolicy::Fail => "fail",
        }
    }
}

impl fmt::Display for UnreachablePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a unit was not run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Another worker owns the work item
    AlreadyRunning { owner: OwnerId },
    /// The registry could not answer
    Unreachable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyRunning { owner } => write!(f, "already running on {owner}"),
            SkipReason::Unreachable(msg) => write!(f, "registry unreachable: {msg}"),
        }
    }
}

/// Verdict for one unit before it runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// This process owns the unit and must run it
    Run { key: WorkItemKey, retry_count: u32 },
    /// Do not run, do not report
    Skip { key: WorkItemKey, reason: SkipReason },
    /// Do not run, count as failed locally
    Fail { key: WorkItemKey, reason: String },
}

impl Decision {
    pub fn key(&self) -> &WorkItemKey {
        match self {
            Decision::Run { key, .. } | Decision::Skip { key, .. } | Decision::Fail { key, .. } => {
                key
            }
        }
    }

    pub fn should_run(&self) -> bool {
        matches!(self, Decision::Run { .. })
    }
}

/// Hooks a host framework calls around every unit of work
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Called once per discovered unit, before its body runs
    async fn before_unit(&self, path: &[String]) -> Result<Decision, RegistryError>;

    /// Called with the terminal outcome of a unit that was run
    async fn after_unit(&self, result: &TestResult) -> Result<(), RegistryError>;
}

/// Interceptor for disabled mode: every unit runs, nothing is reported
#[derive(Clone, Debug, Default)]
pub struct PassthroughInterceptor {
    granularity: Granularity,
}

impl PassthroughInterceptor {
    pub fn new(granularity: Granularity) -> Self {
        Self { granularity }
    }
}

#[async_trait]
impl Interceptor for PassthroughInterceptor {
    async fn before_unit(&self, path: &[String]) -> Result<Decision, RegistryError> {
        let key = WorkItemKey::derive(path, self.granularity)?;
        Ok(Decision::Run {
            key,
            retry_count: 0,
        })
    }

    async fn after_unit(&self, _result: &TestResult) -> Result<(), RegistryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!(UnreachablePolicy::from_str("fail"), UnreachablePolicy::Fail);
        assert_eq!(UnreachablePolicy::from_str(" FAIL "), UnreachablePolicy::Fail);
        assert_eq!(UnreachablePolicy::from_str("skip"), UnreachablePolicy::Skip);
        assert_eq!(UnreachablePolicy::from_str("whatever"), UnreachablePolicy::Skip);
    }

    #[tokio::test]
    async fn test_passthrough_runs_everything() {
        let interceptor = PassthroughInterceptor::new(Granularity::Suite);
        let path = vec!["Suite".to_string(), "t".to_string()];
        let decision = interceptor.before_unit(&path).await.unwrap();
        assert!(decision.should_run());
        assert_eq!(decision.key().as_str(), "Suite");

        let empty: Vec<String> = Vec::new();
        assert!(interceptor.before_unit(&empty).await.is_err());
    }
}
