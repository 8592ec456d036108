//! Distributed worker agent

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Decision, Interceptor, SkipReason, UnreachablePolicy};
use crate::models::{
    ExecutionId, Granularity, OwnerId, OwnershipRecord, TerminalStatus, TestResult, WorkItemKey,
};
use crate::registry::{Backend, RegistryError, ResultStore, WorkRegistry, DEFAULT_TTL};

/// Claims units before they run and reports them after
pub struct WorkerAgent {
    registry: Arc<dyn WorkRegistry>,
    results: Arc<dyn ResultStore>,
    execution: ExecutionId,
    owner: OwnerId,
    granularity: Granularity,
    ttl: Duration,
    policy: UnreachablePolicy,
    /// Status reported so far per key, so one failed unit keeps a shared key failed
    reported: Mutex<HashMap<WorkItemKey, TerminalStatus>>,
}

impl WorkerAgent {
    pub fn new(backend: &Backend, execution: ExecutionId, owner: OwnerId) -> Self {
        Self {
            registry: backend.registry.clone(),
            results: backend.results.clone(),
            execution,
            owner,
            granularity: Granularity::default(),
            ttl: DEFAULT_TTL,
            policy: UnreachablePolicy::default(),
            reported: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_policy(mut self, policy: UnreachablePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn execution(&self) -> &ExecutionId {
        &self.execution
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Ask the registry whether this worker may run the unit at `path`
    pub async fn claim(&self, path: &[String]) -> Result<Decision, RegistryError> {
        let key = WorkItemKey::derive(path, self.granularity)?;

        match self
            .registry
            .try_claim(&self.execution, &key, &self.owner, self.ttl)
            .await
        {
            Ok(outcome) if outcome.granted => {
                debug!("Claimed {} (retries {})", key, outcome.retry_count);
                Ok(Decision::Run {
                    key,
                    retry_count: outcome.retry_count,
                })
            }
            Ok(outcome) => {
                debug!("Skipping {}, owned by {}", key, outcome.owner);
                Ok(Decision::Skip {
                    key,
                    reason: SkipReason::AlreadyRunning {
                        owner: outcome.owner,
                    },
                })
            }
            Err(e) if e.is_indeterminate() => {
                warn!("Cannot claim {}: {} (policy: {})", key, e, self.policy);
                Ok(match self.policy {
                    UnreachablePolicy::Skip => Decision::Skip {
                        key,
                        reason: SkipReason::Unreachable(e.to_string()),
                    },
                    UnreachablePolicy::Fail => Decision::Fail {
                        key,
                        reason: e.to_string(),
                    },
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Report the terminal outcome of a unit this worker ran.
    ///
    /// Returns `None` when the registry says another worker owns the key;
    /// such a result is dropped.
    pub async fn complete(
        &self,
        result: &TestResult,
    ) -> Result<Option<OwnershipRecord>, RegistryError> {
        let key = WorkItemKey::derive(result.path.as_slice(), self.granularity)?;
        let status = self.merge_status(&key, result);

        let record = match self
            .registry
            .report_status(&self.execution, &key, &self.owner, status)
            .await
        {
            Ok(record) => record,
            Err(RegistryError::OwnershipMismatch { key, owner }) => {
                warn!(
                    "Discarding result for {}: owned by {}, not {}",
                    key, owner, self.owner
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let result = result.clone().with_runner(self.owner.clone());
        self.results
            .append_result(&self.execution, &result, self.ttl)
            .await?;

        info!("{}", result);
        Ok(Some(record))
    }

    fn merge_status(&self, key: &WorkItemKey, result: &TestResult) -> TerminalStatus {
        let status = if result.state.is_success() {
            TerminalStatus::Success
        } else {
            TerminalStatus::Failed
        };

        let mut reported = match self.reported.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let merged = match reported.get(key) {
            Some(TerminalStatus::Failed) => TerminalStatus::Failed,
            _ => status,
        };
        reported.insert(key.clone(), merged);
        merged
    }
}

#[async_trait]
impl Interceptor for WorkerAgent {
    async fn before_unit(&self, path: &[String]) -> Result<Decision, RegistryError> {
        self.claim(path).await
    }

    async fn after_unit(&self, result: &TestResult) -> Result<(), RegistryError> {
        self.complete(result).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OwnershipStatus, TestError, TestState};
    use crate::registry::{BackendTarget, MemoryRegistry};
    use tokio_test::assert_ok;

    fn path(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    fn agents(n: usize, granularity: Granularity) -> (Arc<MemoryRegistry>, Vec<WorkerAgent>) {
        let memory = Arc::new(MemoryRegistry::new());
        let backend = Backend::memory(memory.clone());
        let agents = (0..n)
            .map(|i| {
                WorkerAgent::new(&backend, ExecutionId::new("E1"), OwnerId::new(format!("w{i}")))
                    .with_granularity(granularity)
            })
            .collect();
        (memory, agents)
    }

    #[tokio::test]
    async fn test_only_one_agent_runs_each_unit() {
        let (_memory, agents) = agents(3, Granularity::Test);
        let units = [path(&["S", "a"]), path(&["S", "b"]), path(&["S", "c"])];

        let mut runs = 0;
        for unit in &units {
            for agent in &agents {
                if agent.claim(unit).await.unwrap().should_run() {
                    runs += 1;
                }
            }
        }
        assert_eq!(runs, units.len());
    }

    #[tokio::test]
    async fn test_suite_granularity_keeps_suite_together() {
        let (_memory, agents) = agents(2, Granularity::Suite);
        let first = agents[0].claim(&path(&["S", "a"])).await.unwrap();
        let second = agents[1].claim(&path(&["S", "b"])).await.unwrap();
        let again = agents[0].claim(&path(&["S", "b"])).await.unwrap();

        assert!(first.should_run());
        assert!(matches!(
            second,
            Decision::Skip {
                reason: SkipReason::AlreadyRunning { ref owner },
                ..
            } if owner.as_str() == "w0"
        ));
        assert_eq!(
            again,
            Decision::Run {
                key: WorkItemKey::parse("S").unwrap(),
                retry_count: 1
            }
        );
    }

    #[tokio::test]
    async fn test_complete_reports_and_stores() {
        let (memory, agents) = agents(1, Granularity::Test);
        let agent = &agents[0];
        let unit = path(&["S", "a"]);
        agent.claim(&unit).await.unwrap();

        let result = TestResult::failed(unit.clone(), 12, TestError::new("nope"));
        let record = assert_ok!(agent.complete(&result).await).unwrap();
        assert_eq!(record.status, OwnershipStatus::Failed);

        let count = memory
            .state_count(agent.execution(), TestState::Failed)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let stored = memory.load_results().await.unwrap();
        assert_eq!(stored[0].1[0].runner.as_ref().map(OwnerId::as_str), Some("w0"));
    }

    #[tokio::test]
    async fn test_shared_key_stays_failed() {
        let (memory, agents) = agents(1, Granularity::Suite);
        let agent = &agents[0];
        let a = path(&["S", "a"]);
        let b = path(&["S", "b"]);
        agent.claim(&a).await.unwrap();
        agent.claim(&b).await.unwrap();

        agent
            .complete(&TestResult::failed(a, 1, TestError::new("x")))
            .await
            .unwrap();
        agent.complete(&TestResult::passed(b, 1)).await.unwrap();

        let record = memory
            .get(agent.execution(), &WorkItemKey::parse("S").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, OwnershipStatus::Failed);
    }

    #[tokio::test]
    async fn test_mismatched_report_is_discarded() {
        let (memory, agents) = agents(2, Granularity::Test);
        let unit = path(&["S", "a"]);
        agents[0].claim(&unit).await.unwrap();

        let stray = TestResult::passed(unit, 1);
        let outcome = assert_ok!(agents[1].complete(&stray).await);
        assert!(outcome.is_none());
        assert!(memory.load_results().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_path_is_an_error() {
        let (_memory, agents) = agents(1, Granularity::Test);
        let err = agents[0].claim(&path(&["S", ""])).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidWorkItem(_)));
    }

    #[tokio::test]
    async fn test_unreachable_policy() {
        let backend = Backend::connect(
            BackendTarget::Coordinator("127.0.0.1:1".into()),
            Duration::from_secs(2),
        )
        .unwrap();
        let unit = path(&["S", "a"]);

        let skipping = WorkerAgent::new(&backend, ExecutionId::new("E1"), OwnerId::new("w"));
        assert!(matches!(
            skipping.claim(&unit).await.unwrap(),
            Decision::Skip { reason: SkipReason::Unreachable(_), .. }
        ));

        let failing = WorkerAgent::new(&backend, ExecutionId::new("E1"), OwnerId::new("w"))
            .with_policy(UnreachablePolicy::Fail);
        assert!(matches!(
            failing.claim(&unit).await.unwrap(),
            Decision::Fail { .. }
        ));
    }
}
