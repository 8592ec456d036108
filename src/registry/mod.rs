//! Ownership registry
//!
//! The single source of truth for "who owns this work item". Two traits
//! split the surface: [`WorkRegistry`] for atomic claims and status
//! reports, [`ResultStore`] for the append-only result lists that feed the
//! aggregator. Concrete backends:
//!
//! - [`MemoryRegistry`]: in-process map, used by the coordinator and in tests
//! - [`RedisRegistry`]: shared Redis store, used directly by workers
//! - [`crate::coordinator::CoordinatorClient`]: HTTP binding to a coordinator

mod memory;
mod redis;

pub use memory::MemoryRegistry;
pub use redis::{RedisConfig, RedisError, RedisRegistry, RespValue};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::coordinator::CoordinatorClient;
use crate::models::{
    ClaimOutcome, ExecutionId, OwnerId, OwnershipRecord, TerminalStatus, TestResult, TestState,
    WorkItemError, WorkItemKey,
};

/// Default lifetime of ownership records and result lists (24h)
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid work item: {0}")]
    InvalidWorkItem(String),

    #[error("Work item {key} is owned by {owner}")]
    OwnershipMismatch { key: String, owner: String },

    #[error("Registry unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Registry storage failure: {0}")]
    Storage(String),
}

impl RegistryError {
    /// Whether the outcome of the request is unknown (transport or storage trouble)
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, RegistryError::Unreachable(_) | RegistryError::Storage(_))
    }
}

impl From<WorkItemError> for RegistryError {
    fn from(err: WorkItemError) -> Self {
        RegistryError::InvalidWorkItem(err.to_string())
    }
}

/// Atomic claim-or-read store of ownership records
#[async_trait]
pub trait WorkRegistry: Send + Sync {
    /// Claim a work item. Exactly one concurrent caller per key is granted;
    /// the recorded owner calling again is granted with its retry count bumped.
    async fn try_claim(
        &self,
        execution: &ExecutionId,
        key: &WorkItemKey,
        owner: &OwnerId,
        ttl: Duration,
    ) -> Result<ClaimOutcome, RegistryError>;

    /// Read the current record of a work item, if any
    async fn get(
        &self,
        execution: &ExecutionId,
        key: &WorkItemKey,
    ) -> Result<Option<OwnershipRecord>, RegistryError>;

    /// Record the terminal status of an owned work item
    async fn report_status(
        &self,
        execution: &ExecutionId,
        key: &WorkItemKey,
        owner: &OwnerId,
        status: TerminalStatus,
    ) -> Result<OwnershipRecord, RegistryError>;
}

/// Append-only result lists and per-state counters, scoped by execution id
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn append_result(
        &self,
        execution: &ExecutionId,
        result: &TestResult,
        ttl: Duration,
    ) -> Result<(), RegistryError>;

    /// All stored results, grouped by execution id, in arrival order
    async fn load_results(&self) -> Result<Vec<(ExecutionId, Vec<TestResult>)>, RegistryError>;

    async fn state_count(
        &self,
        execution: &ExecutionId,
        state: TestState,
    ) -> Result<u64, RegistryError>;
}

/// Where a worker finds the registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendTarget {
    /// Shared Redis store, `redis://...`
    Redis(String),
    /// HTTP coordinator, `host:port` or URL
    Coordinator(String),
}

/// A connected registry backend
#[derive(Clone)]
pub struct Backend {
    pub registry: Arc<dyn WorkRegistry>,
    pub results: Arc<dyn ResultStore>,
    pub target: BackendTarget,
}

impl Backend {
    /// Build the backend selected at startup
    pub fn connect(target: BackendTarget, timeout: Duration) -> Result<Self, RegistryError> {
        match &target {
            BackendTarget::Redis(url) => {
                let config = RedisConfig::from_url(url)
                    .map_err(|e| RegistryError::MalformedRequest(e.to_string()))?;
                let store = Arc::new(RedisRegistry::new(config).with_timeout(timeout));
                Ok(Self {
                    registry: store.clone(),
                    results: store,
                    target,
                })
            }
            BackendTarget::Coordinator(address) => {
                let client = Arc::new(CoordinatorClient::new(address, timeout)?);
                Ok(Self {
                    registry: client.clone(),
                    results: client,
                    target,
                })
            }
        }
    }

    /// Use an in-process registry (tests and single-process runs)
    pub fn memory(registry: Arc<MemoryRegistry>) -> Self {
        Self {
            registry: registry.clone(),
            results: registry,
            target: BackendTarget::Coordinator("memory".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indeterminate_errors() {
        assert!(RegistryError::Unreachable("down".into()).is_indeterminate());
        assert!(RegistryError::Storage("poisoned".into()).is_indeterminate());
        assert!(!RegistryError::InvalidWorkItem("".into()).is_indeterminate());
        assert!(!RegistryError::OwnershipMismatch {
            key: "k".into(),
            owner: "o".into()
        }
        .is_indeterminate());
    }

    #[test]
    fn test_connect_rejects_bad_redis_url() {
        let result = Backend::connect(
            BackendTarget::Redis("http://localhost".into()),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(RegistryError::MalformedRequest(_))));
    }

    #[test]
    fn test_connect_coordinator_is_lazy() {
        let backend = Backend::connect(
            BackendTarget::Coordinator("127.0.0.1:1".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(backend.target, BackendTarget::Coordinator("127.0.0.1:1".into()));
    }
}
