//! In-memory registry
//!
//! Every claim and report runs inside one critical section, which is what
//! makes claims atomic for the coordinator process.

use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{RegistryError, ResultStore, WorkRegistry};
use crate::models::{
    ClaimOutcome, ExecutionId, OwnerId, OwnershipRecord, TerminalStatus, TestResult, TestState,
    WorkItemKey,
};

struct OwnershipEntry {
    record: OwnershipRecord,
    expires_at: Instant,
}

#[derive(Default)]
struct ResultList {
    results: Vec<TestResult>,
    passed: u64,
    failed: u64,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct MemoryState {
    ownership: HashMap<(ExecutionId, WorkItemKey), OwnershipEntry>,
    results: HashMap<ExecutionId, ResultList>,
}

/// Registry kept in process memory
///
/// Records and result lists expire after the ttl passed with each call.
pub struct MemoryRegistry {
    state: Mutex<MemoryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, RegistryError> {
        self.state
            .lock()
            .map_err(|_| RegistryError::Storage("registry lock poisoned".to_string()))
    }

    /// Drop expired ownership records and result lists. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, RegistryError> {
        let now = Instant::now();
        let mut state = self.lock()?;

        let before = state.ownership.len() + state.results.len();
        state.ownership.retain(|_, entry| entry.expires_at > now);
        state
            .results
            .retain(|_, list| list.expires_at.map(|at| at > now).unwrap_or(true));
        let removed = before - (state.ownership.len() + state.results.len());

        if removed > 0 {
            debug!("Purged {} expired registry entries", removed);
        }
        Ok(removed)
    }

    /// Number of live ownership records
    pub fn len(&self) -> Result<usize, RegistryError> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .ownership
            .values()
            .filter(|e| e.expires_at > now)
            .count())
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len()? == 0)
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkRegistry for MemoryRegistry {
    async fn try_claim(
        &self,
        execution: &ExecutionId,
        key: &WorkItemKey,
        owner: &OwnerId,
        ttl: Duration,
    ) -> Result<ClaimOutcome, RegistryError> {
        let now = Instant::now();
        let mut state = self.lock()?;

        let fresh = || OwnershipEntry {
            record: OwnershipRecord::claimed_by(owner.clone()),
            expires_at: now + ttl,
        };

        let record = match state.ownership.entry((execution.clone(), key.clone())) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.expires_at <= now {
                    debug!("Ownership of {} expired, reclaimed by {}", key, owner);
                    *entry = fresh();
                } else if entry.record.is_owned_by(owner) {
                    entry.record.record_retry();
                }
                entry.record.clone()
            }
            Entry::Vacant(vacant) => vacant.insert(fresh()).record.clone(),
        };

        Ok(ClaimOutcome::from_record(&record, owner))
    }

    async fn get(
        &self,
        execution: &ExecutionId,
        key: &WorkItemKey,
    ) -> Result<Option<OwnershipRecord>, RegistryError> {
        let now = Instant::now();
        let state = self.lock()?;
        Ok(state
            .ownership
            .get(&(execution.clone(), key.clone()))
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.record.clone()))
    }

    async fn report_status(
        &self,
        execution: &ExecutionId,
        key: &WorkItemKey,
        owner: &OwnerId,
        status: TerminalStatus,
    ) -> Result<OwnershipRecord, RegistryError> {
        let now = Instant::now();
        let mut state = self.lock()?;

        let entry = state
            .ownership
            .get_mut(&(execution.clone(), key.clone()))
            .filter(|entry| entry.expires_at > now)
            .ok_or_else(|| {
                RegistryError::InvalidWorkItem(format!("no ownership record for {key}"))
            })?;

        if !entry.record.is_owned_by(owner) {
            return Err(RegistryError::OwnershipMismatch {
                key: key.to_string(),
                owner: entry.record.owner.to_string(),
            });
        }

        entry.record.finish(status);
        Ok(entry.record.clone())
    }
}

#[async_trait]
impl ResultStore for MemoryRegistry {
    async fn append_result(
        &self,
        execution: &ExecutionId,
        result: &TestResult,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        let now = Instant::now();
        let mut state = self.lock()?;

        let list = state.results.entry(execution.clone()).or_default();
        if list.expires_at.map(|at| at <= now).unwrap_or(false) {
            *list = ResultList::default();
        }

        list.results.push(result.clone());
        match result.state {
            TestState::Passed => list.passed += 1,
            TestState::Failed => list.failed += 1,
        }
        list.expires_at = Some(now + ttl);
        Ok(())
    }

    async fn load_results(&self) -> Result<Vec<(ExecutionId, Vec<TestResult>)>, RegistryError> {
        let now = Instant::now();
        let state = self.lock()?;
        Ok(state
            .results
            .iter()
            .filter(|(_, list)| list.expires_at.map(|at| at > now).unwrap_or(true))
            .map(|(id, list)| (id.clone(), list.results.clone()))
            .collect())
    }

    async fn state_count(
        &self,
        execution: &ExecutionId,
        state: TestState,
    ) -> Result<u64, RegistryError> {
        let now = Instant::now();
        let guard = self.lock()?;
        let count = guard
            .results
            .get(execution)
            .filter(|list| list.expires_at.map(|at| at > now).unwrap_or(true))
            .map(|list| match state {
                TestState::Passed => list.passed,
                TestState::Failed => list.failed,
            })
            .unwrap_or(0);
        Ok(count)
    }
}
