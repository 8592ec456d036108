//! Data models for distributed test execution
//!
//! This module contains all data structures shared by workers, registries
//! and the coordinator.

mod ownership;
mod test_result;
mod work_item;

pub use ownership::{ClaimOutcome, OwnershipRecord, OwnershipStatus, TerminalStatus};
pub use test_result::{TestError, TestResult, TestState};
pub use work_item::{
    serial_tag, ExecutionId, Granularity, OwnerId, WorkItemError, WorkItemKey, PATH_SEPARATOR,
};
