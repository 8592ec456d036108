//! Ownership records
//!
//! One record per claimed work item, held by the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::work_item::OwnerId;

/// Lifecycle status of an ownership record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipStatus {
    Running,
    Success,
    Failed,
}

impl OwnershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnershipStatus::Running => "running",
            OwnershipStatus::Success => "success",
            OwnershipStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, OwnershipStatus::Running)
    }
}

impl fmt::Display for OwnershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status an owner may report for its work item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Success,
    Failed,
}

impl TerminalStatus {
    /// Parse a reported status. Anything other than `success` counts as a failure.
    pub fn from_str(s: &str) -> Self {
        if s == "success" {
            TerminalStatus::Success
        } else {
            TerminalStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Success => "success",
            TerminalStatus::Failed => "failed",
        }
    }
}

impl From<TerminalStatus> for OwnershipStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Success => OwnershipStatus::Success,
            TerminalStatus::Failed => OwnershipStatus::Failed,
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who owns a work item and how far it got
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub owner: OwnerId,
    pub status: OwnershipStatus,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OwnershipRecord {
    /// Fresh record for a first successful claim
    pub fn claimed_by(owner: OwnerId) -> Self {
        Self {
            owner,
            status: OwnershipStatus::Running,
            retry_count: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_owned_by(&self, owner: &OwnerId) -> bool {
        self.owner == *owner
    }

    pub fn record_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn finish(&mut self, status: TerminalStatus) {
        self.status = status.into();
        self.finished_at = Some(Utc::now());
    }
}

/// Answer of the registry to a claim
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    /// Whether the caller now owns (or already owned) the work item
    pub granted: bool,
    /// The recorded owner after the claim
    pub owner: OwnerId,
    /// Number of repeated claims by the recorded owner
    pub retry_count: u32,
}

impl ClaimOutcome {
    pub fn from_record(record: &OwnershipRecord, caller: &OwnerId) -> Self {
        Self {
            granted: record.is_owned_by(caller),
            owner: record.owner.clone(),
            retry_count: record.retry_count,
        }
    }
}
