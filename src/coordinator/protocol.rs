//! Coordinator wire protocol
//!
//! JSON bodies exchanged between workers and the coordinator. Every
//! advisory outcome travels as HTTP 200; failures are carried in the body.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{OwnerId, OwnershipRecord, OwnershipStatus};
use crate::registry::RegistryError;

/// Error codes returned to workers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Path is not a coordinator route
    InvalidRequest,
    /// Missing, empty or unknown work item key
    InvalidTestId,
    /// Unknown action under `/runner/{id}/`
    InvalidRequestAction,
    /// Status report from a worker that does not own the key
    InvalidRunnerOwnership,
    /// Claim denied, another worker owns the key
    AlreadyRunning,
    /// The coordinator could not reach its own store
    RegistryFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::InvalidTestId => "INVALID_TEST_ID",
            ErrorKind::InvalidRequestAction => "INVALID_REQUEST_ACTION",
            ErrorKind::InvalidRunnerOwnership => "INVALID_RUNNER_OWNERSHIP",
            ErrorKind::AlreadyRunning => "ALREADY_RUNNING",
            ErrorKind::RegistryFailure => "REGISTRY_FAILURE",
        }
    }

    /// Rebuild the registry error a worker should see for this code
    pub fn into_registry_error(self, key: &str) -> RegistryError {
        match self {
            ErrorKind::InvalidTestId => {
                RegistryError::InvalidWorkItem(format!("coordinator rejected key {key:?}"))
            }
            ErrorKind::InvalidRunnerOwnership | ErrorKind::AlreadyRunning => {
                RegistryError::OwnershipMismatch {
                    key: key.to_string(),
                    owner: "another runner".to_string(),
                }
            }
            ErrorKind::InvalidRequest | ErrorKind::InvalidRequestAction => {
                RegistryError::MalformedRequest(self.as_str().to_string())
            }
            ErrorKind::RegistryFailure => {
                RegistryError::Storage("coordinator registry failure".to_string())
            }
        }
    }
}

impl From<&RegistryError> for ErrorKind {
    fn from(err: &RegistryError) -> Self {
        match err {
            RegistryError::InvalidWorkItem(_) => ErrorKind::InvalidTestId,
            RegistryError::OwnershipMismatch { .. } => ErrorKind::InvalidRunnerOwnership,
            RegistryError::MalformedRequest(_) => ErrorKind::InvalidRequest,
            RegistryError::Unreachable(_) | RegistryError::Storage(_) => {
                ErrorKind::RegistryFailure
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{"error": CODE}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorKind,
}

impl ErrorResponse {
    pub fn new(error: ErrorKind) -> Self {
        Self { error }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Answer {
    Run,
    Skip,
}

/// Reply to `should-run`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub answer: Answer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorKind>,
    #[serde(default, alias = "runner", skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl ClaimResponse {
    pub fn run(retries: u32) -> Self {
        Self {
            answer: Answer::Run,
            reason: None,
            owner: None,
            retries: Some(retries),
        }
    }

    pub fn skip(reason: ErrorKind, owner: Option<OwnerId>) -> Self {
        Self {
            answer: Answer::Skip,
            reason: Some(reason),
            owner,
            retries: None,
        }
    }
}

/// Reply to `result`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResponse {
    pub status: OwnershipStatus,
    pub record: OwnershipRecord,
}

/// Reply to `ownership`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipResponse {
    pub record: Option<OwnershipRecord>,
}

/// Reply to `test-result`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: String,
}

impl StoredResponse {
    pub fn stored() -> Self {
        Self {
            status: "stored".to_string(),
        }
    }
}

/// Either an error body or the expected reply
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply<T> {
    Error(ErrorResponse),
    Ok(T),
}
