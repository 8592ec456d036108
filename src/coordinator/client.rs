//! HTTP client binding to a coordinator
//!
//! Implements the registry traits by calling a remote coordinator, so a
//! worker behaves the same whether it talks to Redis or to a coordinator.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::protocol::{
    Answer, ClaimResponse, ErrorKind, OwnershipResponse, Reply, ReportResponse, StoredResponse,
};
use crate::models::{
    ClaimOutcome, ExecutionId, OwnerId, OwnershipRecord, TerminalStatus, TestResult, TestState,
    WorkItemKey,
};
use crate::registry::{RegistryError, ResultStore, WorkRegistry};
use crate::results::AggregateReport;

/// Runner id used for requests that are not made on behalf of a worker
const OBSERVER: &str = "observer";

/// HTTP client for a coordinator
#[derive(Clone)]
pub struct CoordinatorClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl CoordinatorClient {
    /// Create a client for `host:port` or a full `http(s)://` URL.
    /// No connection is made until the first request.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let address = address.trim().trim_end_matches('/');
        let url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let base_url = Url::parse(&url).map_err(|e| {
            RegistryError::MalformedRequest(format!("invalid coordinator address {address:?}: {e}"))
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                RegistryError::MalformedRequest(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Build `{base}/runner/{runner}/{action}`
    fn runner_url(&self, runner: &str, action: &str) -> Result<Url, RegistryError> {
        self.url(&["runner", runner, action])
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                RegistryError::MalformedRequest(format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn transport_error(&self, url: &Url, e: reqwest::Error) -> RegistryError {
        if e.is_timeout() {
            RegistryError::Unreachable(format!("timeout after {:?} calling {url}", self.timeout))
        } else if e.is_connect() {
            RegistryError::Unreachable(format!("connection refused to {url}"))
        } else {
            RegistryError::Unreachable(format!("request to {url} failed: {e}"))
        }
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        url: &Url,
        response: reqwest::Response,
    ) -> Result<Reply<T>, RegistryError> {
        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Storage(format!(
                "coordinator answered {status} for {url}"
            )));
        }
        response
            .json::<Reply<T>>()
            .await
            .map_err(|e| RegistryError::Unreachable(format!("invalid response from {url}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<Reply<T>, RegistryError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;
        self.decode(&url, response).await
    }

    async fn post_json<T: DeserializeOwned, B: serde::Serialize + ?Sized>(
        &self,
        url: Url,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<Reply<T>, RegistryError> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url.clone())
            .query(query)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;
        self.decode(&url, response).await
    }

    /// Aggregated reports, optionally for a single execution
    pub async fn reports(
        &self,
        execution: Option<&ExecutionId>,
    ) -> Result<Vec<AggregateReport>, RegistryError> {
        let url = self.url(&["report"])?;
        let query: Vec<(&str, &str)> = execution
            .map(|e| vec![("execution", e.as_str())])
            .unwrap_or_default();
        match self.get_json::<Vec<AggregateReport>>(url, &query).await? {
            Reply::Ok(reports) => Ok(reports),
            Reply::Error(e) => Err(e.error.into_registry_error("report")),
        }
    }

    /// Check that the coordinator answers `/health`
    pub async fn health(&self) -> Result<bool, RegistryError> {
        let url = self.url(&["health"])?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl WorkRegistry for CoordinatorClient {
    async fn try_claim(
        &self,
        execution: &ExecutionId,
        key: &WorkItemKey,
        owner: &OwnerId,
        ttl: Duration,
    ) -> Result<ClaimOutcome, RegistryError> {
        let url = self.runner_url(owner.as_str(), "should-run")?;
        let ttl = ttl.as_secs().max(1).to_string();
        let query = [
            ("test", key.as_str()),
            ("execution", execution.as_str()),
            ("ttl", ttl.as_str()),
        ];

        let response = match self.get_json::<ClaimResponse>(url, &query).await? {
            Reply::Ok(response) => response,
            Reply::Error(e) => return Err(e.error.into_registry_error(key.as_str())),
        };

        match (response.answer, response.reason) {
            (Answer::Run, _) => Ok(ClaimOutcome {
                granted: true,
                owner: owner.clone(),
                retry_count: response.retries.unwrap_or(0),
            }),
            (Answer::Skip, Some(ErrorKind::AlreadyRunning) | None) => Ok(ClaimOutcome {
                granted: false,
                owner: response
                    .owner
                    .unwrap_or_else(|| OwnerId::new("unknown")),
                retry_count: 0,
            }),
            (Answer::Skip, Some(reason)) => Err(reason.into_registry_error(key.as_str())),
        }
    }

    async fn get(
        &self,
        execution: &ExecutionId,
        key: &WorkItemKey,
    ) -> Result<Option<OwnershipRecord>, RegistryError> {
        let url = self.runner_url(OBSERVER, "ownership")?;
        let query = [("test", key.as_str()), ("execution", execution.as_str())];
        match self.get_json::<OwnershipResponse>(url, &query).await? {
            Reply::Ok(response) => Ok(response.record),
            Reply::Error(e) => Err(e.error.into_registry_error(key.as_str())),
        }
    }

    async fn report_status(
        &self,
        execution: &ExecutionId,
        key: &WorkItemKey,
        owner: &OwnerId,
        status: TerminalStatus,
    ) -> Result<OwnershipRecord, RegistryError> {
        let url = self.runner_url(owner.as_str(), "result")?;
        let query = [
            ("test", key.as_str()),
            ("status", status.as_str()),
            ("execution", execution.as_str()),
        ];
        match self.get_json::<ReportResponse>(url, &query).await? {
            Reply::Ok(response) => Ok(response.record),
            Reply::Error(e) => Err(e.error.into_registry_error(key.as_str())),
        }
    }
}

#[async_trait]
impl ResultStore for CoordinatorClient {
    async fn append_result(
        &self,
        execution: &ExecutionId,
        result: &TestResult,
        _ttl: Duration,
    ) -> Result<(), RegistryError> {
        let runner = result
            .runner
            .as_ref()
            .map(OwnerId::as_str)
            .unwrap_or(OBSERVER);
        let url = self.runner_url(runner, "test-result")?;
        let query = [("execution", execution.as_str())];
        match self.post_json::<StoredResponse, _>(url, &query, result).await? {
            Reply::Ok(_) => Ok(()),
            Reply::Error(e) => Err(e.error.into_registry_error(&result.joined_path())),
        }
    }

    async fn load_results(&self) -> Result<Vec<(ExecutionId, Vec<TestResult>)>, RegistryError> {
        Ok(self
            .reports(None)
            .await?
            .into_iter()
            .map(|report| (report.execution_id, report.results))
            .collect())
    }

    async fn state_count(
        &self,
        execution: &ExecutionId,
        state: TestState,
    ) -> Result<u64, RegistryError> {
        let reports = self.reports(Some(execution)).await?;
        Ok(reports
            .iter()
            .find(|r| r.execution_id == *execution)
            .map(|r| match state {
                TestState::Passed => r.passed_count,
                TestState::Failed => r.failed_count,
            })
            .unwrap_or(0))
    }
}
