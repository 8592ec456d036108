//! Test result models
//!
//! Outcome records produced once per executed unit.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::work_item::OwnerId;

/// Final state of an executed unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Passed,
    Failed,
}

impl TestState {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestState::Passed => "✓",
            TestState::Failed => "✗",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestState::Passed => "passed",
            TestState::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestState::Passed)
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestState::Passed => write!(f, "PASS"),
            TestState::Failed => write!(f, "FAIL"),
        }
    }
}

/// Error thrown by a failed unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Result of a single executed (non-skipped) unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Title path, root suite first
    pub path: Vec<String>,
    pub state: TestState,
    #[serde(default)]
    pub timed_out: bool,
    /// Duration in milliseconds
    #[serde(default)]
    pub duration: u64,
    /// Start time, unix epoch milliseconds
    #[serde(default)]
    pub start_time: Option<i64>,
    /// End time, unix epoch milliseconds
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub retry_attempt: u32,
    #[serde(default)]
    pub retry_total: u32,
    #[serde(default)]
    pub error: Option<TestError>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Source file of the unit, when the host knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Worker that executed the unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<OwnerId>,
}

impl TestResult {
    pub fn passed(path: Vec<String>, duration: u64) -> Self {
        Self::new(path, TestState::Passed, duration)
    }

    pub fn failed(path: Vec<String>, duration: u64, error: TestError) -> Self {
        let mut result = Self::new(path, TestState::Failed, duration);
        result.error = Some(error);
        result
    }

    fn new(path: Vec<String>, state: TestState, duration: u64) -> Self {
        Self {
            path,
            state,
            timed_out: false,
            duration,
            start_time: None,
            end_time: None,
            retry_attempt: 0,
            retry_total: 0,
            error: None,
            stdout: String::new(),
            stderr: String::new(),
            file: None,
            runner: None,
        }
    }

    pub fn with_times(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }

    pub fn with_retries(mut self, attempt: u32, total: u32) -> Self {
        self.retry_attempt = attempt;
        self.retry_total = total;
        self
    }

    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }

    pub fn with_runner(mut self, runner: OwnerId) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn timed_out(mut self) -> Self {
        self.timed_out = true;
        self.state = TestState::Failed;
        self
    }

    /// Path joined for sorting and display
    pub fn joined_path(&self) -> String {
        self.path.join("/")
    }

    pub fn title(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.state.symbol(),
            self.path.join(" > "),
            self.duration
        )?;
        if self.timed_out {
            write!(f, " (timed out)")?;
        }
        if let Some(err) = &self.error {
            write!(f, " - {}", err.message)?;
        }
        Ok(())
    }
}
