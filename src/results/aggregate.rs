//! Result aggregation
//!
//! Folds the stored results of each execution into one consolidated report.

use serde::{Deserialize, Serialize};

use crate::models::{ExecutionId, TestResult, TestState};

/// Consolidated view of one execution across all workers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub execution_id: ExecutionId,

    pub passed_count: u64,

    pub failed_count: u64,

    /// Earliest start time, unix epoch milliseconds
    pub first_start_time: Option<i64>,

    /// Latest end time, unix epoch milliseconds
    pub last_end_time: Option<i64>,

    /// Sum of individual durations in milliseconds
    pub aggregated_duration: u64,

    /// Wall-clock span in milliseconds, or the aggregated duration when
    /// timestamps are missing
    pub real_duration: u64,

    /// Results ordered by joined path
    pub results: Vec<TestResult>,
}

impl AggregateReport {
    pub fn from_results(execution_id: ExecutionId, mut results: Vec<TestResult>) -> Self {
        let mut passed_count = 0;
        let mut failed_count = 0;
        let mut first_start_time: Option<i64> = None;
        let mut last_end_time: Option<i64> = None;
        let mut aggregated_duration = 0u64;

        for result in &results {
            match result.state {
                TestState::Passed => passed_count += 1,
                TestState::Failed => failed_count += 1,
            }
            aggregated_duration += result.duration;

            if let Some(start) = result.start_time {
                first_start_time = Some(first_start_time.map_or(start, |t| t.min(start)));
            }
            if let Some(end) = result.end_time {
                last_end_time = Some(last_end_time.map_or(end, |t| t.max(end)));
            }
        }

        let real_duration = match (first_start_time, last_end_time) {
            (Some(first), Some(last)) if last >= first => (last - first) as u64,
            _ => aggregated_duration,
        };

        results.sort_by_cached_key(TestResult::joined_path);

        Self {
            execution_id,
            passed_count,
            failed_count,
            first_start_time,
            last_end_time,
            aggregated_duration,
            real_duration,
            results,
        }
    }

    pub fn total(&self) -> u64 {
        self.passed_count + self.failed_count
    }

    /// Pass rate as percentage
    pub fn pass_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            (self.passed_count as f64 / self.total() as f64) * 100.0
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.state.is_success())
    }
}

/// Aggregate every execution, most recently started first
pub fn aggregate_all(all: Vec<(ExecutionId, Vec<TestResult>)>) -> Vec<AggregateReport> {
    let mut reports: Vec<AggregateReport> = all
        .into_iter()
        .map(|(execution, results)| AggregateReport::from_results(execution, results))
        .collect();
    reports.sort_by(|a, b| b.first_start_time.cmp(&a.first_start_time));
    reports
}
