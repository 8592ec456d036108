//! Plan execution
//!
//! Runs collected tests through an [`Interceptor`]. Tests sharing a work
//! key form a group that one task runs in plan order, so a process never
//! races itself on a key; groups run concurrently up to the job limit.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::plan::PlannedTest;
use crate::models::{Granularity, TestError, TestResult, WorkItemKey};
use crate::utils::{epoch_ms, Timer};
use crate::worker::{Decision, Interceptor};

/// What happened to one planned test in this process
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// Ran here; the terminal attempt
    Executed(TestResult),
    /// Owned elsewhere or not claimable
    Skipped { path: Vec<String>, reason: String },
    /// Not run and counted as failed
    NotRun { path: Vec<String>, reason: String },
}

impl UnitOutcome {
    pub fn path(&self) -> &[String] {
        match self {
            UnitOutcome::Executed(result) => &result.path,
            UnitOutcome::Skipped { path, .. } | UnitOutcome::NotRun { path, .. } => path,
        }
    }
}

/// Outcome of running a plan in one process
#[derive(Clone, Debug, Default, Serialize)]
pub struct LocalRunSummary {
    pub outcomes: Vec<UnitOutcome>,
    pub duration_ms: u64,
}

impl LocalRunSummary {
    pub fn executed(&self) -> impl Iterator<Item = &TestResult> {
        self.outcomes.iter().filter_map(|o| match o {
            UnitOutcome::Executed(result) => Some(result),
            _ => None,
        })
    }

    pub fn passed(&self) -> usize {
        self.executed().filter(|r| r.state.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.executed().filter(|r| !r.state.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, UnitOutcome::Skipped { .. }))
            .count()
    }

    pub fn not_run(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, UnitOutcome::NotRun { .. }))
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.not_run() == 0
    }
}

/// Executes planned tests as shell commands
pub struct PlanExecutor {
    interceptor: Arc<dyn Interceptor>,
    granularity: Granularity,
    jobs: usize,
    shell: String,
}

impl PlanExecutor {
    pub fn new(interceptor: Arc<dyn Interceptor>, granularity: Granularity) -> Self {
        Self {
            interceptor,
            granularity,
            jobs: 4,
            shell: "sh".to_string(),
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Group tests by work key, keeping first-seen order
    pub fn group(&self, tests: Vec<PlannedTest>) -> Vec<(WorkItemKey, Vec<(usize, PlannedTest)>)> {
        let mut groups: Vec<(WorkItemKey, Vec<(usize, PlannedTest)>)> = Vec::new();
        let mut index: HashMap<WorkItemKey, usize> = HashMap::new();

        for (position, test) in tests.into_iter().enumerate() {
            let key = match WorkItemKey::derive(test.path.as_slice(), self.granularity) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Ignoring test {:?}: {}", test.path, e);
                    continue;
                }
            };
            match index.get(&key) {
                Some(&i) => groups[i].1.push((position, test)),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![(position, test)]));
                }
            }
        }
        groups
    }

    /// Run every test and collect per-test outcomes in plan order
    pub async fn run(&self, tests: Vec<PlannedTest>) -> LocalRunSummary {
        let timer = Timer::start("plan");
        let total = tests.len();
        let groups = self.group(tests);
        info!(
            "Running {} tests in {} work items ({} jobs)",
            total,
            groups.len(),
            self.jobs
        );

        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut handles = Vec::with_capacity(groups.len());

        for (key, group) in groups {
            let semaphore = semaphore.clone();
            let interceptor = self.interceptor.clone();
            let shell = self.shell.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                debug!("Starting work item {}", key);

                let mut outcomes = Vec::with_capacity(group.len());
                for (position, test) in group {
                    let outcome = run_unit(interceptor.as_ref(), &shell, &test).await;
                    outcomes.push((position, outcome));
                }
                outcomes
            }));
        }

        let mut outcomes: Vec<(usize, UnitOutcome)> = Vec::with_capacity(total);
        for joined in join_all(handles).await {
            match joined {
                Ok(group) => outcomes.extend(group),
                Err(e) => warn!("Work item task failed: {}", e),
            }
        }
        outcomes.sort_by_key(|(position, _)| *position);

        LocalRunSummary {
            outcomes: outcomes.into_iter().map(|(_, o)| o).collect(),
            duration_ms: timer.stop().as_millis() as u64,
        }
    }
}

async fn run_unit(interceptor: &dyn Interceptor, shell: &str, test: &PlannedTest) -> UnitOutcome {
    let decision = match interceptor.before_unit(&test.path).await {
        Ok(decision) => decision,
        Err(e) => {
            warn!("Not running {}: {}", test.path.join(" > "), e);
            return UnitOutcome::NotRun {
                path: test.path.clone(),
                reason: e.to_string(),
            };
        }
    };

    match decision {
        Decision::Skip { reason, .. } => {
            debug!("Skipped {}: {}", test.path.join(" > "), reason);
            UnitOutcome::Skipped {
                path: test.path.clone(),
                reason: reason.to_string(),
            }
        }
        Decision::Fail { reason, .. } => UnitOutcome::NotRun {
            path: test.path.clone(),
            reason,
        },
        Decision::Run { .. } => {
            let mut attempt = 0;
            let mut result = execute(shell, test).await;
            while !result.state.is_success() && attempt < test.retries {
                attempt += 1;
                debug!(
                    "Retrying {} ({}/{})",
                    test.path.join(" > "),
                    attempt,
                    test.retries
                );
                result = execute(shell, test).await;
            }
            let result = result.with_retries(attempt, test.retries);

            if let Err(e) = interceptor.after_unit(&result).await {
                warn!("Failed to report {}: {}", result.joined_path(), e);
            }
            UnitOutcome::Executed(result)
        }
    }
}

/// Run one attempt of a test
pub async fn execute(shell: &str, test: &PlannedTest) -> TestResult {
    let start_time = epoch_ms();
    let timer = Timer::start(test.path.join(" > "));

    let child = Command::new(shell)
        .arg("-c")
        .arg(&test.command)
        .envs(&test.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            return TestResult::failed(
                test.path.clone(),
                0,
                TestError::new(format!("Failed to spawn {shell}: {e}")),
            )
            .with_times(start_time, epoch_ms())
        }
    };

    let waited = match test.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(waited) => waited,
            Err(_) => {
                let duration = timer.elapsed_ms();
                return TestResult::failed(
                    test.path.clone(),
                    duration,
                    TestError::new(format!("Timeout of {}ms exceeded", limit.as_millis())),
                )
                .timed_out()
                .with_times(start_time, epoch_ms());
            }
        },
        None => child.wait_with_output().await,
    };

    let duration = timer.elapsed_ms();
    let end_time = epoch_ms();

    let output = match waited {
        Ok(output) => output,
        Err(e) => {
            return TestResult::failed(
                test.path.clone(),
                duration,
                TestError::new(format!("Failed to wait for command: {e}")),
            )
            .with_times(start_time, end_time)
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let result = if output.status.success() {
        TestResult::passed(test.path.clone(), duration)
    } else {
        let error = match output.status.code() {
            Some(code) => TestError::new(format!("Command exited with status {code}"))
                .with_details(serde_json::json!({ "exit_code": code })),
            None => TestError::new("Command terminated by signal"),
        };
        TestResult::failed(test.path.clone(), duration, error)
    };

    let mut result = result
        .with_times(start_time, end_time)
        .with_output(stdout, stderr);
    result.file = test.file.clone();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionId, OwnerId, TestState};
    use crate::registry::{Backend, MemoryRegistry, ResultStore};
    use crate::worker::{PassthroughInterceptor, WorkerAgent};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn planned(path: &[&str], command: &str) -> PlannedTest {
        PlannedTest {
            path: path.iter().map(|s| s.to_string()).collect(),
            command: command.to_string(),
            timeout: None,
            retries: 0,
            env: BTreeMap::new(),
            file: None,
        }
    }

    fn passthrough(granularity: Granularity) -> PlanExecutor {
        PlanExecutor::new(Arc::new(PassthroughInterceptor::new(granularity)), granularity)
    }

    #[test]
    fn test_grouping_by_key() {
        let tests = vec![
            planned(&["A", "1"], "true"),
            planned(&["B", "1"], "true"),
            planned(&["A", "2"], "true"),
            planned(&["C", "[serial:db] x"], "true"),
            planned(&["D", "[serial:db] y"], "true"),
        ];

        let groups = passthrough(Granularity::Suite).group(tests.clone());
        let keys: Vec<&str> = groups.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["A", "B", "[serial:db]"]);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[2].1.len(), 2);

        let groups = passthrough(Granularity::Test).group(tests);
        assert_eq!(groups.len(), 4);
    }

    #[tokio::test]
    async fn test_execute_captures_output() {
        let mut test = planned(&["S", "echo"], "echo out; echo err >&2; echo $GREETING");
        test.env.insert("GREETING".into(), "hello".into());

        let result = execute("sh", &test).await;
        assert_eq!(result.state, TestState::Passed);
        assert_eq!(result.stdout, "out\nhello\n");
        assert_eq!(result.stderr, "err\n");
        assert!(result.start_time.is_some());
    }

    #[tokio::test]
    async fn test_execute_failure_and_timeout() {
        let result = execute("sh", &planned(&["S", "fail"], "exit 3")).await;
        assert_eq!(result.state, TestState::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.details, Some(serde_json::json!({"exit_code": 3})));

        let mut slow = planned(&["S", "slow"], "sleep 5");
        slow.timeout = Some(Duration::from_millis(100));
        let result = execute("sh", &slow).await;
        assert!(result.timed_out);
        assert_eq!(result.state, TestState::Failed);
    }

    #[tokio::test]
    async fn test_retries_report_final_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let command = format!(
            "if [ -f {0} ]; then exit 0; else touch {0}; exit 1; fi",
            marker.display()
        );
        let mut test = planned(&["S", "flaky"], &command);
        test.retries = 3;

        let summary = passthrough(Granularity::Test).run(vec![test]).await;
        let result = summary.executed().next().unwrap();
        assert!(result.state.is_success());
        assert_eq!(result.retry_attempt, 1);
        assert_eq!(result.retry_total, 3);
    }

    #[tokio::test]
    async fn test_two_workers_split_the_plan() {
        let memory = Arc::new(MemoryRegistry::new());
        let backend = Backend::memory(memory.clone());
        let tests = vec![
            planned(&["S", "a"], "true"),
            planned(&["S", "b"], "false"),
            planned(&["T", "c"], "true"),
        ];

        let mut summaries = Vec::new();
        for name in ["w1", "w2"] {
            let agent = WorkerAgent::new(&backend, ExecutionId::new("E1"), OwnerId::new(name));
            let executor = PlanExecutor::new(Arc::new(agent), Granularity::Test).with_jobs(2);
            summaries.push(executor.run(tests.clone()).await);
        }

        assert_eq!(summaries[0].executed().count(), 3);
        assert_eq!(summaries[0].failed(), 1);
        assert!(!summaries[0].is_success());
        assert_eq!(summaries[1].skipped(), 3);
        assert!(summaries[1].is_success());

        let stored = memory.load_results().await.unwrap();
        assert_eq!(stored[0].1.len(), 3);
    }
}
