//! YAML test plans
//!
//! A plan is a tree of suites whose leaves are shell commands:
//!
//! ```yaml
//! suites:
//!   - title: api
//!     timeout_secs: 60
//!     tests:
//!       - title: health
//!         run: curl -fsS http://localhost:8080/health
//!       - title: "[serial:db] migrations"
//!         run: ./scripts/migrate.sh
//!         retries: 2
//!     suites:
//!       - title: auth
//!         tests:
//!           - title: login
//!             run: ./scripts/login.sh
//!             env:
//!               USER: admin
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Plan loading errors
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Failed to read plan {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plan: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Empty title under {0:?}")]
    EmptyTitle(String),

    #[error("Duplicate test path: {0}")]
    DuplicatePath(String),

    #[error("Test {0} has no command")]
    EmptyCommand(String),
}

/// Root of a plan file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestPlan {
    #[serde(default)]
    pub suites: Vec<SuitePlan>,

    /// Environment applied to every test
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Source file, set by [`TestPlan::load`]
    #[serde(skip)]
    pub file: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SuitePlan {
    pub title: String,

    /// Default timeout for every test below this suite
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub tests: Vec<TestSpec>,

    #[serde(default)]
    pub suites: Vec<SuitePlan>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestSpec {
    pub title: String,

    /// Shell command, run with `sh -c`
    pub run: String,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Local retries after a failed attempt
    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A collected test, ready to execute
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedTest {
    pub path: Vec<String>,
    pub command: String,
    pub timeout: Option<Duration>,
    pub retries: u32,
    pub env: BTreeMap<String, String>,
    pub file: Option<String>,
}

impl TestPlan {
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut plan = Self::from_yaml(&content)?;
        plan.file = Some(path.display().to_string());
        Ok(plan)
    }

    pub fn from_yaml(content: &str) -> Result<Self, PlanError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Flatten the plan into tests in declaration order, validating it
    pub fn collect(&self) -> Result<Vec<PlannedTest>, PlanError> {
        let mut tests = Vec::new();
        for suite in &self.suites {
            self.collect_suite(suite, &[], None, &mut tests)?;
        }

        let mut seen = HashSet::new();
        for test in &tests {
            if !seen.insert(test.path.clone()) {
                return Err(PlanError::DuplicatePath(test.path.join(" > ")));
            }
        }
        Ok(tests)
    }

    fn collect_suite(
        &self,
        suite: &SuitePlan,
        parent: &[String],
        inherited_timeout: Option<u64>,
        out: &mut Vec<PlannedTest>,
    ) -> Result<(), PlanError> {
        if suite.title.trim().is_empty() {
            return Err(PlanError::EmptyTitle(parent.join(" > ")));
        }

        let mut path = parent.to_vec();
        path.push(suite.title.clone());
        let timeout = suite.timeout_secs.or(inherited_timeout);

        for test in &suite.tests {
            if test.title.trim().is_empty() {
                return Err(PlanError::EmptyTitle(path.join(" > ")));
            }
            let mut test_path = path.clone();
            test_path.push(test.title.clone());

            if test.run.trim().is_empty() {
                return Err(PlanError::EmptyCommand(test_path.join(" > ")));
            }

            let mut env = self.env.clone();
            env.extend(test.env.clone());

            out.push(PlannedTest {
                path: test_path,
                command: test.run.clone(),
                timeout: test
                    .timeout_secs
                    .or(timeout)
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs),
                retries: test.retries,
                env,
                file: self.file.clone(),
            });
        }

        for child in &suite.suites {
            self.collect_suite(child, &path, timeout, out)?;
        }
        Ok(())
    }
}
