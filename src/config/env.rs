//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TESTFLEET";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// TESTFLEET_MODE
    pub mode: Option<String>,
    /// TESTFLEET_COORDINATOR
    pub coordinator: Option<String>,
    /// TESTFLEET_REDIS
    pub redis: Option<String>,
    /// TESTFLEET_EXECUTION_ID
    pub execution_id: Option<String>,
    /// TESTFLEET_RUNNER_ID
    pub runner_id: Option<String>,
    /// TESTFLEET_EXPIRATION_TIME, in seconds
    pub expiration_secs: Option<u64>,
    /// TESTFLEET_GRANULARITY
    pub granularity: Option<String>,
    /// TESTFLEET_ON_UNREACHABLE
    pub on_unreachable: Option<String>,
    /// TESTFLEET_BIND
    pub bind: Option<String>,
    /// TESTFLEET_VERBOSE
    pub verbose: Option<bool>,
    /// TESTFLEET_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            mode: get_env("MODE"),
            coordinator: get_env("COORDINATOR"),
            redis: get_env("REDIS"),
            execution_id: get_env("EXECUTION_ID"),
            runner_id: get_env("RUNNER_ID"),
            expiration_secs: get_env_parse("EXPIRATION_TIME"),
            granularity: get_env("GRANULARITY"),
            on_unreachable: get_env("ON_UNREACHABLE"),
            bind: get_env("BIND"),
            verbose: get_env_bool("VERBOSE"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.mode.is_some()
            || self.coordinator.is_some()
            || self.redis.is_some()
            || self.execution_id.is_some()
            || self.runner_id.is_some()
            || self.expiration_secs.is_some()
            || self.granularity.is_some()
            || self.on_unreachable.is_some()
            || self.bind.is_some()
            || self.verbose.is_some()
            || self.config_file.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        let redis = self.redis.as_deref().map(super::mask_credentials);
        println!("Environment Configuration:");
        println!("  {ENV_PREFIX}_MODE:            {:?}", self.mode);
        println!("  {ENV_PREFIX}_COORDINATOR:     {:?}", self.coordinator);
        println!("  {ENV_PREFIX}_REDIS:           {:?}", redis);
        println!("  {ENV_PREFIX}_EXECUTION_ID:    {:?}", self.execution_id);
        println!("  {ENV_PREFIX}_RUNNER_ID:       {:?}", self.runner_id);
        println!("  {ENV_PREFIX}_EXPIRATION_TIME: {:?}", self.expiration_secs);
        println!("  {ENV_PREFIX}_GRANULARITY:     {:?}", self.granularity);
        println!("  {ENV_PREFIX}_ON_UNREACHABLE:  {:?}", self.on_unreachable);
        println!("  {ENV_PREFIX}_BIND:            {:?}", self.bind);
        println!("  {ENV_PREFIX}_VERBOSE:         {:?}", self.verbose);
        println!("  {ENV_PREFIX}_CONFIG:          {:?}", self.config_file);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn mode(self, mode: impl Into<String>) -> Self {
        self.set("MODE", mode)
    }

    pub fn coordinator(self, address: impl Into<String>) -> Self {
        self.set("COORDINATOR", address)
    }

    pub fn redis(self, url: impl Into<String>) -> Self {
        self.set("REDIS", url)
    }

    pub fn execution_id(self, id: impl Into<String>) -> Self {
        self.set("EXECUTION_ID", id)
    }

    pub fn runner_id(self, id: impl Into<String>) -> Self {
        self.set("RUNNER_ID", id)
    }

    pub fn expiration_secs(self, secs: u64) -> Self {
        self.set("EXPIRATION_TIME", secs.to_string())
    }

    pub fn granularity(self, granularity: impl Into<String>) -> Self {
        self.set("GRANULARITY", granularity)
    }

    pub fn verbose(self, verbose: bool) -> Self {
        self.set("VERBOSE", verbose.to_string())
    }

    pub fn config_file(self, path: impl Into<String>) -> Self {
        self.set("CONFIG", path)
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all TESTFLEET environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_MODE             disabled, coordinator or worker (default worker)");
    println!("  {ENV_PREFIX}_COORDINATOR      Coordinator address (host:port or URL)");
    println!("  {ENV_PREFIX}_REDIS            Redis URL, redis://[user:pass@]host[:port][/db]");
    println!("  {ENV_PREFIX}_EXECUTION_ID     Identifier shared by all workers of one run");
    println!("  {ENV_PREFIX}_RUNNER_ID        Identifier of this worker (random by default)");
    println!("  {ENV_PREFIX}_EXPIRATION_TIME  Record lifetime in seconds (default 86400)");
    println!("  {ENV_PREFIX}_GRANULARITY      test or suite (default test)");
    println!("  {ENV_PREFIX}_ON_UNREACHABLE   skip or fail when the registry is down");
    println!("  {ENV_PREFIX}_BIND             Coordinator listen address (default 0.0.0.0:8787)");
    println!("  {ENV_PREFIX}_VERBOSE          Enable verbose output (true/false)");
    println!("  {ENV_PREFIX}_CONFIG           Path to configuration file");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_REDIS=redis://localhost:6379");
    println!("  export {ENV_PREFIX}_EXECUTION_ID=$(date +%s)");
    println!("  testfleet run --plan tests.yaml");
}
