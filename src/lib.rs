//! testfleet - distributed test execution coordination
//!
//! Many processes run the same test suite against one shared ownership
//! registry. Before a unit runs, its worker claims the unit's work key;
//! exactly one claimant wins and every other process skips it. Results are
//! appended per execution and aggregated into one report.
//!
//! ## Layout
//!
//! - [`models`]: execution ids, owner ids, work item keys, results
//! - [`registry`]: the [`registry::WorkRegistry`] and [`registry::ResultStore`]
//!   traits with in-memory and Redis backends
//! - [`coordinator`]: HTTP coordinator service and its client binding
//! - [`worker`]: the worker agent a host framework calls around each unit
//! - [`results`]: aggregation and export
//! - [`host`]: a built-in host running YAML test plans as shell commands

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod host;
pub mod models;
pub mod output;
pub mod registry;
pub mod results;
pub mod utils;
pub mod worker;
