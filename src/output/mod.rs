//! Output formatting module
//!
//! Provides various output formats for reports and local runs.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};
