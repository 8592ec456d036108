//! Results aggregation and export
//!
//! Turns the per-execution result lists into consolidated reports.

mod aggregate;
mod export;

pub use aggregate::{aggregate_all, AggregateReport};
pub use export::{export_reports, ExportFormat};
