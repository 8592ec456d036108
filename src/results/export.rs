//! Report export
//!
//! Writes aggregated reports to JSON or CSV files.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

use super::aggregate::AggregateReport;

/// File format for exported reports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    /// Pick the format from the file extension, JSON by default
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_str)
            .unwrap_or(ExportFormat::Json)
    }
}

/// Export reports to a file
pub fn export_reports(
    reports: &[AggregateReport],
    path: &Path,
    format: ExportFormat,
) -> Result<()> {
    match format {
        ExportFormat::Json => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create export file {}", path.display()))?;
            let writer = BufWriter::new(file);
            serde_json::to_writer_pretty(writer, reports).context("Failed to write reports")?;
        }
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_path(path)
                .with_context(|| format!("Failed to create export file {}", path.display()))?;

            writer.write_record([
                "execution_id",
                "path",
                "state",
                "timed_out",
                "duration_ms",
                "start_time",
                "end_time",
                "retry_attempt",
                "retry_total",
                "runner",
                "error",
            ])?;

            for report in reports {
                for result in &report.results {
                    writer.write_record([
                        report.execution_id.to_string(),
                        result.joined_path(),
                        result.state.as_str().to_string(),
                        result.timed_out.to_string(),
                        result.duration.to_string(),
                        result.start_time.map(|t| t.to_string()).unwrap_or_default(),
                        result.end_time.map(|t| t.to_string()).unwrap_or_default(),
                        result.retry_attempt.to_string(),
                        result.retry_total.to_string(),
                        result
                            .runner
                            .as_ref()
                            .map(|r| r.to_string())
                            .unwrap_or_default(),
                        result
                            .error
                            .as_ref()
                            .map(|e| e.message.clone())
                            .unwrap_or_default(),
                    ])?;
                }
            }
            writer.flush()?;
        }
    }

    info!("Exported {} report(s) to {}", reports.len(), path.display());
    Ok(())
}
