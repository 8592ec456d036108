//! Output formatters for test results
//!
//! Provides JSON, Table, CSV and summary output formats for aggregated
//! reports and local run summaries.

use chrono::{TimeZone, Utc};

use crate::host::{LocalRunSummary, UnitOutcome};
use crate::models::{TestResult, TestState};
use crate::results::AggregateReport;
use crate::utils::format_duration_ms;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn json<T: serde::Serialize + ?Sized>(&self, value: &T) -> String {
        if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    }

    fn paint(&self, text: &str, color: &str) -> String {
        if self.colorize {
            format!("\x1b[{color}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn state_label(&self, state: TestState) -> String {
        let label = format!("{} {}", state.symbol(), state);
        match state {
            TestState::Passed => self.paint(&label, "32"),
            TestState::Failed => self.paint(&label, "31"),
        }
    }

    /// Format a single test result
    pub fn format_result(&self, result: &TestResult) -> String {
        match self.format {
            OutputFormat::Table => self.format_result_table(result),
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(result),
            OutputFormat::Csv => format_result_csv("", result),
            OutputFormat::Summary => result.to_string(),
        }
    }

    fn format_result_table(&self, result: &TestResult) -> String {
        let mut line = format!(
            "  {} {:50} [{:>8}ms]",
            self.state_label(result.state),
            result.path.join(" > "),
            result.duration
        );
        if result.retry_attempt > 0 {
            line.push_str(&format!(" (retry {}/{})", result.retry_attempt, result.retry_total));
        }
        if result.timed_out {
            line.push_str(&self.paint(" timed out", "33"));
        }
        if let Some(runner) = &result.runner {
            line.push_str(&format!(" @{runner}"));
        }
        line
    }

    /// Format aggregated reports
    pub fn format_reports(&self, reports: &[AggregateReport]) -> String {
        match self.format {
            OutputFormat::Table => reports
                .iter()
                .map(|r| self.format_report_table(r))
                .collect::<Vec<_>>()
                .join("\n"),
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(reports),
            OutputFormat::Csv => {
                let mut output = String::from(CSV_HEADER);
                output.push('\n');
                for report in reports {
                    for result in &report.results {
                        output.push_str(&format_result_csv(report.execution_id.as_str(), result));
                        output.push('\n');
                    }
                }
                output
            }
            OutputFormat::Summary => reports
                .iter()
                .map(format_report_brief)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn format_report_table(&self, report: &AggregateReport) -> String {
        let mut output = String::new();

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(" Execution: {}\n", report.execution_id));
        output.push_str("═══════════════════════════════════════════════════════════════\n");

        for result in &report.results {
            output.push_str(&self.format_result_table(result));
            output.push('\n');
            if let Some(error) = &result.error {
                output.push_str(&format!("      {}\n", self.paint(&error.message, "31")));
            }
        }

        output.push_str(" ───────────────────────────────────────────────────────────\n");

        let passed = self.paint(&report.passed_count.to_string(), "32");
        let failed = if report.failed_count > 0 {
            self.paint(&report.failed_count.to_string(), "31")
        } else {
            report.failed_count.to_string()
        };
        output.push_str(&format!(
            " Passed: {} | Failed: {} | Pass Rate: {:.1}%\n",
            passed,
            failed,
            report.pass_rate()
        ));
        output.push_str(&format!(
            " Started: {} | Ended: {}\n",
            format_epoch_ms(report.first_start_time),
            format_epoch_ms(report.last_end_time)
        ));
        output.push_str(&format!(
            " Duration: {} (aggregated {})\n",
            format_duration_ms(report.real_duration),
            format_duration_ms(report.aggregated_duration)
        ));

        output
    }

    /// Format the outcome of a local plan run
    pub fn format_local(&self, summary: &LocalRunSummary) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(summary),
            OutputFormat::Csv => {
                let mut output = String::from(CSV_HEADER);
                output.push('\n');
                for result in summary.executed() {
                    output.push_str(&format_result_csv("", result));
                    output.push('\n');
                }
                output
            }
            OutputFormat::Summary => format_local_brief(summary),
            OutputFormat::Table => self.format_local_table(summary),
        }
    }

    fn format_local_table(&self, summary: &LocalRunSummary) -> String {
        let mut output = String::new();
        output.push('\n');

        for outcome in &summary.outcomes {
            match outcome {
                UnitOutcome::Executed(result) => {
                    output.push_str(&self.format_result_table(result));
                }
                UnitOutcome::Skipped { path, reason } => {
                    output.push_str(&format!(
                        "  {} {:50} {}",
                        self.paint("○ SKIP", "33"),
                        path.join(" > "),
                        reason
                    ));
                }
                UnitOutcome::NotRun { path, reason } => {
                    output.push_str(&format!(
                        "  {} {:50} {}",
                        self.paint("! NOT RUN", "31"),
                        path.join(" > "),
                        reason
                    ));
                }
            }
            output.push('\n');
        }

        output.push_str(" ───────────────────────────────────────────────────────────\n");
        output.push_str(&format!(" {}\n", format_local_brief(summary)));
        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

const CSV_HEADER: &str = "execution_id,path,state,timed_out,duration_ms,retry_attempt,retry_total,message";

fn format_result_csv(execution: &str, result: &TestResult) -> String {
    format!(
        "{},\"{}\",{},{},{},{},{},\"{}\"",
        execution,
        result.joined_path().replace('"', "\"\""),
        result.state.as_str(),
        result.timed_out,
        result.duration,
        result.retry_attempt,
        result.retry_total,
        result
            .error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("")
            .replace('"', "\"\"")
    )
}

fn format_report_brief(report: &AggregateReport) -> String {
    format!(
        "{}: {}/{} passed ({:.1}%) in {} (aggregated {})",
        report.execution_id,
        report.passed_count,
        report.total(),
        report.pass_rate(),
        format_duration_ms(report.real_duration),
        format_duration_ms(report.aggregated_duration)
    )
}

fn format_local_brief(summary: &LocalRunSummary) -> String {
    format!(
        "Executed: {} | Passed: {} | Failed: {} | Skipped: {} | Not run: {} | {}",
        summary.executed().count(),
        summary.passed(),
        summary.failed(),
        summary.skipped(),
        summary.not_run(),
        format_duration_ms(summary.duration_ms)
    )
}

fn format_epoch_ms(ms: Option<i64>) -> String {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}
