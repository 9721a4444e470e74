//! Output formatters for run results
//!
//! Provides table, JSON, CSV and summary output formats.

use anyhow::{Context, Result};

use crate::engine::TestEntry;
use crate::models::{AsyncSetUpState, RunResult, TestRecord};

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

    /// Format a single record
    pub fn format_record(&self, record: &TestRecord, passed: bool) -> String {
        let status = match (passed, self.colorize) {
            (true, true) => "\x1b[32m✓ PASS\x1b[0m",
            (true, false) => "✓ PASS",
            (false, true) => "\x1b[31m✗ FAIL\x1b[0m",
            (false, false) => "✗ FAIL",
        };

        if passed {
            format!("{:32} {} [{:>6}ms]", record.label(), status, record.duration_ms)
        } else {
            format!(
                "{:32} {} [{:>6}ms] {}",
                record.label(),
                status,
                record.duration_ms,
                record.message
            )
        }
    }

    /// Format a whole run
    pub fn format_result(&self, result: &RunResult) -> Result<String> {
        match self.format {
            OutputFormat::Table => Ok(self.format_table(result)),
            OutputFormat::Json => {
                serde_json::to_string(result).context("Failed to serialize result")
            }
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(result).context("Failed to serialize result")
            }
            OutputFormat::Csv => self.format_csv(result),
            OutputFormat::Summary => Ok(self.format_brief(result)),
        }
    }

    fn format_table(&self, result: &RunResult) -> String {
        let summary = result.summary();
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  Run started {:47} ║\n",
            result.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for (group, status) in &result.async_set_up_by_group {
            let line = match status.state {
                AsyncSetUpState::Failed => format!(
                    "{} {} set-up {}: {}",
                    status.state.symbol(),
                    group,
                    status.state,
                    status.error_message
                ),
                _ => format!("{} {} set-up {}", status.state.symbol(), group, status.state),
            };
            output.push_str(&format!("║  {line}\n"));
        }

        for record in &result.passes {
            output.push_str(&format!("║  {}\n", self.format_record(record, true)));
        }
        for record in &result.errors {
            output.push_str(&format!("║  {}\n", self.format_record(record, false)));
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", summary.passed)
        } else {
            summary.passed.to_string()
        };
        let fail_str = if self.colorize && summary.failed > 0 {
            format!("\x1b[31m{}\x1b[0m", summary.failed)
        } else {
            summary.failed.to_string()
        };

        output.push_str(&format!(
            "║  Total: {:3} | Pass: {} | Fail: {} | Set-ups pending: {:2}\n",
            summary.total, pass_str, fail_str, summary.set_ups_pending
        ));
        output.push_str(&format!(
            "║  Pass Rate: {:5.1}% | Duration: {:6}ms\n",
            summary.pass_rate(),
            summary.total_duration_ms
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    fn format_csv(&self, result: &RunResult) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        writer.write_record([
            "group",
            "test",
            "parameter_set",
            "passed",
            "duration_ms",
            "message",
        ])?;

        let rows = result
            .passes
            .iter()
            .map(|r| (r, true))
            .chain(result.errors.iter().map(|r| (r, false)));
        for (record, passed) in rows {
            writer.write_record([
                record.group_name.clone(),
                record.test_name.clone().unwrap_or_default(),
                record
                    .parameter_set_index
                    .map(|i| i.to_string())
                    .unwrap_or_default(),
                passed.to_string(),
                record.duration_ms.to_string(),
                record.message.clone(),
            ])?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|err| anyhow::anyhow!("Failed to flush CSV output: {}", err.error()))?;
        String::from_utf8(bytes).context("CSV output is not UTF-8")
    }

    fn format_brief(&self, result: &RunResult) -> String {
        let summary = result.summary();
        format!(
            "{}: {}/{} passed ({:.1}%) in {}ms",
            if result.is_success() { "PASSED" } else { "FAILED" },
            summary.passed,
            summary.total,
            summary.pass_rate(),
            summary.total_duration_ms
        )
    }

    /// Format the runnable tests of an engine
    pub fn format_listing(&self, entries: &[TestEntry]) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string(entries).context("Failed to serialize listing"),
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(entries).context("Failed to serialize listing")
            }
            _ => Ok(entries
                .iter()
                .map(|e| {
                    if e.async_set_up {
                        format!("  {e} [async set-up]")
                    } else {
                        format!("  {e}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}
