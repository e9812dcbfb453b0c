//! JSON report adapter.

use std::fs;

use crate::domain::backtest::BacktestReport;
use crate::domain::error::TradesimError;
use crate::ports::report_port::ReportPort;

/// Writes the report as pretty-printed JSON. An output path of `-` writes to
/// stdout.
#[derive(Debug, Default)]
pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(report: &BacktestReport) -> Result<String, TradesimError> {
        serde_json::to_string_pretty(report).map_err(|e| TradesimError::Report {
            reason: format!("failed to serialize report: {}", e),
        })
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(&self, report: &BacktestReport, output_path: &str) -> Result<(), TradesimError> {
        let json = Self::render(report)?;
        if output_path == "-" {
            println!("{}", json);
            return Ok(());
        }
        fs::write(output_path, json).map_err(|e| TradesimError::Report {
            reason: format!("failed to write {}: {}", output_path, e),
        })
    }
}
