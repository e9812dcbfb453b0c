//! Report output port.

use crate::domain::backtest::BacktestReport;
use crate::domain::error::TradesimError;

/// Port for writing backtest reports.
pub trait ReportPort {
    fn write(&self, report: &BacktestReport, output_path: &str) -> Result<(), TradesimError>;
}
