//! Technical indicator implementations.
//!
//! This module provides types for representing indicator values and series:
//! - `IndicatorPoint`: A single point in an indicator time series
//! - `IndicatorValue`: Enum for different indicator output shapes
//! - `IndicatorType`: Enum for indicator identity + parameters (serves as HashMap key)
//! - `IndicatorSeries`: A time series of indicator values

pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use ema::{calculate_ema, calculate_ewm};
pub use macd::{calculate_macd, calculate_macd_ewm};
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fmt;

use crate::domain::ohlcv::Bar;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorPoint {
    pub timestamp: NaiveDateTime,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd { line: f64, signal: f64, histogram: f64 },
}

impl IndicatorValue {
    /// The headline number of the value: the value itself, or the MACD line.
    pub fn primary(&self) -> f64 {
        match self {
            IndicatorValue::Simple(v) => *v,
            IndicatorValue::Macd { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    /// The value at `index`, or `None` during warmup or past the end.
    pub fn value_at(&self, index: usize) -> Option<IndicatorValue> {
        self.values
            .get(index)
            .filter(|p| p.valid)
            .map(|p| p.value)
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
        }
    }
}

/// Compute each requested indicator once over `bars`.
pub fn compute_indicators(
    bars: &[Bar],
    types: &[IndicatorType],
) -> HashMap<IndicatorType, IndicatorSeries> {
    let mut out = HashMap::with_capacity(types.len());
    for ty in types {
        if out.contains_key(ty) {
            continue;
        }
        let series = match *ty {
            IndicatorType::Sma(period) => calculate_sma(bars, period),
            IndicatorType::Ema(period) => calculate_ema(bars, period),
            IndicatorType::Rsi(period) => calculate_rsi(bars, period),
            IndicatorType::Macd { fast, slow, signal } => calculate_macd(bars, fast, slow, signal),
        };
        out.insert(*ty, series);
    }
    out
}

/// Bars with a flat price path, one per day starting 2024-01-01.
#[cfg(test)]
pub(crate) fn test_bars(prices: &[f64]) -> Vec<Bar> {
    use chrono::{Duration, NaiveDate};

    let start = NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    prices
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            timestamp: start + Duration::days(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        })
        .collect()
}
