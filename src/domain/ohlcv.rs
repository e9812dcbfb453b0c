//! OHLCV bar representation and input validation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::error::TradesimError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Check a symbol's series before simulation: non-empty, finite prices,
/// positive open/close, non-negative high/low/volume and strictly
/// increasing timestamps.
pub fn validate_bars(symbol: &str, bars: &[Bar]) -> Result<(), TradesimError> {
    if bars.is_empty() {
        return Err(TradesimError::EmptyData {
            symbol: symbol.to_string(),
        });
    }

    for (index, bar) in bars.iter().enumerate() {
        let invalid = |reason: &str| TradesimError::InvalidBar {
            symbol: symbol.to_string(),
            index,
            reason: reason.to_string(),
        };

        let fields = [bar.open, bar.high, bar.low, bar.close, bar.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(invalid("non-finite value"));
        }
        if bar.open <= 0.0 || bar.close <= 0.0 {
            return Err(invalid("open and close must be positive"));
        }
        if bar.high < 0.0 || bar.low < 0.0 || bar.volume < 0.0 {
            return Err(invalid("high, low and volume must be non-negative"));
        }

        if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
            return Err(TradesimError::UnorderedBars {
                symbol: symbol.to_string(),
                index,
            });
        }
    }

    Ok(())
}
