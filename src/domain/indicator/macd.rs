//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: max(fast, slow) - 1 + signal - 1 bars
//!
//! [`calculate_macd_ewm`] builds all three lines from first-value seeded
//! EMAs and has no warmup.

use crate::domain::indicator::ema::ewm;
use crate::domain::indicator::{
    calculate_ema, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(bars: &[Bar], fast: usize, slow: usize, signal_period: usize) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    if bars.is_empty() || fast == 0 || slow == 0 || signal_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let ema_fast = ema_raw_values(bars, fast);
    let ema_slow = ema_raw_values(bars, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();

    let k = 2.0 / (signal_period as f64 + 1.0);
    let mut signal_line = vec![0.0; bars.len()];
    let macd_warmup = fast.max(slow) - 1;
    let signal_warmup = macd_warmup + signal_period - 1;

    if signal_warmup < bars.len() {
        let seed: f64 = macd_line[macd_warmup..=signal_warmup].iter().sum();
        let mut signal_ema = seed / signal_period as f64;
        signal_line[signal_warmup] = signal_ema;

        for i in (signal_warmup + 1)..bars.len() {
            signal_ema = macd_line[i] * k + signal_ema * (1.0 - k);
            signal_line[i] = signal_ema;
        }
    }

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| IndicatorPoint {
            timestamp: bar.timestamp,
            valid: i >= signal_warmup,
            value: IndicatorValue::Macd {
                line: macd_line[i],
                signal: signal_line[i],
                histogram: macd_line[i] - signal_line[i],
            },
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

/// MACD over first-value seeded EMAs. Every point is valid.
pub fn calculate_macd_ewm(
    bars: &[Bar],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    if fast == 0 || slow == 0 || signal_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let macd_line: Vec<f64> = ewm(&closes, fast)
        .into_iter()
        .zip(ewm(&closes, slow))
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ewm(&macd_line, signal_period);

    let values = bars
        .iter()
        .zip(macd_line.iter().zip(&signal_line))
        .map(|(bar, (&line, &signal))| IndicatorPoint {
            timestamp: bar.timestamp,
            valid: true,
            value: IndicatorValue::Macd {
                line,
                signal,
                histogram: line - signal,
            },
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

/// Extract raw f64 values from the EMA module, using 0.0 for warmup bars.
fn ema_raw_values(bars: &[Bar], period: usize) -> Vec<f64> {
    calculate_ema(bars, period)
        .values
        .iter()
        .map(|p| p.value.primary())
        .collect()
}
