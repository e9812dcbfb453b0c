//! Exponential Moving Average indicator.
//!
//! k = 2/(n+1), seed with first SMA, then EMA[i] = C[i]*k + EMA[i-1]*(1-k).
//! Warmup: first (n-1) bars are invalid.
//!
//! [`calculate_ewm`] is the recursive form seeded with the first close
//! instead, valid from bar 0. The built-in crossover strategies use it.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub fn calculate_ema(bars: &[Bar], period: usize) -> IndicatorSeries {
    if period == 0 || bars.is_empty() {
        return IndicatorSeries {
            indicator_type: IndicatorType::Ema(period),
            values: Vec::new(),
        };
    }

    let mut values = Vec::with_capacity(bars.len());
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = 0.0;
    let mut sum = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        if i + 1 < period {
            sum += bar.close;
            values.push(IndicatorPoint {
                timestamp: bar.timestamp,
                valid: false,
                value: IndicatorValue::Simple(0.0),
            });
            continue;
        }

        if i + 1 == period {
            sum += bar.close;
            ema = sum / period as f64;
        } else {
            ema = bar.close * k + ema * (1.0 - k);
        }
        values.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid: true,
            value: IndicatorValue::Simple(ema),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Ema(period),
        values,
    }
}

/// Recursive EMA over raw values: `out[0] = values[0]`, then
/// `out[i] = values[i]*k + out[i-1]*(1-k)` with k = 2/(span+1).
pub fn ewm(values: &[f64], span: usize) -> Vec<f64> {
    let k = 2.0 / (span.max(1) as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = prev.map_or(v, |p| v * k + p * (1.0 - k));
        out.push(next);
        prev = Some(next);
    }
    out
}

/// EMA of closes seeded with the first close. Every point is valid.
pub fn calculate_ewm(bars: &[Bar], span: usize) -> IndicatorSeries {
    let indicator_type = IndicatorType::Ema(span);
    if span == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let values = bars
        .iter()
        .zip(ewm(&closes, span))
        .map(|(bar, v)| IndicatorPoint {
            timestamp: bar.timestamp,
            valid: true,
            value: IndicatorValue::Simple(v),
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_bars;

    #[test]
    fn ema_warmup() {
        let bars = test_bars(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_ema(&bars, 3);

        assert!(!series.values[0].valid);
        assert!(!series.values[1].valid);
        assert!(series.values[2].valid);
        assert!(series.values[4].valid);
    }

    #[test]
    fn ema_seed_is_sma() {
        let bars = test_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 3);

        if let IndicatorValue::Simple(v) = series.values[2].value {
            let expected_sma = (10.0 + 20.0 + 30.0) / 3.0;
            assert!((v - expected_sma).abs() < f64::EPSILON);
        } else {
            panic!("Expected Simple value");
        }
    }

    #[test]
    fn ema_recursive_calculation() {
        let bars = test_bars(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_ema(&bars, 3);

        let k = 2.0 / 4.0;
        let sma = 20.0;
        let ema_3 = 40.0 * k + sma * (1.0 - k);
        let ema_4 = 50.0 * k + ema_3 * (1.0 - k);

        assert_eq!(series.values[3].value, IndicatorValue::Simple(ema_3));
        assert_eq!(series.values[4].value, IndicatorValue::Simple(ema_4));
    }

    #[test]
    fn ema_period_1_tracks_close() {
        let bars = test_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 1);
        assert!(series.values.iter().all(|p| p.valid));
        assert_eq!(series.values[1].value, IndicatorValue::Simple(20.0));
    }

    #[test]
    fn ema_empty_bars() {
        let series = calculate_ema(&[], 3);
        assert!(series.values.is_empty());
        assert_eq!(series.indicator_type, IndicatorType::Ema(3));
    }

    #[test]
    fn ewm_seeds_with_first_value() {
        let out = ewm(&[10.0, 20.0, 30.0], 3);
        assert_eq!(out[0], 10.0);
        assert_eq!(out[1], 15.0);
        assert_eq!(out[2], 22.5);
    }

    #[test]
    fn ewm_series_valid_from_first_bar() {
        let series = calculate_ewm(&test_bars(&[10.0, 20.0, 30.0]), 26);
        assert!(series.values.iter().all(|p| p.valid));
        assert_eq!(series.value_at(0), Some(IndicatorValue::Simple(10.0)));
        assert!(calculate_ewm(&[], 12).values.is_empty());
        assert!(calculate_ewm(&test_bars(&[1.0]), 0).values.is_empty());
    }
}
