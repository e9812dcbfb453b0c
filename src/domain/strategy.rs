//! Signal providers: built-in strategies and the custom-logic evaluator.
//!
//! Every provider returns exactly one [`SignalBar`] per input bar. Bars where
//! the underlying indicators are still warming up carry [`Signal::Hold`].

use std::fmt;

use crate::domain::error::TradesimError;
use crate::domain::indicator::{
    calculate_ewm, calculate_macd_ewm, calculate_rsi, compute_indicators, IndicatorType,
    IndicatorValue,
};
use crate::domain::ohlcv::Bar;
use crate::domain::rule::LogicProgram;
use crate::domain::rule_eval::evaluate_program;
use crate::domain::rule_parser;
use crate::domain::signal::{IndicatorKind, IndicatorReading, Signal, SignalBar};

/// Source of per-bar trading signals.
pub trait SignalProvider: Send + Sync {
    fn name(&self) -> &str;

    fn produce_signals(&self, bars: &[Bar]) -> Result<Vec<SignalBar>, TradesimError>;
}

/// Tunable parameters for the built-in strategies, plus the custom program.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParams {
    pub ema_short: usize,
    pub ema_long: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub logic: Option<String>,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            ema_short: 12,
            ema_long: 26,
            rsi_period: 14,
            rsi_oversold: 35.0,
            rsi_overbought: 65.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            logic: None,
        }
    }
}

/// A fully resolved strategy selection.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategySpec {
    EmaCrossover { short: usize, long: usize },
    RsiReversal { period: usize, oversold: f64, overbought: f64 },
    MacdCrossover { fast: usize, slow: usize, signal: usize },
    Custom { logic: String },
}

impl StrategySpec {
    /// Resolve a strategy identifier (`ema`, `rsi`, `macd`, `custom`).
    pub fn from_name(name: &str, params: &StrategyParams) -> Result<Self, TradesimError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ema" => Ok(StrategySpec::EmaCrossover {
                short: params.ema_short,
                long: params.ema_long,
            }),
            "rsi" => Ok(StrategySpec::RsiReversal {
                period: params.rsi_period,
                oversold: params.rsi_oversold,
                overbought: params.rsi_overbought,
            }),
            "macd" => Ok(StrategySpec::MacdCrossover {
                fast: params.macd_fast,
                slow: params.macd_slow,
                signal: params.macd_signal,
            }),
            "custom" => match params.logic.as_deref().map(str::trim) {
                Some(logic) if !logic.is_empty() => Ok(StrategySpec::Custom {
                    logic: logic.to_string(),
                }),
                _ => Err(TradesimError::ConfigMissing {
                    section: "strategy".into(),
                    key: "logic".into(),
                }),
            },
            _ => Err(TradesimError::UnsupportedStrategy {
                name: name.to_string(),
            }),
        }
    }

    /// Build the provider. Custom logic is parsed here, so syntax errors
    /// surface before any simulation starts.
    pub fn build(&self) -> Result<Box<dyn SignalProvider>, TradesimError> {
        let provider: Box<dyn SignalProvider> = match self {
            StrategySpec::EmaCrossover { short, long } => {
                Box::new(EmaCrossover::new(*short, *long))
            }
            StrategySpec::RsiReversal {
                period,
                oversold,
                overbought,
            } => Box::new(RsiReversal::new(*period, *oversold, *overbought)),
            StrategySpec::MacdCrossover { fast, slow, signal } => {
                Box::new(MacdCrossover::new(*fast, *slow, *signal))
            }
            StrategySpec::Custom { logic } => Box::new(CustomLogic::parse(logic)?),
        };
        Ok(provider)
    }
}

impl fmt::Display for StrategySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategySpec::EmaCrossover { short, long } => write!(f, "ema({}/{})", short, long),
            StrategySpec::RsiReversal {
                period,
                oversold,
                overbought,
            } => write!(f, "rsi({}, {}/{})", period, oversold, overbought),
            StrategySpec::MacdCrossover { fast, slow, signal } => {
                write!(f, "macd({}/{}/{})", fast, slow, signal)
            }
            StrategySpec::Custom { .. } => write!(f, "custom"),
        }
    }
}

fn reading(kind: IndicatorKind, value: Option<f64>) -> Option<IndicatorReading> {
    value.map(|value| IndicatorReading { kind, value })
}

fn kind_of(indicator_type: IndicatorType) -> IndicatorKind {
    match indicator_type {
        IndicatorType::Sma(_) => IndicatorKind::Sma,
        IndicatorType::Ema(_) => IndicatorKind::Ema,
        IndicatorType::Rsi(_) => IndicatorKind::Rsi,
        IndicatorType::Macd { .. } => IndicatorKind::Macd,
    }
}

/// Long while the short EMA is above the long EMA. Both EMAs are seeded
/// with the first close, so signals start at bar 1.
#[derive(Debug, Clone)]
pub struct EmaCrossover {
    short: usize,
    long: usize,
}

impl EmaCrossover {
    pub fn new(short: usize, long: usize) -> Self {
        Self { short, long }
    }
}

impl SignalProvider for EmaCrossover {
    fn name(&self) -> &str {
        "ema"
    }

    fn produce_signals(&self, bars: &[Bar]) -> Result<Vec<SignalBar>, TradesimError> {
        let short = calculate_ewm(bars, self.short);
        let long = calculate_ewm(bars, self.long);

        Ok(bars
            .iter()
            .enumerate()
            .map(|(i, bar)| {
                let s = short.value_at(i).map(|v| v.primary());
                let l = long.value_at(i).map(|v| v.primary());
                let signal = match (s, l) {
                    (Some(s), Some(l)) if s > l => Signal::Long,
                    (Some(s), Some(l)) if s < l => Signal::Exit,
                    _ => Signal::Hold,
                };
                SignalBar::new(bar.clone(), signal).with_indicator(reading(IndicatorKind::Ema, s))
            })
            .collect())
    }
}

/// Buys when RSI falls into oversold territory, exits when it rises into
/// overbought territory.
#[derive(Debug, Clone)]
pub struct RsiReversal {
    period: usize,
    oversold: f64,
    overbought: f64,
}

impl RsiReversal {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Self {
        Self {
            period,
            oversold,
            overbought,
        }
    }
}

impl SignalProvider for RsiReversal {
    fn name(&self) -> &str {
        "rsi"
    }

    fn produce_signals(&self, bars: &[Bar]) -> Result<Vec<SignalBar>, TradesimError> {
        let rsi = calculate_rsi(bars, self.period);

        Ok(bars
            .iter()
            .enumerate()
            .map(|(i, bar)| {
                let current = rsi.value_at(i).map(|v| v.primary());
                let previous = i
                    .checked_sub(1)
                    .and_then(|p| rsi.value_at(p))
                    .map(|v| v.primary());
                let signal = match (previous, current) {
                    (Some(prev), Some(cur)) if prev > self.oversold && cur <= self.oversold => {
                        Signal::Long
                    }
                    (Some(prev), Some(cur)) if prev < self.overbought && cur >= self.overbought => {
                        Signal::Exit
                    }
                    _ => Signal::Hold,
                };
                SignalBar::new(bar.clone(), signal)
                    .with_indicator(reading(IndicatorKind::Rsi, current))
            })
            .collect())
    }
}

/// Long while the MACD line is above its signal line.
#[derive(Debug, Clone)]
pub struct MacdCrossover {
    fast: usize,
    slow: usize,
    signal: usize,
}

impl MacdCrossover {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self { fast, slow, signal }
    }
}

impl SignalProvider for MacdCrossover {
    fn name(&self) -> &str {
        "macd"
    }

    fn produce_signals(&self, bars: &[Bar]) -> Result<Vec<SignalBar>, TradesimError> {
        let macd = calculate_macd_ewm(bars, self.fast, self.slow, self.signal);

        Ok(bars
            .iter()
            .enumerate()
            .map(|(i, bar)| {
                let (signal, line) = match macd.value_at(i) {
                    Some(IndicatorValue::Macd { line, signal, .. }) => {
                        let s = if line > signal {
                            Signal::Long
                        } else if line < signal {
                            Signal::Exit
                        } else {
                            Signal::Hold
                        };
                        (s, Some(line))
                    }
                    _ => (Signal::Hold, None),
                };
                SignalBar::new(bar.clone(), signal)
                    .with_indicator(reading(IndicatorKind::Macd, line))
            })
            .collect())
    }
}

/// Signals from a parsed custom-logic program.
#[derive(Debug, Clone)]
pub struct CustomLogic {
    program: LogicProgram,
}

impl CustomLogic {
    pub fn new(program: LogicProgram) -> Self {
        Self { program }
    }

    pub fn parse(source: &str) -> Result<Self, TradesimError> {
        Ok(Self::new(rule_parser::parse(source)?))
    }

    pub fn program(&self) -> &LogicProgram {
        &self.program
    }
}

impl SignalProvider for CustomLogic {
    fn name(&self) -> &str {
        "custom"
    }

    fn produce_signals(&self, bars: &[Bar]) -> Result<Vec<SignalBar>, TradesimError> {
        let referenced = self.program.indicators();
        let indicators = compute_indicators(bars, &referenced);
        let signals = evaluate_program(&self.program, bars, &indicators);
        let chart = referenced
            .first()
            .and_then(|ty| indicators.get(ty).map(|series| (kind_of(*ty), series)));

        Ok(bars
            .iter()
            .zip(signals)
            .enumerate()
            .map(|(i, (bar, signal))| {
                let indicator = chart.and_then(|(kind, series)| {
                    reading(kind, series.value_at(i).map(|v| v.primary()))
                });
                SignalBar::new(bar.clone(), signal).with_indicator(indicator)
            })
            .collect())
    }
}
