//! Backtest orchestration.
//!
//! [`run_symbol`] takes one symbol from bars to a [`SymbolResult`]: signals,
//! a streamed simulation with progress events, metrics, and the chart series.
//! [`run_backtest`] does that for every symbol, applies the
//! [`FailurePolicy`] and aggregates the portfolio.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::error::TradesimError;
use crate::domain::metrics::{
    bar_returns, compute_metrics, sharpe_ratio, sortino_ratio, MetricsBundle, MetricsConfig,
};
use crate::domain::ohlcv::{validate_bars, Bar};
use crate::domain::portfolio::aggregate;
use crate::domain::signal::{IndicatorReading, Signal, SignalBar};
use crate::domain::simulator::{
    CancelToken, DrawdownPoint, EquityPoint, RiskParams, SimulationOutcome, Simulator, Trade,
    TradeEvent,
};
use crate::domain::strategy::{SignalProvider, StrategySpec};
use crate::ports::progress_port::{NullSink, ProgressEvent, ProgressPayload, ProgressSink};

pub const DEFAULT_PROGRESS_EVERY: usize = 10;

/// What to do when one symbol of a multi-symbol run fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the whole run with the symbol's error.
    #[default]
    Abort,
    /// Record the symbol as skipped and carry on.
    Skip,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "skip" => Ok(FailurePolicy::Skip),
            other => Err(format!("expected 'abort' or 'skip', got '{}'", other)),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Skip => write!(f, "skip"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub strategy: StrategySpec,
    pub risk: RiskParams,
    pub force_close_at_end: bool,
    pub failure_policy: FailurePolicy,
    pub parallel: bool,
    pub metrics: MetricsConfig,
    /// Interim snapshots per run; 0 disables them.
    pub progress_every: usize,
}

impl BacktestConfig {
    pub fn new(strategy: StrategySpec) -> Self {
        Self {
            strategy,
            risk: RiskParams::default(),
            force_close_at_end: false,
            failure_policy: FailurePolicy::default(),
            parallel: false,
            metrics: MetricsConfig::default(),
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

/// Per-run collaborators that are not part of the configuration.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub sink: &'a dyn ProgressSink,
    /// Bar-to-bar benchmark returns; the asset's own returns when `None`.
    pub benchmark: Option<&'a [f64]>,
    pub cancel: Option<&'a CancelToken>,
}

impl Default for RunContext<'_> {
    fn default() -> Self {
        Self {
            sink: &NullSink,
            benchmark: None,
            cancel: None,
        }
    }
}

/// A ledger entry tagged with the symbol it was traded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub symbol: String,
    #[serde(flatten)]
    pub trade: Trade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub signal: Signal,
    pub indicator: Option<IndicatorReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolResult {
    pub symbol: String,
    pub ledger: Vec<LedgerEntry>,
    pub chart_series: Vec<ChartPoint>,
    pub equity_trace: Vec<EquityPoint>,
    pub drawdown_trace: Vec<DrawdownPoint>,
    pub metrics: MetricsBundle,
}

impl SymbolResult {
    pub fn trades(&self) -> Vec<Trade> {
        self.ledger.iter().map(|e| e.trade.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub per_symbol: BTreeMap<String, SymbolResult>,
    pub portfolio: SymbolResult,
    pub skipped: Vec<SkippedSymbol>,
}

/// Running figures sent while a simulation is in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterimSnapshot {
    pub current_equity: f64,
    pub num_trades: usize,
    pub max_drawdown: f64,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
}

impl InterimSnapshot {
    pub fn from_outcome(outcome: &SimulationOutcome) -> Self {
        let returns: Vec<f64> = outcome.sells().map(|s| s.return_pct).collect();
        Self {
            current_equity: outcome.final_equity(),
            num_trades: returns.len(),
            max_drawdown: outcome
                .drawdown_trace
                .iter()
                .map(|p| p.drawdown)
                .fold(0.0, f64::max),
            sharpe_ratio: sharpe_ratio(&returns),
            sortino_ratio: sortino_ratio(&returns),
        }
    }
}

fn emit(sink: &dyn ProgressSink, symbol: &str, progress: f64, payload: ProgressPayload) {
    sink.emit(&ProgressEvent {
        symbol: symbol.to_string(),
        progress,
        payload,
    });
}

/// Step the simulator over `signals`, streaming events into the sink.
fn stream_simulation(
    symbol: &str,
    signals: &[SignalBar],
    config: &BacktestConfig,
    ctx: &RunContext<'_>,
) -> SimulationOutcome {
    let n = signals.len();
    let snapshot_every = match config.progress_every {
        0 => None,
        per_run => Some((n / per_run).max(1)),
    };

    let mut sim = Simulator::new(config.risk);
    let mut cancelled = false;

    for (i, sb) in signals.iter().enumerate() {
        if ctx.cancel.is_some_and(CancelToken::is_cancelled) {
            info!(symbol, bar = i, "simulation cancelled");
            cancelled = true;
            break;
        }

        let progress = (i + 1) as f64 / n as f64;
        match sim.step(sb) {
            Some(TradeEvent::Entry(buy)) => {
                emit(ctx.sink, symbol, progress, ProgressPayload::Entry(buy))
            }
            Some(TradeEvent::Exit(sell)) => {
                emit(ctx.sink, symbol, progress, ProgressPayload::Exit(sell))
            }
            None => {}
        }

        if let Some(every) = snapshot_every {
            if i % every == 0 || i + 1 == n {
                let snapshot = InterimSnapshot::from_outcome(sim.outcome());
                emit(
                    ctx.sink,
                    symbol,
                    progress,
                    ProgressPayload::InterimSnapshot(snapshot),
                );
            }
        }
    }

    if !cancelled {
        if let Some(TradeEvent::Exit(sell)) = sim.finish(config.force_close_at_end) {
            emit(ctx.sink, symbol, 1.0, ProgressPayload::Exit(sell));
        }
    }

    sim.into_outcome()
}

/// Backtest one symbol.
pub fn run_symbol(
    symbol: &str,
    bars: &[Bar],
    provider: &dyn SignalProvider,
    config: &BacktestConfig,
    ctx: &RunContext<'_>,
) -> Result<SymbolResult, TradesimError> {
    validate_bars(symbol, bars)?;
    config.risk.validate()?;

    let signals = provider.produce_signals(bars).map_err(|e| match e {
        TradesimError::StrategyEvaluation { .. } => e,
        other => TradesimError::StrategyEvaluation {
            symbol: symbol.to_string(),
            reason: other.to_string(),
        },
    })?;
    if signals.len() != bars.len() {
        return Err(TradesimError::StrategyEvaluation {
            symbol: symbol.to_string(),
            reason: format!(
                "provider '{}' returned {} signals for {} bars",
                provider.name(),
                signals.len(),
                bars.len()
            ),
        });
    }

    let outcome = stream_simulation(symbol, &signals, config, ctx);
    let metrics = compute_metrics(
        &outcome.ledger,
        &outcome.equity_trace,
        &outcome.drawdown_trace,
        &bar_returns(bars),
        ctx.benchmark,
        &config.metrics,
    );

    info!(
        symbol,
        strategy = provider.name(),
        trades = metrics.num_trades,
        total_profit = metrics.total_profit,
        "symbol complete"
    );

    let chart_series = signals
        .iter()
        .map(|sb| ChartPoint {
            timestamp: sb.bar.timestamp,
            price: sb.bar.close,
            signal: sb.signal,
            indicator: sb.indicator,
        })
        .collect();

    Ok(SymbolResult {
        symbol: symbol.to_string(),
        ledger: outcome
            .ledger
            .into_iter()
            .map(|trade| LedgerEntry {
                symbol: symbol.to_string(),
                trade,
            })
            .collect(),
        chart_series,
        equity_trace: outcome.equity_trace,
        drawdown_trace: outcome.drawdown_trace,
        metrics,
    })
}

/// Backtest every symbol in `inputs` and aggregate the portfolio.
///
/// Strategy and risk parameters are checked before any symbol runs.
pub fn run_backtest(
    inputs: &BTreeMap<String, Vec<Bar>>,
    config: &BacktestConfig,
    ctx: &RunContext<'_>,
) -> Result<BacktestReport, TradesimError> {
    config.risk.validate()?;
    let provider = config.strategy.build()?;
    run_backtest_with(inputs, provider.as_ref(), config, ctx)
}

/// [`run_backtest`] with a caller-supplied provider in place of
/// `config.strategy`.
pub fn run_backtest_with(
    inputs: &BTreeMap<String, Vec<Bar>>,
    provider: &dyn SignalProvider,
    config: &BacktestConfig,
    ctx: &RunContext<'_>,
) -> Result<BacktestReport, TradesimError> {
    config.risk.validate()?;
    if inputs.is_empty() {
        return Err(TradesimError::EmptyData {
            symbol: "portfolio".into(),
        });
    }

    let jobs: Vec<(&String, &Vec<Bar>)> = inputs.iter().collect();
    let run = |(symbol, bars): &(&String, &Vec<Bar>)| {
        (
            symbol.to_string(),
            run_symbol(symbol, bars, provider, config, ctx),
        )
    };

    #[cfg(feature = "parallel")]
    let results: Vec<(String, Result<SymbolResult, TradesimError>)> = if config.parallel {
        use rayon::prelude::*;
        jobs.par_iter().map(run).collect()
    } else {
        jobs.iter().map(run).collect()
    };
    #[cfg(not(feature = "parallel"))]
    let results: Vec<(String, Result<SymbolResult, TradesimError>)> =
        jobs.iter().map(run).collect();

    let mut per_symbol = BTreeMap::new();
    let mut skipped = Vec::new();
    for (symbol, result) in results {
        match result {
            Ok(r) => {
                per_symbol.insert(symbol, r);
            }
            Err(e) => match config.failure_policy {
                FailurePolicy::Abort => return Err(e),
                FailurePolicy::Skip => {
                    warn!(symbol = %symbol, error = %e, "skipping symbol");
                    skipped.push(SkippedSymbol {
                        symbol,
                        reason: e.to_string(),
                    });
                }
            },
        }
    }

    let portfolio = aggregate(&per_symbol, &config.metrics);
    info!(
        symbols = per_symbol.len(),
        skipped = skipped.len(),
        trades = portfolio.metrics.num_trades,
        total_profit = portfolio.metrics.total_profit,
        "portfolio aggregated"
    );

    Ok(BacktestReport {
        per_symbol,
        portfolio,
        skipped,
    })
}
