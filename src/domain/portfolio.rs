//! Portfolio aggregation across symbols.
//!
//! Symbols are simulated independently; the portfolio view merges their
//! ledgers, sums their realized equity on a unified timeline, and recomputes
//! the return-based metrics over that combined curve.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use super::backtest::{LedgerEntry, SymbolResult};
use super::metrics::{
    annualized_return, annualized_volatility, compute_metrics, finite, mean, sharpe_ratio,
    sortino_ratio, value_at_risk, MetricsBundle, MetricsConfig,
};
use super::simulator::{DrawdownPoint, EquityPoint};

pub const PORTFOLIO_SYMBOL: &str = "PORTFOLIO";

/// Mean of the defined values, `None` when there are none.
fn safe_mean(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let defined: Vec<f64> = values.into_iter().flatten().collect();
    mean(&defined)
}

/// Sorted union of every symbol's equity timestamps, with the summed
/// last-known equity of each symbol at that instant.
pub fn merge_equity(results: &BTreeMap<String, SymbolResult>) -> Vec<EquityPoint> {
    let mut axis: Vec<NaiveDateTime> = results
        .values()
        .flat_map(|r| r.equity_trace.iter().map(|p| p.timestamp))
        .collect();
    axis.sort();
    axis.dedup();

    let traces: Vec<&[EquityPoint]> = results.values().map(|r| r.equity_trace.as_slice()).collect();
    let mut cursors = vec![0usize; traces.len()];
    let mut last_known = vec![0.0_f64; traces.len()];

    axis.into_iter()
        .map(|ts| {
            for (k, trace) in traces.iter().enumerate() {
                while cursors[k] < trace.len() && trace[cursors[k]].timestamp <= ts {
                    last_known[k] = trace[cursors[k]].cumulative_equity;
                    cursors[k] += 1;
                }
            }
            EquityPoint {
                timestamp: ts,
                cumulative_equity: last_known.iter().sum(),
            }
        })
        .collect()
}

fn drawdown_of(equity: &[EquityPoint]) -> Vec<DrawdownPoint> {
    let mut peak = 0.0_f64;
    equity
        .iter()
        .map(|p| {
            peak = peak.max(p.cumulative_equity);
            DrawdownPoint {
                timestamp: p.timestamp,
                drawdown: peak - p.cumulative_equity,
            }
        })
        .collect()
}

/// Step returns of the merged curve, skipping steps from zero equity.
pub fn portfolio_returns(equity: &[EquityPoint]) -> Vec<f64> {
    let mut prior = 0.0;
    let mut out = Vec::new();
    for p in equity {
        if prior != 0.0 {
            out.push((p.cumulative_equity - prior) / prior);
        }
        prior = p.cumulative_equity;
    }
    out
}

/// Combine per-symbol results into one portfolio result of the same shape.
///
/// With exactly one symbol the portfolio is that symbol's result.
pub fn aggregate(results: &BTreeMap<String, SymbolResult>, config: &MetricsConfig) -> SymbolResult {
    if results.len() == 1 {
        if let Some(only) = results.values().next() {
            return only.clone();
        }
    }

    // BTreeMap iteration is symbol-ordered, and the sort is stable, so equal
    // timestamps keep symbol order and then ledger order.
    let mut ledger: Vec<LedgerEntry> = results.values().flat_map(|r| r.ledger.clone()).collect();
    ledger.sort_by_key(|e| e.trade.timestamp());

    let equity_trace = merge_equity(results);
    let drawdown_trace = drawdown_of(&equity_trace);
    let returns = portfolio_returns(&equity_trace);

    let trades: Vec<_> = ledger.iter().map(|e| e.trade.clone()).collect();
    let base = compute_metrics(&trades, &equity_trace, &drawdown_trace, &[], None, config);

    let per: Vec<&MetricsBundle> = results.values().map(|r| &r.metrics).collect();
    let total_profit: f64 = per.iter().map(|m| m.total_profit).sum();
    let max_drawdown = per.iter().map(|m| m.max_drawdown).fold(0.0, f64::max);
    let final_equity = equity_trace.last().map_or(0.0, |p| p.cumulative_equity);
    // cvar_95 is the tail mean under the merged curve's own VaR, while the
    // reported var_95 is the per-symbol mean; the two need not bracket.
    let (_, cvar_95) = value_at_risk(&returns, config.confidence);

    let metrics = MetricsBundle {
        total_profit,
        num_trades: per.iter().map(|m| m.num_trades).sum(),
        avg_trade_profit: safe_mean(per.iter().map(|m| m.avg_trade_profit)),
        win_rate: safe_mean(per.iter().map(|m| m.win_rate)),
        max_drawdown,
        sharpe_ratio: sharpe_ratio(&returns),
        sortino_ratio: sortino_ratio(&returns),
        profit_factor: base.profit_factor,
        max_consecutive_wins: per.iter().map(|m| m.max_consecutive_wins).max().unwrap_or(0),
        max_consecutive_losses: per.iter().map(|m| m.max_consecutive_losses).max().unwrap_or(0),
        var_95: safe_mean(per.iter().map(|m| m.var_95)),
        cvar_95,
        alpha: safe_mean(per.iter().map(|m| m.alpha)),
        beta: safe_mean(per.iter().map(|m| m.beta)),
        annualized_return: annualized_return(&returns, config.periods_per_year),
        annualized_volatility: annualized_volatility(&returns, config.periods_per_year),
        calmar_ratio: if max_drawdown > 0.0 {
            finite(final_equity / max_drawdown)
        } else {
            None
        },
        turnover: safe_mean(per.iter().map(|m| m.turnover)),
        leverage: safe_mean(per.iter().map(|m| m.leverage)),
        average_holding_bars: safe_mean(per.iter().map(|m| m.average_holding_bars)),
        final_equity,
        rolling_sharpe: base.rolling_sharpe,
        rolling_drawdown: base.rolling_drawdown,
        calmar_over_time: base.calmar_over_time,
    };

    SymbolResult {
        symbol: PORTFOLIO_SYMBOL.to_string(),
        ledger,
        chart_series: Vec::new(),
        equity_trace,
        drawdown_trace,
        metrics,
    }
}
