//! Performance metrics over a completed trade ledger.
//!
//! Every ratio is an `Option<f64>`: a metric that is undefined for the input
//! (no trades, zero deviation, no losing trades, ...) is `None` and serializes
//! as `null`. Computed floats pass through [`finite`] so NaN and infinities
//! never escape.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::ohlcv::Bar;
use super::simulator::{DrawdownPoint, EquityPoint, SellRecord, Trade};

pub const DEFAULT_PERIODS_PER_YEAR: f64 = 252.0;
pub const DEFAULT_ROLLING_WINDOW: usize = 20;
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// How a trade with exactly zero net profit affects win/loss streaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroProfitStreaks {
    /// Ends both the current win streak and the current loss streak.
    #[default]
    Reset,
    /// Counts as a loss.
    Loss,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub periods_per_year: f64,
    pub rolling_window: usize,
    pub confidence: f64,
    pub streak_policy: ZeroProfitStreaks,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
            rolling_window: DEFAULT_ROLLING_WINDOW,
            confidence: DEFAULT_CONFIDENCE,
            streak_policy: ZeroProfitStreaks::Reset,
        }
    }
}

/// A point in a rolling metric series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsBundle {
    pub total_profit: f64,
    pub num_trades: usize,
    pub avg_trade_profit: Option<f64>,
    pub win_rate: Option<f64>,
    pub max_drawdown: f64,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub profit_factor: Option<f64>,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub var_95: Option<f64>,
    pub cvar_95: Option<f64>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub annualized_return: Option<f64>,
    pub annualized_volatility: Option<f64>,
    pub calmar_ratio: Option<f64>,
    pub turnover: Option<f64>,
    pub leverage: Option<f64>,
    pub average_holding_bars: Option<f64>,
    pub final_equity: f64,
    pub rolling_sharpe: Vec<TimedValue>,
    pub rolling_drawdown: Vec<TimedValue>,
    pub calmar_over_time: Vec<TimedValue>,
}

/// `Some(v)` when `v` is a finite number.
pub fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        finite(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation (ddof = 0).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    finite(var.sqrt())
}

/// `mean / std`; needs at least two returns and a non-zero deviation.
pub fn sharpe_ratio(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let sd = std_dev(returns)?;
    if sd == 0.0 {
        return None;
    }
    finite(mean(returns)? / sd)
}

/// `mean / std(negative returns)`; undefined without a spread of losses.
pub fn sortino_ratio(returns: &[f64]) -> Option<f64> {
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let sd = std_dev(&downside)?;
    if sd == 0.0 {
        return None;
    }
    finite(mean(returns)? / sd)
}

/// Linear-interpolation percentile of an ascending slice, `p` in `[0, 100]`.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        1 => finite(sorted[0]),
        _ => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = rank - lo as f64;
            finite(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
        }
    }
}

/// Value-at-risk and conditional value-at-risk of `returns` at `confidence`.
pub fn value_at_risk(returns: &[f64], confidence: f64) -> (Option<f64>, Option<f64>) {
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    let Some(var) = percentile_sorted(&sorted, (1.0 - confidence) * 100.0) else {
        return (None, None);
    };
    let tail: Vec<f64> = sorted.iter().copied().take_while(|r| *r <= var).collect();
    (Some(var), mean(&tail))
}

pub fn annualized_return(returns: &[f64], periods_per_year: f64) -> Option<f64> {
    finite((1.0 + mean(returns)?).powf(periods_per_year) - 1.0)
}

pub fn annualized_volatility(returns: &[f64], periods_per_year: f64) -> Option<f64> {
    finite(std_dev(returns)? * periods_per_year.sqrt())
}

/// Bar-to-bar percentage change of the close.
pub fn bar_returns(bars: &[Bar]) -> Vec<f64> {
    bars.windows(2)
        .filter(|w| w[0].close != 0.0)
        .map(|w| (w[1].close - w[0].close) / w[0].close)
        .collect()
}

fn beta(asset: &[f64], benchmark: &[f64]) -> Option<f64> {
    let n = asset.len().min(benchmark.len());
    if n < 2 {
        return None;
    }
    let (a, b) = (&asset[..n], &benchmark[..n]);
    let (ma, mb) = (mean(a)?, mean(b)?);
    let cov = a.iter().zip(b).map(|(x, y)| (x - ma) * (y - mb)).sum::<f64>() / n as f64;
    let var = b.iter().map(|y| (y - mb).powi(2)).sum::<f64>() / n as f64;
    if var == 0.0 {
        return None;
    }
    finite(cov / var)
}

fn streaks(sells: &[&SellRecord], policy: ZeroProfitStreaks) -> (usize, usize) {
    let (mut wins, mut losses) = (0usize, 0usize);
    let (mut max_wins, mut max_losses) = (0usize, 0usize);

    for sell in sells {
        let p = sell.net_profit;
        let is_loss = p < 0.0 || (p == 0.0 && policy == ZeroProfitStreaks::Loss);
        if p > 0.0 {
            wins += 1;
            losses = 0;
        } else if is_loss {
            losses += 1;
            wins = 0;
        } else {
            wins = 0;
            losses = 0;
        }
        max_wins = max_wins.max(wins);
        max_losses = max_losses.max(losses);
    }

    (max_wins, max_losses)
}

/// Changes between winning and non-winning outcomes per trade.
fn turnover(sells: &[&SellRecord]) -> Option<f64> {
    if sells.is_empty() {
        return None;
    }
    let flips = sells
        .windows(2)
        .filter(|w| (w[0].net_profit > 0.0) != (w[1].net_profit > 0.0))
        .count();
    finite(flips as f64 / sells.len() as f64)
}

/// Average share of capital committed to each position, with realized equity
/// before the trade standing in for the account balance.
fn leverage(sells: &[&SellRecord]) -> Option<f64> {
    let mut equity_before = 0.0;
    let mut ratios = Vec::with_capacity(sells.len());
    for sell in sells {
        let denom = sell.entry_price + equity_before;
        if denom > 0.0 {
            ratios.push(sell.entry_price / denom);
        }
        equity_before += sell.net_profit;
    }
    mean(&ratios)
}

fn window_drawdown(window: &[EquityPoint]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for p in window {
        peak = peak.max(p.cumulative_equity);
        worst = worst.max(peak - p.cumulative_equity);
    }
    worst
}

fn rolling_series(
    sells: &[&SellRecord],
    returns: &[f64],
    equity: &[EquityPoint],
    window: usize,
) -> (Vec<TimedValue>, Vec<TimedValue>, Vec<TimedValue>) {
    if window == 0 {
        return (Vec::new(), Vec::new(), Vec::new());
    }

    let rolling_sharpe = returns
        .windows(window)
        .zip(sells.iter().skip(window - 1))
        .map(|(w, sell)| TimedValue {
            timestamp: sell.timestamp,
            value: sharpe_ratio(w),
        })
        .collect();

    let mut rolling_drawdown = Vec::new();
    let mut calmar_over_time = Vec::new();
    for w in equity.windows(window) {
        let last = w[w.len() - 1];
        let dd = window_drawdown(w);
        rolling_drawdown.push(TimedValue {
            timestamp: last.timestamp,
            value: finite(dd),
        });
        calmar_over_time.push(TimedValue {
            timestamp: last.timestamp,
            value: if dd > 0.0 {
                finite(last.cumulative_equity / dd)
            } else {
                None
            },
        });
    }

    (rolling_sharpe, rolling_drawdown, calmar_over_time)
}

/// Compute the full metrics bundle for one ledger.
///
/// `asset_returns` are the bar-to-bar returns of the traded series and feed
/// `beta`; `benchmark_returns` default to them when absent.
pub fn compute_metrics(
    ledger: &[Trade],
    equity: &[EquityPoint],
    drawdown: &[DrawdownPoint],
    asset_returns: &[f64],
    benchmark_returns: Option<&[f64]>,
    config: &MetricsConfig,
) -> MetricsBundle {
    let sells: Vec<&SellRecord> = ledger.iter().filter_map(Trade::as_sell).collect();
    let returns: Vec<f64> = sells.iter().map(|s| s.return_pct).collect();
    let num_trades = sells.len();

    let total_profit: f64 = sells.iter().map(|s| s.net_profit).sum();
    let max_drawdown = drawdown.iter().map(|p| p.drawdown).fold(0.0_f64, f64::max);
    let final_equity = equity.last().map_or(0.0, |p| p.cumulative_equity);

    let (avg_trade_profit, win_rate, average_holding_bars) = if num_trades > 0 {
        let n = num_trades as f64;
        let wins = sells.iter().filter(|s| s.net_profit > 0.0).count() as f64;
        let holding: usize = sells.iter().map(|s| s.holding_bars).sum();
        (
            finite(total_profit / n),
            finite(wins / n * 100.0),
            finite(holding as f64 / n),
        )
    } else {
        (None, None, None)
    };

    let gains: f64 = returns.iter().filter(|r| **r > 0.0).sum();
    let losses: f64 = returns.iter().filter(|r| **r < 0.0).sum();
    let profit_factor = if losses < 0.0 {
        finite(gains / losses.abs())
    } else {
        None
    };

    let (max_consecutive_wins, max_consecutive_losses) = streaks(&sells, config.streak_policy);
    let (var_95, cvar_95) = value_at_risk(&returns, config.confidence);

    let benchmark = benchmark_returns.unwrap_or(asset_returns);
    let alpha = match (mean(&returns), mean(benchmark)) {
        (Some(r), Some(b)) => finite(r - b),
        _ => None,
    };

    let calmar_ratio = if max_drawdown > 0.0 {
        finite(final_equity / max_drawdown)
    } else {
        None
    };

    let (rolling_sharpe, rolling_drawdown, calmar_over_time) =
        rolling_series(&sells, &returns, equity, config.rolling_window);

    MetricsBundle {
        total_profit,
        num_trades,
        avg_trade_profit,
        win_rate,
        max_drawdown,
        sharpe_ratio: sharpe_ratio(&returns),
        sortino_ratio: sortino_ratio(&returns),
        profit_factor,
        max_consecutive_wins,
        max_consecutive_losses,
        var_95,
        cvar_95,
        alpha,
        beta: beta(asset_returns, benchmark),
        annualized_return: annualized_return(&returns, config.periods_per_year),
        annualized_volatility: annualized_volatility(&returns, config.periods_per_year),
        calmar_ratio,
        turnover: turnover(&sells),
        leverage: leverage(&sells),
        average_holding_bars,
        final_equity,
        rolling_sharpe,
        rolling_drawdown,
        calmar_over_time,
    }
}
