//! Property tests for simulator and metrics invariants.
//!
//! Uses proptest to verify:
//! 1. Pairing: buys minus sells is 0 or 1, the ledger alternates, and each
//!    sell carries its buy's entry time and price
//! 2. Drawdown is never negative
//! 3. Final equity equals total profit equals the sum of net profits
//! 4. Simulation and metrics are deterministic
//! 5. Every defined metric is finite
//! 6. A single-symbol portfolio is that symbol's result

mod common;

use approx::assert_relative_eq;
use common::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use tradesim::domain::backtest::{run_backtest, BacktestConfig, RunContext};
use tradesim::domain::metrics::{compute_metrics, MetricsBundle, MetricsConfig};
use tradesim::domain::signal::{Signal, SignalBar};
use tradesim::domain::simulator::{simulate, RiskParams, SimulationOutcome, Trade};
use tradesim::domain::strategy::StrategySpec;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_series() -> impl Strategy<Value = Vec<SignalBar>> {
    prop::collection::vec((1.0..200.0_f64, -1i8..=1), 0..80).prop_map(|rows| {
        let closes: Vec<f64> = rows.iter().map(|(c, _)| (c * 100.0).round() / 100.0).collect();
        bars_from_closes(&closes)
            .into_iter()
            .zip(rows)
            .map(|(bar, (_, s))| SignalBar::new(bar, Signal::from_i8(s).unwrap_or_default()))
            .collect()
    })
}

fn arb_risk() -> impl Strategy<Value = RiskParams> {
    (
        prop::option::of(0.01..0.5_f64),
        prop::option::of(0.01..0.5_f64),
        0.0..0.01_f64,
        0.0..0.01_f64,
    )
        .prop_map(|(sl, tp, fee, slip)| RiskParams {
            stop_loss_pct: sl,
            take_profit_pct: tp,
            fee_rate: fee,
            slippage_rate: slip,
        })
}

fn metrics_for(outcome: &SimulationOutcome, signals: &[SignalBar]) -> MetricsBundle {
    let bars: Vec<Bar> = signals.iter().map(|s| s.bar.clone()).collect();
    compute_metrics(
        &outcome.ledger,
        &outcome.equity_trace,
        &outcome.drawdown_trace,
        &tradesim::domain::metrics::bar_returns(&bars),
        None,
        &MetricsConfig::default(),
    )
}

fn defined(m: &MetricsBundle) -> Vec<f64> {
    [
        m.avg_trade_profit,
        m.win_rate,
        m.sharpe_ratio,
        m.sortino_ratio,
        m.profit_factor,
        m.var_95,
        m.cvar_95,
        m.alpha,
        m.beta,
        m.annualized_return,
        m.annualized_volatility,
        m.calmar_ratio,
        m.turnover,
        m.leverage,
        m.average_holding_bars,
    ]
    .into_iter()
    .flatten()
    .chain([m.total_profit, m.max_drawdown, m.final_equity])
    .chain(
        m.rolling_sharpe
            .iter()
            .chain(&m.rolling_drawdown)
            .chain(&m.calmar_over_time)
            .filter_map(|t| t.value),
    )
    .collect()
}

proptest! {
    #[test]
    fn buys_and_sells_pair_up(series in arb_series(), risk in arb_risk(), force in any::<bool>()) {
        let outcome = simulate(&series, &risk, force);
        let buys = outcome.ledger.iter().filter(|t| matches!(t, Trade::Buy(_))).count();
        let sells = outcome.sells().count();
        prop_assert!(buys == sells || buys == sells + 1);
        if force {
            prop_assert_eq!(buys, sells);
        }
        for (i, trade) in outcome.ledger.iter().enumerate() {
            let is_buy = matches!(trade, Trade::Buy(_));
            prop_assert_eq!(is_buy, i % 2 == 0);
        }
        for pair in outcome.ledger.chunks(2) {
            if let [Trade::Buy(buy), Trade::Sell(sell)] = pair {
                prop_assert_eq!(sell.entry_time, buy.entry_time);
                prop_assert_eq!(sell.entry_price, buy.entry_price);
                prop_assert!(sell.exit_time >= buy.entry_time);
            } else {
                prop_assert!(pair.len() == 1 && matches!(pair[0], Trade::Buy(_)));
            }
        }
        prop_assert!(outcome
            .ledger
            .windows(2)
            .all(|w| w[0].timestamp() <= w[1].timestamp()));
    }

    #[test]
    fn drawdown_never_negative(series in arb_series(), risk in arb_risk()) {
        let outcome = simulate(&series, &risk, false);
        prop_assert!(outcome.drawdown_trace.iter().all(|p| p.drawdown >= 0.0));
        let m = metrics_for(&outcome, &series);
        prop_assert!(m.max_drawdown >= 0.0);
    }

    #[test]
    fn equity_bookkeeping(series in arb_series(), risk in arb_risk(), force in any::<bool>()) {
        let outcome = simulate(&series, &risk, force);
        let m = metrics_for(&outcome, &series);
        let summed: f64 = outcome.sells().map(|s| s.net_profit).sum();
        assert_relative_eq!(m.final_equity, m.total_profit, epsilon = 1e-9);
        assert_relative_eq!(m.total_profit, summed, epsilon = 1e-9);
        prop_assert_eq!(outcome.equity_trace.len(), m.num_trades);
    }

    #[test]
    fn simulation_is_deterministic(series in arb_series(), risk in arb_risk()) {
        let first = simulate(&series, &risk, true);
        let second = simulate(&series, &risk, true);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(metrics_for(&first, &series), metrics_for(&second, &series));
    }

    #[test]
    fn defined_metrics_are_finite(series in arb_series(), risk in arb_risk()) {
        let outcome = simulate(&series, &risk, true);
        let m = metrics_for(&outcome, &series);
        prop_assert!(defined(&m).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn single_symbol_identity(closes in prop::collection::vec(50.0..150.0_f64, 1..60)) {
        let mut inputs = BTreeMap::new();
        inputs.insert("ONLY".to_string(), bars_from_closes(&closes));
        let config = BacktestConfig::new(StrategySpec::Custom {
            logic: THRESHOLD_LOGIC.into(),
        });
        let report = run_backtest(&inputs, &config, &RunContext::default()).unwrap();
        prop_assert_eq!(&report.portfolio, &report.per_symbol["ONLY"]);
    }
}
