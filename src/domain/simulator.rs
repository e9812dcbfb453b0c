//! Single-position trade simulator.
//!
//! Walks a signal sequence bar by bar, holding at most one long position.
//! Entries fill at `close * (1 + slippage)`, exits at `close * (1 - slippage)`.
//! While long, every bar checks stop-loss, take-profit and the exit signal;
//! any of the three closes the position. Fees are charged per side on the
//! fill prices.
//!
//! [`Simulator`] is the step-at-a-time state machine; [`simulate`] drives it
//! over a whole sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::error::TradesimError;
use crate::domain::signal::{Signal, SignalBar};

/// Risk and cost parameters applied to every fill.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskParams {
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    /// Charged on both the entry and the exit fill.
    pub fee_rate: f64,
    pub slippage_rate: f64,
}

impl RiskParams {
    pub fn validate(&self) -> Result<(), TradesimError> {
        for (field, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(TradesimError::InvalidRiskParams {
                        field: field.into(),
                        reason: format!("must be a positive number when set, got {}", v),
                    });
                }
            }
        }

        for (field, value) in [
            ("fee_rate", self.fee_rate),
            ("slippage_rate", self.slippage_rate),
        ] {
            if !value.is_finite() || !(0.0..1.0).contains(&value) {
                return Err(TradesimError::InvalidRiskParams {
                    field: field.into(),
                    reason: format!("must be in [0, 1), got {}", value),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyRecord {
    pub timestamp: NaiveDateTime,
    pub raw_price: f64,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellRecord {
    pub timestamp: NaiveDateTime,
    pub raw_exit_price: f64,
    pub exit_price: f64,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub net_profit: f64,
    pub return_pct: f64,
    pub holding_bars: usize,
    pub sl_hit: bool,
    pub tp_hit: bool,
    pub signal_exit: bool,
    #[serde(default)]
    pub forced_exit: bool,
    pub fee: f64,
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Trade {
    Buy(BuyRecord),
    Sell(SellRecord),
}

impl Trade {
    pub fn timestamp(&self) -> NaiveDateTime {
        match self {
            Trade::Buy(b) => b.timestamp,
            Trade::Sell(s) => s.timestamp,
        }
    }

    pub fn as_sell(&self) -> Option<&SellRecord> {
        match self {
            Trade::Sell(s) => Some(s),
            Trade::Buy(_) => None,
        }
    }
}

/// Realized cumulative profit after a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub cumulative_equity: f64,
}

/// Distance from the running equity peak after a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawdownPoint {
    pub timestamp: NaiveDateTime,
    pub drawdown: f64,
}

/// What a single step did to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    Entry(BuyRecord),
    Exit(SellRecord),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationOutcome {
    pub ledger: Vec<Trade>,
    pub equity_trace: Vec<EquityPoint>,
    pub drawdown_trace: Vec<DrawdownPoint>,
}

impl SimulationOutcome {
    pub fn sells(&self) -> impl Iterator<Item = &SellRecord> {
        self.ledger.iter().filter_map(Trade::as_sell)
    }

    pub fn num_trades(&self) -> usize {
        self.sells().count()
    }

    pub fn final_equity(&self) -> f64 {
        self.equity_trace
            .last()
            .map_or(0.0, |p| p.cumulative_equity)
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenPosition {
    entry_price: f64,
    entry_time: NaiveDateTime,
    entry_index: usize,
}

/// Step-at-a-time simulator state.
#[derive(Debug, Clone)]
pub struct Simulator {
    risk: RiskParams,
    position: Option<OpenPosition>,
    outcome: SimulationOutcome,
    cumulative: f64,
    peak: f64,
    bars_seen: usize,
    last: Option<SignalBar>,
}

impl Simulator {
    pub fn new(risk: RiskParams) -> Self {
        Self {
            risk,
            position: None,
            outcome: SimulationOutcome::default(),
            cumulative: 0.0,
            peak: 0.0,
            bars_seen: 0,
            last: None,
        }
    }

    pub fn is_long(&self) -> bool {
        self.position.is_some()
    }

    /// Advance over the next bar. Returns the trade it caused, if any.
    pub fn step(&mut self, sb: &SignalBar) -> Option<TradeEvent> {
        let index = self.bars_seen;
        self.bars_seen += 1;
        self.last = Some(sb.clone());

        match self.position {
            None if sb.signal == Signal::Long => Some(self.open(index, sb)),
            None => None,
            Some(pos) => {
                let exit_price = sb.bar.close * (1.0 - self.risk.slippage_rate);
                let sl_hit = self
                    .risk
                    .stop_loss_pct
                    .is_some_and(|sl| exit_price <= pos.entry_price * (1.0 - sl));
                let tp_hit = self
                    .risk
                    .take_profit_pct
                    .is_some_and(|tp| exit_price >= pos.entry_price * (1.0 + tp));
                let signal_exit = sb.signal == Signal::Exit;

                if sl_hit || tp_hit || signal_exit {
                    Some(self.close(pos, index, sb, sl_hit, tp_hit, signal_exit, false))
                } else {
                    None
                }
            }
        }
    }

    /// End of input. With `force_close`, an open long is closed on the last
    /// stepped bar.
    pub fn finish(&mut self, force_close: bool) -> Option<TradeEvent> {
        if !force_close {
            return None;
        }
        let pos = self.position?;
        let sb = self.last.clone()?;
        let index = self.bars_seen - 1;
        let exit_price = sb.bar.close * (1.0 - self.risk.slippage_rate);
        let sl_hit = self
            .risk
            .stop_loss_pct
            .is_some_and(|sl| exit_price <= pos.entry_price * (1.0 - sl));
        let tp_hit = self
            .risk
            .take_profit_pct
            .is_some_and(|tp| exit_price >= pos.entry_price * (1.0 + tp));
        Some(self.close(pos, index, &sb, sl_hit, tp_hit, false, true))
    }

    pub fn outcome(&self) -> &SimulationOutcome {
        &self.outcome
    }

    pub fn into_outcome(self) -> SimulationOutcome {
        self.outcome
    }

    fn open(&mut self, index: usize, sb: &SignalBar) -> TradeEvent {
        let entry_price = sb.bar.close * (1.0 + self.risk.slippage_rate);
        let timestamp = sb.bar.timestamp;
        self.position = Some(OpenPosition {
            entry_price,
            entry_time: timestamp,
            entry_index: index,
        });

        let record = BuyRecord {
            timestamp,
            raw_price: sb.bar.close,
            entry_price,
            entry_time: timestamp,
        };
        debug!(index, price = entry_price, "entry");
        self.outcome.ledger.push(Trade::Buy(record.clone()));
        TradeEvent::Entry(record)
    }

    #[allow(clippy::too_many_arguments)]
    fn close(
        &mut self,
        pos: OpenPosition,
        index: usize,
        sb: &SignalBar,
        sl_hit: bool,
        tp_hit: bool,
        signal_exit: bool,
        forced_exit: bool,
    ) -> TradeEvent {
        let exit_price = sb.bar.close * (1.0 - self.risk.slippage_rate);
        let fee = (pos.entry_price + exit_price) * self.risk.fee_rate;
        let net_profit = exit_price - pos.entry_price - fee;
        let timestamp = sb.bar.timestamp;

        let record = SellRecord {
            timestamp,
            raw_exit_price: sb.bar.close,
            exit_price,
            entry_price: pos.entry_price,
            entry_time: pos.entry_time,
            exit_time: timestamp,
            net_profit,
            return_pct: net_profit / pos.entry_price,
            holding_bars: index - pos.entry_index,
            sl_hit,
            tp_hit,
            signal_exit,
            forced_exit,
            fee,
        };

        self.position = None;
        self.cumulative += net_profit;
        self.peak = self.peak.max(self.cumulative);
        self.outcome.equity_trace.push(EquityPoint {
            timestamp,
            cumulative_equity: self.cumulative,
        });
        self.outcome.drawdown_trace.push(DrawdownPoint {
            timestamp,
            drawdown: self.peak - self.cumulative,
        });

        debug!(
            index,
            price = exit_price,
            net_profit,
            sl_hit,
            tp_hit,
            forced_exit,
            "exit"
        );
        self.outcome.ledger.push(Trade::Sell(record.clone()));
        TradeEvent::Exit(record)
    }
}

/// Shared flag a caller can set to stop a running simulation between bars.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Run the whole signal sequence through a fresh [`Simulator`].
pub fn simulate(signals: &[SignalBar], risk: &RiskParams, force_close: bool) -> SimulationOutcome {
    let mut sim = Simulator::new(*risk);
    for sb in signals {
        sim.step(sb);
    }
    sim.finish(force_close);
    sim.into_outcome()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_bars;
    use approx::assert_relative_eq;

    fn sequence(closes: &[f64], signals: &[i8]) -> Vec<SignalBar> {
        test_bars(closes)
            .into_iter()
            .zip(signals)
            .map(|(bar, &s)| SignalBar::new(bar, Signal::from_i8(s).unwrap()))
            .collect()
    }

    fn only_sell(outcome: &SimulationOutcome) -> &SellRecord {
        let sells: Vec<_> = outcome.sells().collect();
        assert_eq!(sells.len(), 1);
        sells[0]
    }

    #[test]
    fn signal_exit_without_risk_params() {
        let out = simulate(
            &sequence(&[100.0, 110.0, 90.0], &[1, 0, -1]),
            &RiskParams::default(),
            false,
        );
        assert_eq!(out.ledger.len(), 2);
        let sell = only_sell(&out);
        assert_relative_eq!(sell.entry_price, 100.0);
        assert_relative_eq!(sell.exit_price, 90.0);
        assert_relative_eq!(sell.net_profit, -10.0);
        assert_eq!(sell.holding_bars, 2);
        assert!(sell.signal_exit && !sell.sl_hit && !sell.tp_hit);
        assert_relative_eq!(out.drawdown_trace[0].drawdown, 10.0);
    }

    #[test]
    fn stop_loss_and_signal_recorded_together() {
        let risk = RiskParams {
            stop_loss_pct: Some(0.05),
            ..RiskParams::default()
        };
        let out = simulate(&sequence(&[100.0, 110.0, 90.0], &[1, 0, -1]), &risk, false);
        let sell = only_sell(&out);
        assert!(sell.sl_hit);
        assert!(sell.signal_exit);
        assert_relative_eq!(sell.net_profit, -10.0);
    }

    #[test]
    fn take_profit_exits_without_signal() {
        let risk = RiskParams {
            take_profit_pct: Some(0.05),
            ..RiskParams::default()
        };
        let out = simulate(&sequence(&[100.0, 106.0, 120.0], &[1, 0, 0]), &risk, false);
        let sell = only_sell(&out);
        assert!(sell.tp_hit && !sell.signal_exit);
        assert_eq!(sell.holding_bars, 1);
        assert_relative_eq!(sell.net_profit, 6.0);
    }

    #[test]
    fn fees_charged_on_both_fills() {
        let risk = RiskParams {
            fee_rate: 0.001,
            ..RiskParams::default()
        };
        let out = simulate(&sequence(&[100.0, 110.0, 90.0], &[1, 0, -1]), &risk, false);
        let sell = only_sell(&out);
        assert_relative_eq!(sell.fee, 0.19, epsilon = 1e-12);
        assert_relative_eq!(sell.net_profit, -10.19, epsilon = 1e-12);
    }

    #[test]
    fn slippage_moves_fills_against_the_trade() {
        let risk = RiskParams {
            slippage_rate: 0.01,
            ..RiskParams::default()
        };
        let out = simulate(&sequence(&[100.0, 100.0], &[1, -1]), &risk, false);
        let sell = only_sell(&out);
        assert_relative_eq!(sell.entry_price, 101.0);
        assert_relative_eq!(sell.exit_price, 99.0);
        assert_relative_eq!(sell.raw_exit_price, 100.0);
        assert_relative_eq!(sell.return_pct, -2.0 / 101.0);
    }

    #[test]
    fn long_while_long_is_noop_and_exit_while_flat_ignored() {
        let out = simulate(
            &sequence(&[100.0, 101.0, 102.0, 103.0], &[-1, 1, 1, 0]),
            &RiskParams::default(),
            false,
        );
        assert_eq!(out.ledger.len(), 1);
        assert!(matches!(out.ledger[0], Trade::Buy(_)));
        assert!(out.equity_trace.is_empty());
    }

    #[test]
    fn reentry_after_exit() {
        let out = simulate(
            &sequence(&[10.0, 12.0, 11.0, 15.0], &[1, -1, 1, -1]),
            &RiskParams::default(),
            false,
        );
        assert_eq!(out.num_trades(), 2);
        assert_relative_eq!(out.final_equity(), 6.0);
        assert_relative_eq!(out.equity_trace[0].cumulative_equity, 2.0);
    }

    #[test]
    fn open_position_left_open_by_default() {
        let signals = sequence(&[100.0, 105.0], &[1, 0]);
        let out = simulate(&signals, &RiskParams::default(), false);
        assert_eq!(out.ledger.len(), 1);
    }

    #[test]
    fn forced_close_at_last_bar() {
        let signals = sequence(&[100.0, 105.0], &[1, 0]);
        let out = simulate(&signals, &RiskParams::default(), true);
        let sell = only_sell(&out);
        assert!(sell.forced_exit);
        assert!(!sell.signal_exit);
        assert_relative_eq!(sell.net_profit, 5.0);
        assert_eq!(sell.holding_bars, 1);
    }

    #[test]
    fn empty_and_single_bar_sequences() {
        let out = simulate(&[], &RiskParams::default(), true);
        assert!(out.ledger.is_empty() && out.equity_trace.is_empty());

        let out = simulate(&sequence(&[100.0], &[1]), &RiskParams::default(), false);
        assert_eq!(out.num_trades(), 0);
    }

    #[test]
    fn drawdown_tracks_running_peak() {
        let out = simulate(
            &sequence(&[10.0, 15.0, 10.0, 8.0, 10.0, 11.0], &[1, -1, 1, -1, 1, -1]),
            &RiskParams::default(),
            false,
        );
        let dd: Vec<f64> = out.drawdown_trace.iter().map(|p| p.drawdown).collect();
        assert_eq!(dd, vec![0.0, 2.0, 1.0]);
    }

    #[test]
    fn step_reports_events() {
        let bars = sequence(&[100.0, 90.0], &[1, -1]);
        let mut sim = Simulator::new(RiskParams::default());
        assert!(matches!(sim.step(&bars[0]), Some(TradeEvent::Entry(_))));
        assert!(sim.is_long());
        assert!(matches!(sim.step(&bars[1]), Some(TradeEvent::Exit(_))));
        assert!(!sim.is_long());
        assert_eq!(sim.finish(true), None);
    }

    #[test]
    fn holding_bars_count_stepped_bars() {
        let bars = sequence(&[100.0, 101.0, 102.0, 99.0], &[1, 0, 0, 0]);
        let mut sim = Simulator::new(RiskParams::default());
        for sb in &bars {
            sim.step(sb);
        }
        match sim.finish(true) {
            Some(TradeEvent::Exit(sell)) => {
                assert_eq!(sell.holding_bars, 3);
                assert!(sell.forced_exit);
            }
            other => panic!("expected forced exit, got {:?}", other),
        }
    }

    #[test]
    fn risk_params_validation() {
        assert!(RiskParams::default().validate().is_ok());

        let bad = [
            RiskParams {
                stop_loss_pct: Some(0.0),
                ..RiskParams::default()
            },
            RiskParams {
                take_profit_pct: Some(-0.1),
                ..RiskParams::default()
            },
            RiskParams {
                fee_rate: -0.01,
                ..RiskParams::default()
            },
            RiskParams {
                slippage_rate: f64::NAN,
                ..RiskParams::default()
            },
            RiskParams {
                fee_rate: 1.0,
                ..RiskParams::default()
            },
        ];
        for params in bad {
            assert!(matches!(
                params.validate(),
                Err(TradesimError::InvalidRiskParams { .. })
            ));
        }
    }

    #[test]
    fn trade_serializes_with_action_tag() {
        let out = simulate(
            &sequence(&[100.0, 90.0], &[1, -1]),
            &RiskParams::default(),
            false,
        );
        let json = serde_json::to_value(&out.ledger).unwrap();
        assert_eq!(json[0]["action"], "buy");
        assert_eq!(json[1]["action"], "sell");
        assert_eq!(json[1]["holding_bars"], 1);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
