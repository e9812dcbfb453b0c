//! Rule evaluation engine.
//!
//! Evaluates custom-logic rules against bars and pre-computed indicator values.
//!
//! # Evaluation Semantics
//!
//! - Comparisons evaluate at the given bar index. Any operand that is
//!   unavailable (indicator warmup, missing series) makes the comparison false,
//!   including `!=`.
//! - `crosses above` / `crosses below` need `index >= 1` and are false at index 0.
//! - `AND` short-circuits on the first `false`, `OR` on the first `true`.
//! - Program statements apply in order; the last true statement on a bar wins.

use std::collections::HashMap;

use crate::domain::indicator::{IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;
use crate::domain::rule::{Action, CompareOp, IndicatorField, IndicatorRef, LogicProgram, Operand, Rule};
use crate::domain::signal::Signal;

const EPSILON: f64 = 1e-9;

pub fn evaluate(
    rule: &Rule,
    bars: &[Bar],
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
    bar_index: usize,
) -> bool {
    match rule {
        Rule::Compare { left, op, right } => {
            let l = resolve_operand(left, bars, indicators, bar_index);
            let r = resolve_operand(right, bars, indicators, bar_index);
            match op {
                CompareOp::Lt => l < r,
                CompareOp::Le => l <= r,
                CompareOp::Gt => l > r,
                CompareOp::Ge => l >= r,
                CompareOp::Eq => (l - r).abs() < EPSILON,
                CompareOp::Ne => !l.is_nan() && !r.is_nan() && (l - r).abs() >= EPSILON,
                CompareOp::CrossesAbove | CompareOp::CrossesBelow => {
                    if bar_index == 0 {
                        return false;
                    }
                    let l_prev = resolve_operand(left, bars, indicators, bar_index - 1);
                    let r_prev = resolve_operand(right, bars, indicators, bar_index - 1);
                    if *op == CompareOp::CrossesAbove {
                        l_prev <= r_prev && l > r
                    } else {
                        l_prev >= r_prev && l < r
                    }
                }
            }
        }
        Rule::And(rules) => {
            for r in rules {
                if !evaluate(r, bars, indicators, bar_index) {
                    return false;
                }
            }
            true
        }
        Rule::Or(rules) => {
            for r in rules {
                if evaluate(r, bars, indicators, bar_index) {
                    return true;
                }
            }
            false
        }
        Rule::Not(rule) => !evaluate(rule, bars, indicators, bar_index),
    }
}

/// Evaluate every statement on every bar, producing one signal per bar.
pub fn evaluate_program(
    program: &LogicProgram,
    bars: &[Bar],
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
) -> Vec<Signal> {
    (0..bars.len())
        .map(|i| {
            program
                .statements
                .iter()
                .fold(Signal::Hold, |current, stmt| {
                    if evaluate(&stmt.rule, bars, indicators, i) {
                        match stmt.action {
                            Action::Buy => Signal::Long,
                            Action::Sell => Signal::Exit,
                        }
                    } else {
                        current
                    }
                })
        })
        .collect()
}

/// Resolve an operand to a number, `NaN` when it has no value at `bar_index`.
pub fn resolve_operand(
    operand: &Operand,
    bars: &[Bar],
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
    bar_index: usize,
) -> f64 {
    let Some(bar) = bars.get(bar_index) else {
        return f64::NAN;
    };
    match operand {
        Operand::Open => bar.open,
        Operand::High => bar.high,
        Operand::Low => bar.low,
        Operand::Close => bar.close,
        Operand::Volume => bar.volume,
        Operand::Constant(v) => *v,
        Operand::Indicator(ind_ref) => resolve_indicator(ind_ref, indicators, bar_index),
    }
}

fn resolve_indicator(
    ind_ref: &IndicatorRef,
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
    bar_index: usize,
) -> f64 {
    indicators
        .get(&ind_ref.indicator_type)
        .and_then(|series| series.value_at(bar_index))
        .map_or(f64::NAN, |value| extract_field(&value, ind_ref.field))
}

fn extract_field(value: &IndicatorValue, field: IndicatorField) -> f64 {
    match (value, field) {
        (IndicatorValue::Simple(v), IndicatorField::Value) => *v,
        (IndicatorValue::Macd { line, .. }, IndicatorField::MacdLine | IndicatorField::Value) => *line,
        (IndicatorValue::Macd { signal, .. }, IndicatorField::MacdSignal) => *signal,
        (IndicatorValue::Macd { histogram, .. }, IndicatorField::MacdHistogram) => *histogram,
        _ => f64::NAN,
    }
}
