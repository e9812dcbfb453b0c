//! Custom-logic AST data structures.
//!
//! This module defines the abstract syntax tree for custom trading logic:
//! - `Operand`: What can be compared (price fields, constants, indicators)
//! - `IndicatorRef`: Reference to an indicator with a specific field
//! - `CompareOp`: Infix comparison, including the two cross operators
//! - `Rule`: A boolean condition over operands
//! - `Statement` / `LogicProgram`: `IF <rule> THEN BUY|SELL` lines

use std::collections::HashSet;
use std::fmt;

use crate::domain::indicator::IndicatorType;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Open,
    High,
    Low,
    Close,
    Volume,
    Constant(f64),
    Indicator(IndicatorRef),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorRef {
    pub indicator_type: IndicatorType,
    pub field: IndicatorField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorField {
    Value,
    MacdLine,
    MacdSignal,
    MacdHistogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    CrossesAbove,
    CrossesBelow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    And(Vec<Rule>),
    Or(Vec<Rule>),
    Not(Box<Rule>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub rule: Rule,
    pub action: Action,
}

/// A parsed custom-logic program. Statements apply in order; a later true
/// statement overrides an earlier one on the same bar.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicProgram {
    pub statements: Vec<Statement>,
}

impl LogicProgram {
    /// Indicators referenced anywhere in the program, in order of first use.
    pub fn indicators(&self) -> Vec<IndicatorType> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for stmt in &self.statements {
            collect_indicators(&stmt.rule, &mut |ty| {
                if seen.insert(ty) {
                    ordered.push(ty);
                }
            });
        }
        ordered
    }
}

/// Collect the indicator types a rule depends on.
pub fn extract_indicators(rule: &Rule) -> HashSet<IndicatorType> {
    let mut set = HashSet::new();
    collect_indicators(rule, &mut |ty| {
        set.insert(ty);
    });
    set
}

fn collect_indicators(rule: &Rule, visit: &mut dyn FnMut(IndicatorType)) {
    match rule {
        Rule::Compare { left, right, .. } => {
            for operand in [left, right] {
                if let Operand::Indicator(r) = operand {
                    visit(r.indicator_type);
                }
            }
        }
        Rule::And(rules) | Rule::Or(rules) => {
            for r in rules {
                collect_indicators(r, visit);
            }
        }
        Rule::Not(inner) => collect_indicators(inner, visit),
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Open => write!(f, "open"),
            Operand::High => write!(f, "high"),
            Operand::Low => write!(f, "low"),
            Operand::Close => write!(f, "close"),
            Operand::Volume => write!(f, "volume"),
            Operand::Constant(v) => write!(f, "{}", v),
            Operand::Indicator(r) => match (r.indicator_type, r.field) {
                (IndicatorType::Ema(n), _) => write!(f, "EMA_{}", n),
                (IndicatorType::Sma(n), _) => write!(f, "SMA_{}", n),
                (IndicatorType::Rsi(n), _) => write!(f, "RSI_{}", n),
                (IndicatorType::Macd { .. }, IndicatorField::MacdSignal) => write!(f, "MACD_SIGNAL"),
                (IndicatorType::Macd { .. }, IndicatorField::MacdHistogram) => write!(f, "MACD_HIST"),
                (IndicatorType::Macd { .. }, _) => write!(f, "MACD"),
            },
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::CrossesAbove => "crosses above",
            CompareOp::CrossesBelow => "crosses below",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Compare { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Rule::And(rules) => write_joined(f, rules, " AND "),
            Rule::Or(rules) => write_joined(f, rules, " OR "),
            Rule::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, rules: &[Rule], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, r) in rules.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", r)?;
    }
    f.write_str(")")
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
        };
        write!(f, "IF {} THEN {}", self.rule, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ema(n: usize) -> Operand {
        Operand::Indicator(IndicatorRef {
            indicator_type: IndicatorType::Ema(n),
            field: IndicatorField::Value,
        })
    }

    #[test]
    fn display_compare() {
        let rule = Rule::Compare {
            left: Operand::Close,
            op: CompareOp::CrossesAbove,
            right: ema(20),
        };
        assert_eq!(rule.to_string(), "close crosses above EMA_20");
    }

    #[test]
    fn display_statement_nested() {
        let stmt = Statement {
            rule: Rule::And(vec![
                Rule::Compare {
                    left: Operand::Close,
                    op: CompareOp::Gt,
                    right: ema(20),
                },
                Rule::Not(Box::new(Rule::Compare {
                    left: Operand::Volume,
                    op: CompareOp::Eq,
                    right: Operand::Constant(0.0),
                })),
            ]),
            action: Action::Buy,
        };
        assert_eq!(
            stmt.to_string(),
            "IF (close > EMA_20 AND NOT (volume == 0)) THEN BUY"
        );
    }

    #[test]
    fn program_indicators_in_first_use_order() {
        let program = LogicProgram {
            statements: vec![
                Statement {
                    rule: Rule::Compare {
                        left: ema(50),
                        op: CompareOp::Lt,
                        right: ema(20),
                    },
                    action: Action::Buy,
                },
                Statement {
                    rule: Rule::Compare {
                        left: ema(20),
                        op: CompareOp::Gt,
                        right: Operand::Constant(1.0),
                    },
                    action: Action::Sell,
                },
            ],
        };
        assert_eq!(
            program.indicators(),
            vec![IndicatorType::Ema(50), IndicatorType::Ema(20)]
        );
    }

    #[test]
    fn extract_indicators_walks_nested_rules() {
        let rule = Rule::Or(vec![
            Rule::Compare {
                left: Operand::Close,
                op: CompareOp::Gt,
                right: ema(10),
            },
            Rule::Not(Box::new(Rule::Compare {
                left: ema(30),
                op: CompareOp::Gt,
                right: Operand::Constant(1.0),
            })),
        ]);
        let set = extract_indicators(&rule);
        assert!(set.contains(&IndicatorType::Ema(10)));
        assert!(set.contains(&IndicatorType::Ema(30)));
        assert_eq!(set.len(), 2);
    }
}
