//! Core domain types and logic.

pub mod ohlcv;
pub mod indicator;
pub mod signal;
pub mod rule;
pub mod rule_parser;
pub mod rule_eval;
pub mod strategy;
pub mod simulator;
pub mod metrics;
pub mod portfolio;
pub mod backtest;
pub mod config_validation;
pub mod error;
