//! Configuration validation.
//!
//! Validates every section before a run and assembles the typed
//! [`RunSettings`] the backtest consumes.

use crate::domain::backtest::{BacktestConfig, FailurePolicy, DEFAULT_PROGRESS_EVERY};
use crate::domain::error::TradesimError;
use crate::domain::metrics::{
    MetricsConfig, ZeroProfitStreaks, DEFAULT_CONFIDENCE, DEFAULT_PERIODS_PER_YEAR,
    DEFAULT_ROLLING_WINDOW,
};
use crate::domain::simulator::RiskParams;
use crate::domain::strategy::{StrategyParams, StrategySpec};
use crate::ports::config_port::ConfigPort;

/// Everything a configured run needs besides the price data itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub backtest: BacktestConfig,
    pub data_dir: Option<String>,
    pub symbols: Vec<String>,
    pub benchmark: Option<String>,
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TradesimError {
    TradesimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// A numeric key: `None` when absent, an error when present but not a number.
fn number(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, TradesimError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(section, key, format!("'{}' is not a number", raw))),
    }
}

fn count(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, TradesimError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| invalid(section, key, format!("'{}' is not a non-negative integer", raw))),
    }
}

fn period(config: &dyn ConfigPort, key: &str, default: usize) -> Result<usize, TradesimError> {
    let value = count(config, "strategy", key, default)?;
    if value == 0 {
        return Err(invalid("strategy", key, format!("{} must be positive", key)));
    }
    Ok(value)
}

fn rate(config: &dyn ConfigPort, key: &str) -> Result<f64, TradesimError> {
    let value = number(config, "backtest", key)?.unwrap_or(0.0);
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(
            "backtest",
            key,
            format!("{} must be in [0, 1)", key),
        ));
    }
    Ok(value)
}

/// Stop-loss / take-profit: absent or 0 means unset.
fn optional_pct(config: &dyn ConfigPort, key: &str) -> Result<Option<f64>, TradesimError> {
    match number(config, "backtest", key)? {
        None => Ok(None),
        Some(v) if v == 0.0 => Ok(None),
        Some(v) if v > 0.0 => Ok(Some(v)),
        Some(_) => Err(invalid("backtest", key, format!("{} must be non-negative", key))),
    }
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<RiskParams, TradesimError> {
    let risk = RiskParams {
        stop_loss_pct: optional_pct(config, "stop_loss_pct")?,
        take_profit_pct: optional_pct(config, "take_profit_pct")?,
        fee_rate: rate(config, "fee_rate")?,
        slippage_rate: rate(config, "slippage_rate")?,
    };

    if let Some(policy) = config.get_string("backtest", "failure_policy") {
        policy
            .parse::<FailurePolicy>()
            .map_err(|reason| invalid("backtest", "failure_policy", reason))?;
    }

    Ok(risk)
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<StrategySpec, TradesimError> {
    let defaults = StrategyParams::default();
    let params = StrategyParams {
        ema_short: period(config, "ema_short", defaults.ema_short)?,
        ema_long: period(config, "ema_long", defaults.ema_long)?,
        rsi_period: period(config, "rsi_period", defaults.rsi_period)?,
        rsi_oversold: number(config, "strategy", "rsi_oversold")?.unwrap_or(defaults.rsi_oversold),
        rsi_overbought: number(config, "strategy", "rsi_overbought")?
            .unwrap_or(defaults.rsi_overbought),
        macd_fast: period(config, "macd_fast", defaults.macd_fast)?,
        macd_slow: period(config, "macd_slow", defaults.macd_slow)?,
        macd_signal: period(config, "macd_signal", defaults.macd_signal)?,
        logic: config
            .get_string("strategy", "logic")
            .map(|s| s.replace("\\n", "\n")),
    };

    if params.ema_short >= params.ema_long {
        return Err(invalid(
            "strategy",
            "ema_short",
            "ema_short must be less than ema_long",
        ));
    }
    if params.macd_fast >= params.macd_slow {
        return Err(invalid(
            "strategy",
            "macd_fast",
            "macd_fast must be less than macd_slow",
        ));
    }
    if !(0.0 < params.rsi_oversold
        && params.rsi_oversold < params.rsi_overbought
        && params.rsi_overbought < 100.0)
    {
        return Err(invalid(
            "strategy",
            "rsi_oversold",
            "expected 0 < rsi_oversold < rsi_overbought < 100",
        ));
    }

    let name = config
        .get_string("strategy", "name")
        .ok_or_else(|| TradesimError::ConfigMissing {
            section: "strategy".into(),
            key: "name".into(),
        })?;
    StrategySpec::from_name(&name, &params)
}

pub fn validate_metrics_config(
    config: &dyn ConfigPort,
) -> Result<(MetricsConfig, usize), TradesimError> {
    let periods_per_year =
        number(config, "metrics", "periods_per_year")?.unwrap_or(DEFAULT_PERIODS_PER_YEAR);
    if periods_per_year <= 0.0 {
        return Err(invalid(
            "metrics",
            "periods_per_year",
            "periods_per_year must be positive",
        ));
    }

    let rolling_window = count(config, "metrics", "rolling_window", DEFAULT_ROLLING_WINDOW)?;
    if rolling_window == 0 {
        return Err(invalid(
            "metrics",
            "rolling_window",
            "rolling_window must be at least 1",
        ));
    }

    let confidence = number(config, "metrics", "confidence")?.unwrap_or(DEFAULT_CONFIDENCE);
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(invalid(
            "metrics",
            "confidence",
            "confidence must be between 0 and 1",
        ));
    }

    let streak_policy = match config
        .get_string("metrics", "zero_profit_streaks")
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        None | Some("reset") => ZeroProfitStreaks::Reset,
        Some("loss") => ZeroProfitStreaks::Loss,
        Some(other) => {
            return Err(invalid(
                "metrics",
                "zero_profit_streaks",
                format!("expected 'reset' or 'loss', got '{}'", other),
            ));
        }
    };

    let progress_every = count(config, "metrics", "progress_every", DEFAULT_PROGRESS_EVERY)?;

    Ok((
        MetricsConfig {
            periods_per_year,
            rolling_window,
            confidence,
            streak_policy,
        },
        progress_every,
    ))
}

/// Comma-separated `symbols`, falling back to a single `symbol`.
pub fn configured_symbols(config: &dyn ConfigPort) -> Vec<String> {
    config
        .get_string("backtest", "symbols")
        .or_else(|| config.get_string("backtest", "symbol"))
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Validate every section and assemble the run settings.
pub fn load_settings(config: &dyn ConfigPort) -> Result<RunSettings, TradesimError> {
    let risk = validate_backtest_config(config)?;
    let strategy = validate_strategy_config(config)?;
    let (metrics, progress_every) = validate_metrics_config(config)?;

    let failure_policy = match config.get_string("backtest", "failure_policy") {
        Some(p) => p
            .parse::<FailurePolicy>()
            .map_err(|reason| invalid("backtest", "failure_policy", reason))?,
        None => FailurePolicy::default(),
    };

    let backtest = BacktestConfig {
        strategy,
        risk,
        force_close_at_end: config.get_bool("backtest", "force_close_at_end", false),
        failure_policy,
        parallel: config.get_bool("backtest", "parallel", false),
        metrics,
        progress_every,
    };

    Ok(RunSettings {
        backtest,
        data_dir: config.get_string("backtest", "data_dir"),
        symbols: configured_symbols(config),
        benchmark: config.get_string("backtest", "benchmark"),
    })
}
