//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing::{info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::adapters::progress::TracingProgressSink;
use crate::domain::backtest::{run_backtest, BacktestReport, FailurePolicy, RunContext, SkippedSymbol};
use crate::domain::config_validation::{load_settings, RunSettings};
use crate::domain::error::TradesimError;
use crate::domain::metrics::bar_returns;
use crate::domain::ohlcv::Bar;
use crate::domain::rule_parser;
use crate::domain::strategy::StrategySpec;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "tradesim", about = "Signal-driven trade simulator and backtester")]
pub struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory of <SYMBOL>.csv files, overrides [backtest] data_dir
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
        /// Symbols to run, overrides [backtest] symbols; repeatable
        #[arg(short, long)]
        symbol: Vec<String>,
        /// Report path, `-` for stdout
        #[arg(short, long)]
        output: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a configuration file and its strategy logic
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List the symbols available in a data directory
    ListSymbols {
        #[arg(short, long)]
        data_dir: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            data_dir,
            symbol,
            output,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config, data_dir.as_deref(), &symbol)
            } else {
                run_backtest_command(&config, data_dir.as_deref(), &symbol, output.as_deref())
            }
        }
        Command::Validate { config } => run_validate(&config),
        Command::ListSymbols { data_dir } => run_list_symbols(&data_dir),
    }
}

fn fail(err: TradesimError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(fail)
}

/// Print the parsed custom program, or the failing line with a caret.
fn report_logic(spec: &StrategySpec) -> Result<(), ExitCode> {
    let StrategySpec::Custom { logic } = spec else {
        return Ok(());
    };
    match rule_parser::parse(logic) {
        Ok(program) => {
            eprintln!("\nStrategy logic (parsed):");
            for statement in &program.statements {
                eprintln!("  {}", statement);
            }
            let mut indicators: Vec<String> =
                program.indicators().iter().map(|i| i.to_string()).collect();
            indicators.sort();
            if !indicators.is_empty() {
                eprintln!("\nIndicators to compute:");
                for ind in &indicators {
                    eprintln!("  {}", ind);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!(
                "error: failed to parse [strategy] logic:\n{}",
                e.display_with_context(logic)
            );
            Err((&TradesimError::LogicParse(e)).into())
        }
    }
}

fn resolve_data_dir(override_dir: Option<&Path>, settings: &RunSettings) -> Result<PathBuf, TradesimError> {
    override_dir
        .map(Path::to_path_buf)
        .or_else(|| settings.data_dir.as_ref().map(PathBuf::from))
        .ok_or_else(|| TradesimError::ConfigMissing {
            section: "backtest".into(),
            key: "data_dir".into(),
        })
}

/// Command-line symbols, then configured symbols, then everything in the
/// data source.
pub fn resolve_symbols(
    overrides: &[String],
    settings: &RunSettings,
    data: &dyn DataPort,
) -> Result<Vec<String>, TradesimError> {
    let mut symbols = if !overrides.is_empty() {
        overrides.to_vec()
    } else if !settings.symbols.is_empty() {
        settings.symbols.clone()
    } else {
        data.list_symbols()?
    };
    symbols.dedup();
    if symbols.is_empty() {
        return Err(TradesimError::ConfigMissing {
            section: "backtest".into(),
            key: "symbols".into(),
        });
    }
    Ok(symbols)
}

/// Fetch bars for every symbol. Under [`FailurePolicy::Skip`] a failed
/// fetch is recorded instead of ending the run.
pub fn load_inputs(
    data: &dyn DataPort,
    symbols: &[String],
    policy: FailurePolicy,
) -> Result<(BTreeMap<String, Vec<Bar>>, Vec<SkippedSymbol>), TradesimError> {
    let mut inputs = BTreeMap::new();
    let mut skipped = Vec::new();
    for symbol in symbols {
        match data.fetch_bars(symbol) {
            Ok(bars) => {
                info!(symbol = %symbol, bars = bars.len(), "loaded bars");
                inputs.insert(symbol.clone(), bars);
            }
            Err(e) if policy == FailurePolicy::Skip => {
                warn!(symbol = %symbol, error = %e, "skipping symbol");
                skipped.push(SkippedSymbol {
                    symbol: symbol.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok((inputs, skipped))
}

/// Load data, run the backtest and write the report.
pub fn run_pipeline(
    settings: &RunSettings,
    symbols: &[String],
    data: &dyn DataPort,
    report_port: &dyn ReportPort,
    output: &str,
) -> Result<BacktestReport, TradesimError> {
    let benchmark = match &settings.benchmark {
        Some(symbol) => Some(bar_returns(&data.fetch_bars(symbol)?)),
        None => None,
    };

    let (inputs, fetch_skipped) =
        load_inputs(data, symbols, settings.backtest.failure_policy)?;

    let sink = TracingProgressSink;
    let ctx = RunContext {
        sink: &sink,
        benchmark: benchmark.as_deref(),
        cancel: None,
    };
    let mut report = run_backtest(&inputs, &settings.backtest, &ctx)?;

    let mut skipped = fetch_skipped;
    skipped.append(&mut report.skipped);
    report.skipped = skipped;

    report_port.write(&report, output)?;
    Ok(report)
}

fn fmt_opt(value: Option<f64>, scale: f64, suffix: &str) -> String {
    match value {
        Some(v) => format!("{:.2}{}", v * scale, suffix),
        None => "n/a".to_string(),
    }
}

pub fn print_summary(report: &BacktestReport) {
    let m = &report.portfolio.metrics;
    eprintln!("\n=== Portfolio Results ===");
    eprintln!("Total Profit:     {:.2}", m.total_profit);
    eprintln!("Total Trades:     {}", m.num_trades);
    eprintln!("Win Rate:         {}", fmt_opt(m.win_rate, 100.0, "%"));
    eprintln!("Avg Trade:        {}", fmt_opt(m.avg_trade_profit, 1.0, ""));
    eprintln!("Sharpe Ratio:     {}", fmt_opt(m.sharpe_ratio, 1.0, ""));
    eprintln!("Sortino Ratio:    {}", fmt_opt(m.sortino_ratio, 1.0, ""));
    eprintln!("Max Drawdown:     {:.2}", m.max_drawdown);
    eprintln!("Profit Factor:    {}", fmt_opt(m.profit_factor, 1.0, ""));

    if report.per_symbol.len() > 1 {
        eprintln!("\n=== Per-Symbol Summary ===");
        for (symbol, r) in &report.per_symbol {
            let pnl_sign = if r.metrics.total_profit >= 0.0 { "+" } else { "" };
            eprintln!(
                "  {}:  {} trades, {} win rate, {}{:.2}",
                symbol,
                r.metrics.num_trades,
                fmt_opt(r.metrics.win_rate, 100.0, "%"),
                pnl_sign,
                r.metrics.total_profit,
            );
        }
    }

    if !report.skipped.is_empty() {
        eprintln!("\n=== Skipped ===");
        for s in &report.skipped {
            eprintln!("  {}: {}", s.symbol, s.reason);
        }
    }
}

fn run_backtest_command(
    config_path: &Path,
    data_dir: Option<&Path>,
    symbol_overrides: &[String],
    output: Option<&str>,
) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let settings = match load_settings(&adapter) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    if let Err(code) = report_logic(&settings.backtest.strategy) {
        return code;
    }

    let data_dir = match resolve_data_dir(data_dir, &settings) {
        Ok(d) => d,
        Err(e) => return fail(e),
    };
    let data = CsvAdapter::new(data_dir);
    let symbols = match resolve_symbols(symbol_overrides, &settings, &data) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    eprintln!(
        "Running backtest: {} on {} symbol(s)",
        settings.backtest.strategy,
        symbols.len()
    );

    let output = output.unwrap_or("report.json");
    match run_pipeline(&settings, &symbols, &data, &JsonReportAdapter::new(), output) {
        Ok(report) => {
            print_summary(&report);
            if output != "-" {
                eprintln!("\nReport written to: {}", output);
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

pub fn run_dry_run(config_path: &Path, data_dir: Option<&Path>, symbol_overrides: &[String]) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let settings = match load_settings(&adapter) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    eprintln!("Config validated successfully");
    eprintln!("\nStrategy: {}", settings.backtest.strategy);
    if let Err(code) = report_logic(&settings.backtest.strategy) {
        return code;
    }

    let data_dir = match resolve_data_dir(data_dir, &settings) {
        Ok(d) => d,
        Err(e) => return fail(e),
    };
    let data = CsvAdapter::new(data_dir.clone());
    let symbols = match resolve_symbols(symbol_overrides, &settings, &data) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    eprintln!("\nUniverse:");
    eprintln!("  data_dir: {}", data_dir.display());
    eprintln!("  symbols: {}", symbols.join(", "));
    eprintln!("  failure_policy: {}", settings.backtest.failure_policy);

    eprintln!("\nDry run complete: configuration is valid");
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    eprintln!("Validating {}", config_path.display());

    let settings = match load_settings(&adapter) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    eprintln!("  Strategy: {}", settings.backtest.strategy);
    if let Err(code) = report_logic(&settings.backtest.strategy) {
        return code;
    }

    eprintln!("\nValidation passed");
    ExitCode::SUCCESS
}

fn run_list_symbols(data_dir: &Path) -> ExitCode {
    let adapter = CsvAdapter::new(data_dir.to_path_buf());
    match adapter.list_symbols() {
        Ok(symbols) => {
            if symbols.is_empty() {
                eprintln!("No symbols found in {}", data_dir.display());
            }
            for s in &symbols {
                println!("{}", s);
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}
