#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::Mutex;
use tradesim::domain::error::TradesimError;
pub use tradesim::domain::ohlcv::Bar;
use tradesim::domain::signal::{Signal, SignalBar};
use tradesim::domain::strategy::{CustomLogic, SignalProvider};
use tradesim::ports::data_port::DataPort;
use tradesim::ports::progress_port::{ProgressEvent, ProgressSink};

pub fn day(n: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::days(n)
}

pub fn make_bar(n: i64, close: f64) -> Bar {
    Bar {
        timestamp: day(n),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000.0,
    }
}

/// Daily bars from 2024-01-01 with the given closes.
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| make_bar(i as i64, c))
        .collect()
}

/// Daily bars starting `offset` days after 2024-01-01.
pub fn bars_from_closes_at(offset: i64, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| make_bar(offset + i as i64, c))
        .collect()
}

pub fn signal_bars(closes: &[f64], signals: &[i8]) -> Vec<SignalBar> {
    bars_from_closes(closes)
        .into_iter()
        .zip(signals)
        .map(|(bar, &s)| SignalBar::new(bar, Signal::from_i8(s).unwrap()))
        .collect()
}

/// Replays a fixed signal sequence regardless of the bars.
pub struct ScriptedProvider {
    pub signals: Vec<Signal>,
}

impl ScriptedProvider {
    pub fn new(signals: &[i8]) -> Self {
        Self {
            signals: signals
                .iter()
                .map(|&s| Signal::from_i8(s).unwrap())
                .collect(),
        }
    }
}

impl SignalProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn produce_signals(&self, bars: &[Bar]) -> Result<Vec<SignalBar>, TradesimError> {
        Ok(bars
            .iter()
            .zip(&self.signals)
            .map(|(bar, &s)| SignalBar::new(bar.clone(), s))
            .collect())
    }
}

/// Runs [`THRESHOLD_LOGIC`] but errors on any series containing the
/// poison close.
pub struct FailingProvider {
    pub poison: f64,
    inner: CustomLogic,
}

impl FailingProvider {
    pub fn new(poison: f64) -> Self {
        Self {
            poison,
            inner: CustomLogic::parse(THRESHOLD_LOGIC).unwrap(),
        }
    }
}

impl SignalProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    fn produce_signals(&self, bars: &[Bar]) -> Result<Vec<SignalBar>, TradesimError> {
        if bars.iter().any(|b| b.close == self.poison) {
            return Err(TradesimError::Data {
                reason: "indicator backend unavailable".into(),
            });
        }
        self.inner.produce_signals(bars)
    }
}

/// Drops the last signal, breaking the one-signal-per-bar contract.
pub struct ShortProvider;

impl SignalProvider for ShortProvider {
    fn name(&self) -> &str {
        "short"
    }

    fn produce_signals(&self, bars: &[Bar]) -> Result<Vec<SignalBar>, TradesimError> {
        let mut signals: Vec<SignalBar> = bars
            .iter()
            .map(|b| SignalBar::new(b.clone(), Signal::Hold))
            .collect();
        signals.pop();
        Ok(signals)
    }
}

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(&self, symbol: &str) -> Result<Vec<Bar>, TradesimError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(TradesimError::Data {
                reason: reason.clone(),
            });
        }
        self.data
            .get(symbol)
            .cloned()
            .ok_or_else(|| TradesimError::Data {
                reason: format!("no data for {}", symbol),
            })
    }

    fn list_symbols(&self) -> Result<Vec<String>, TradesimError> {
        let mut symbols: Vec<String> = self
            .data
            .keys()
            .chain(self.errors.keys())
            .cloned()
            .collect();
        symbols.sort();
        Ok(symbols)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.payload.kind())
            .collect()
    }

    pub fn take(&self) -> Vec<ProgressEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub const THRESHOLD_LOGIC: &str = "IF close > 100 THEN BUY; IF close < 90 THEN SELL";
