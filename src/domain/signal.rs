//! Per-bar signals produced by a signal provider.

use serde::{Deserialize, Serialize};

use super::ohlcv::Bar;

/// Directional instruction attached to a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Signal {
    /// `+1`: enter long (no-op when already long).
    Long,
    /// `-1`: close an open long. Never opens a short.
    Exit,
    /// `0`
    #[default]
    Hold,
}

impl Signal {
    pub fn as_i8(self) -> i8 {
        match self {
            Signal::Long => 1,
            Signal::Exit => -1,
            Signal::Hold => 0,
        }
    }

    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            1 => Some(Signal::Long),
            -1 => Some(Signal::Exit),
            0 => Some(Signal::Hold),
            _ => None,
        }
    }
}

impl Serialize for Signal {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_i8())
    }
}

impl<'de> Deserialize<'de> for Signal {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i8::deserialize(deserializer)?;
        Signal::from_i8(raw)
            .ok_or_else(|| serde::de::Error::custom(format!("signal must be -1, 0 or 1, got {raw}")))
    }
}

/// Which indicator a chart reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Ema,
    Sma,
    Rsi,
    Macd,
}

/// A display-only indicator value, tagged with the kind of indicator that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorReading {
    pub kind: IndicatorKind,
    pub value: f64,
}

/// One bar together with the signal derived for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalBar {
    pub bar: Bar,
    pub signal: Signal,
    pub indicator: Option<IndicatorReading>,
}

impl SignalBar {
    pub fn new(bar: Bar, signal: Signal) -> Self {
        Self {
            bar,
            signal,
            indicator: None,
        }
    }

    pub fn with_indicator(mut self, reading: Option<IndicatorReading>) -> Self {
        self.indicator = reading;
        self
    }
}
