//! Progress reporting port.
//!
//! Sinks observe a running simulation. They never influence its output.

use serde::Serialize;

use crate::domain::backtest::InterimSnapshot;
use crate::domain::simulator::{BuyRecord, SellRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ProgressPayload {
    Entry(BuyRecord),
    Exit(SellRecord),
    InterimSnapshot(InterimSnapshot),
}

impl ProgressPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressPayload::Entry(_) => "entry",
            ProgressPayload::Exit(_) => "exit",
            ProgressPayload::InterimSnapshot(_) => "interim_snapshot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub symbol: String,
    /// Fraction of bars processed, in `[0, 1]`.
    pub progress: f64,
    #[serde(flatten)]
    pub payload: ProgressPayload,
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: &ProgressEvent) {}
}
