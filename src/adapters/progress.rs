//! Progress sink adapters.

use std::sync::mpsc::Sender;

use tracing::{debug, info};

use crate::ports::progress_port::{ProgressEvent, ProgressPayload, ProgressSink};

/// Forwards events over an `mpsc` channel, for streaming transports.
///
/// A disconnected receiver is ignored; the simulation keeps running.
pub struct ChannelProgressSink {
    tx: Sender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: &ProgressEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Logs events through `tracing`: trades at debug, snapshots at info.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn emit(&self, event: &ProgressEvent) {
        let pct = event.progress * 100.0;
        match &event.payload {
            ProgressPayload::Entry(buy) => {
                debug!(symbol = %event.symbol, pct, price = buy.entry_price, "entry")
            }
            ProgressPayload::Exit(sell) => debug!(
                symbol = %event.symbol,
                pct,
                price = sell.exit_price,
                net_profit = sell.net_profit,
                "exit"
            ),
            ProgressPayload::InterimSnapshot(s) => info!(
                symbol = %event.symbol,
                pct,
                equity = s.current_equity,
                trades = s.num_trades,
                "progress"
            ),
        }
    }
}
