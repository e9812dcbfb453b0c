//! Price data access port.

use crate::domain::error::TradesimError;
use crate::domain::ohlcv::Bar;

pub trait DataPort {
    /// All bars for `symbol`, ascending by timestamp.
    fn fetch_bars(&self, symbol: &str) -> Result<Vec<Bar>, TradesimError>;

    fn list_symbols(&self) -> Result<Vec<String>, TradesimError>;
}
