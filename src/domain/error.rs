//! Domain error types.

/// A parse error with position information for custom-logic parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        // Multi-statement programs: show only the line containing the error.
        let line_start = input[..self.position.min(input.len())]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let line_end = input[line_start..]
            .find('\n')
            .map(|i| line_start + i)
            .unwrap_or(input.len());
        let line = &input[line_start..line_end];
        let caret = " ".repeat(self.position.saturating_sub(line_start)) + "^";
        format!("{line}\n{caret}\n{err}", err = self)
    }
}

/// Top-level error type for tradesim.
#[derive(Debug, thiserror::Error)]
pub enum TradesimError {
    #[error("no price data for {symbol}")]
    EmptyData { symbol: String },

    #[error("invalid bar {index} for {symbol}: {reason}")]
    InvalidBar {
        symbol: String,
        index: usize,
        reason: String,
    },

    #[error("bars for {symbol} are not strictly increasing at index {index}")]
    UnorderedBars { symbol: String, index: usize },

    #[error("invalid risk parameter {field}: {reason}")]
    InvalidRiskParams { field: String, reason: String },

    #[error("unsupported strategy '{name}'")]
    UnsupportedStrategy { name: String },

    #[error(transparent)]
    LogicParse(#[from] ParseError),

    #[error("strategy evaluation failed for {symbol}: {reason}")]
    StrategyEvaluation { symbol: String, reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TradesimError {
    /// True for errors caused by the request itself (bad bars, bad parameters,
    /// unknown or broken strategy) rather than by the environment.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TradesimError::EmptyData { .. }
                | TradesimError::InvalidBar { .. }
                | TradesimError::UnorderedBars { .. }
                | TradesimError::InvalidRiskParams { .. }
                | TradesimError::UnsupportedStrategy { .. }
                | TradesimError::LogicParse(_)
                | TradesimError::StrategyEvaluation { .. }
        )
    }
}

impl From<&TradesimError> for std::process::ExitCode {
    fn from(err: &TradesimError) -> Self {
        let code: u8 = match err {
            TradesimError::Io(_) => 1,
            TradesimError::ConfigParse { .. }
            | TradesimError::ConfigMissing { .. }
            | TradesimError::ConfigInvalid { .. } => 2,
            TradesimError::Data { .. } => 3,
            TradesimError::UnsupportedStrategy { .. }
            | TradesimError::LogicParse(_)
            | TradesimError::StrategyEvaluation { .. } => 4,
            TradesimError::EmptyData { .. }
            | TradesimError::InvalidBar { .. }
            | TradesimError::UnorderedBars { .. }
            | TradesimError::InvalidRiskParams { .. } => 5,
            TradesimError::Report { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
