//! Custom-logic parser.
//!
//! Recursive descent parser for the infix logic grammar:
//!
//! ```text
//! program    := statement ((NEWLINE | ';') statement)*
//! statement  := "IF" expr "THEN" ("BUY" | "SELL") | expr
//! expr       := and_expr ("OR" and_expr)*
//! and_expr   := unary ("AND" unary)*
//! unary      := "NOT" unary | "(" expr ")" | comparison
//! comparison := operand op operand
//! op         := < | <= | > | >= | == | != | crosses above | crosses below
//! ```
//!
//! Keywords and identifiers are case-insensitive. Errors carry the character
//! offset of the offending token.

use crate::domain::error::ParseError;
use crate::domain::indicator::IndicatorType;
use crate::domain::indicator::macd::{DEFAULT_FAST, DEFAULT_SIGNAL, DEFAULT_SLOW};
use crate::domain::rule::{
    Action, CompareOp, IndicatorField, IndicatorRef, LogicProgram, Operand, Rule, Statement,
};

pub const DEFAULT_RSI_PERIOD: usize = 14;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            message,
            position: self.pos,
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        let Some(head) = remaining.get(..keyword.len()) else {
            return false;
        };
        head.eq_ignore_ascii_case(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            let found = self.peek_word();
            Err(self.error(format!("expected '{}', found '{}'", keyword, found)))
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn word_len(&self) -> usize {
        self.remaining()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .map(char::len_utf8)
            .sum()
    }

    fn peek_word(&self) -> String {
        let len = self.word_len();
        if len == 0 {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            self.remaining()[..len].to_string()
        }
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_period(&self, word: &str, prefix: &str, start: usize) -> Result<usize, ParseError> {
        let digits = &word[prefix.len()..];
        match digits.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ParseError {
                message: format!("invalid period in '{}'", word),
                position: start,
            }),
        }
    }

    fn parse_identifier(&mut self) -> Result<Operand, ParseError> {
        let start = self.pos;
        let len = self.word_len();
        if len == 0 {
            let found = self.peek_word();
            return Err(self.error(format!("expected operand, found '{}'", found)));
        }
        let word = self.remaining()[..len].to_ascii_lowercase();

        let indicator = |indicator_type, field| Operand::Indicator(IndicatorRef { indicator_type, field });
        let default_macd = IndicatorType::Macd {
            fast: DEFAULT_FAST,
            slow: DEFAULT_SLOW,
            signal: DEFAULT_SIGNAL,
        };

        let operand = match word.as_str() {
            "open" => Operand::Open,
            "high" => Operand::High,
            "low" => Operand::Low,
            "close" => Operand::Close,
            "volume" => Operand::Volume,
            "rsi" => indicator(IndicatorType::Rsi(DEFAULT_RSI_PERIOD), IndicatorField::Value),
            "macd" => indicator(default_macd, IndicatorField::MacdLine),
            "macd_signal" => indicator(default_macd, IndicatorField::MacdSignal),
            "macd_hist" | "macd_histogram" => indicator(default_macd, IndicatorField::MacdHistogram),
            w if w.starts_with("ema_") => indicator(
                IndicatorType::Ema(self.parse_period(w, "ema_", start)?),
                IndicatorField::Value,
            ),
            w if w.starts_with("sma_") => indicator(
                IndicatorType::Sma(self.parse_period(w, "sma_", start)?),
                IndicatorField::Value,
            ),
            w if w.starts_with("rsi_") => indicator(
                IndicatorType::Rsi(self.parse_period(w, "rsi_", start)?),
                IndicatorField::Value,
            ),
            _ => {
                return Err(ParseError {
                    message: format!("unknown operand '{}'", &self.remaining()[..len]),
                    position: start,
                });
            }
        };

        self.pos += len;
        Ok(operand)
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();

        let rest = self.remaining();
        let starts_number = match rest.chars().next() {
            Some(ch) if ch.is_ascii_digit() || ch == '.' => true,
            Some('-') => rest[1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit() || c == '.'),
            _ => false,
        };

        if starts_number {
            return Ok(Operand::Constant(self.parse_number()?));
        }
        self.parse_identifier()
    }

    fn parse_compare_op(&mut self) -> Result<CompareOp, ParseError> {
        self.skip_whitespace();
        let rest = self.remaining();

        for (token, op) in [
            ("<=", CompareOp::Le),
            (">=", CompareOp::Ge),
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
        ] {
            if rest.starts_with(token) {
                self.pos += token.len();
                return Ok(op);
            }
        }

        if self.peek_keyword("crosses") {
            self.pos += "crosses".len();
            if self.consume_keyword("above") {
                return Ok(CompareOp::CrossesAbove);
            }
            if self.consume_keyword("below") {
                return Ok(CompareOp::CrossesBelow);
            }
            let found = self.peek_word();
            return Err(self.error(format!("expected 'above' or 'below', found '{}'", found)));
        }

        let found = self.peek_word();
        Err(self.error(format!("expected comparison operator, found '{}'", found)))
    }

    fn parse_comparison(&mut self) -> Result<Rule, ParseError> {
        let left = self.parse_operand()?;
        let op = self.parse_compare_op()?;
        let right = self.parse_operand()?;
        Ok(Rule::Compare { left, op, right })
    }

    fn parse_unary(&mut self) -> Result<Rule, ParseError> {
        self.skip_whitespace();

        if self.consume_keyword("NOT") {
            let inner = self.parse_unary()?;
            return Ok(Rule::Not(Box::new(inner)));
        }

        if self.peek() == Some('(') {
            self.advance();
            let inner = self.parse_expr()?;
            self.expect_char(')')?;
            return Ok(inner);
        }

        self.parse_comparison()
    }

    fn parse_and(&mut self) -> Result<Rule, ParseError> {
        let mut rules = vec![self.parse_unary()?];
        while self.consume_keyword("AND") {
            rules.push(self.parse_unary()?);
        }
        Ok(if rules.len() == 1 {
            rules.remove(0)
        } else {
            Rule::And(rules)
        })
    }

    fn parse_expr(&mut self) -> Result<Rule, ParseError> {
        let mut rules = vec![self.parse_and()?];
        while self.consume_keyword("OR") {
            rules.push(self.parse_and()?);
        }
        Ok(if rules.len() == 1 {
            rules.remove(0)
        } else {
            Rule::Or(rules)
        })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        if self.consume_keyword("IF") {
            let rule = self.parse_expr()?;
            self.expect_keyword("THEN")?;
            let action = if self.consume_keyword("BUY") {
                Action::Buy
            } else if self.consume_keyword("SELL") {
                Action::Sell
            } else {
                let found = self.peek_word();
                return Err(self.error(format!("expected 'BUY' or 'SELL', found '{}'", found)));
            };
            return Ok(Statement { rule, action });
        }

        // Bare condition: a lone "crosses below" reads as an exit, anything
        // else as an entry.
        let rule = self.parse_expr()?;
        let action = match rule {
            Rule::Compare {
                op: CompareOp::CrossesBelow,
                ..
            } => Action::Sell,
            _ => Action::Buy,
        };
        Ok(Statement { rule, action })
    }

    fn parse(&mut self) -> Result<LogicProgram, ParseError> {
        let mut statements = Vec::new();

        loop {
            self.skip_whitespace();
            while self.peek() == Some(';') {
                self.advance();
                self.skip_whitespace();
            }
            if self.pos >= self.input.len() {
                break;
            }
            statements.push(self.parse_statement()?);

            self.skip_whitespace();
            match self.peek() {
                None | Some(';') => {}
                Some(_) if self.statement_boundary_before() => {}
                Some(_) => {
                    return Err(self.error(format!(
                        "unexpected input after statement: '{}'",
                        self.peek_word()
                    )));
                }
            }
        }

        if statements.is_empty() {
            return Err(ParseError {
                message: "empty logic program".to_string(),
                position: 0,
            });
        }

        Ok(LogicProgram { statements })
    }

    /// True when a newline separates the previous token from the current one.
    fn statement_boundary_before(&self) -> bool {
        self.input[..self.pos]
            .chars()
            .rev()
            .take_while(|c| c.is_whitespace())
            .any(|c| c == '\n')
    }
}

/// Parse a custom-logic program.
pub fn parse(input: &str) -> Result<LogicProgram, ParseError> {
    let mut parser = Parser::new(input);
    parser.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(input: &str) -> Statement {
        let program = parse(input).unwrap();
        assert_eq!(program.statements.len(), 1);
        program.statements.into_iter().next().unwrap()
    }

    #[test]
    fn parse_if_then_buy() {
        let stmt = single("IF close > EMA_20 THEN BUY");
        assert_eq!(stmt.action, Action::Buy);
        assert_eq!(
            stmt.rule,
            Rule::Compare {
                left: Operand::Close,
                op: CompareOp::Gt,
                right: Operand::Indicator(IndicatorRef {
                    indicator_type: IndicatorType::Ema(20),
                    field: IndicatorField::Value,
                }),
            }
        );
    }

    #[test]
    fn parse_bare_condition_is_buy() {
        let stmt = single("rsi < 30");
        assert_eq!(stmt.action, Action::Buy);
        assert!(matches!(
            stmt.rule,
            Rule::Compare {
                op: CompareOp::Lt,
                right: Operand::Constant(30.0),
                ..
            }
        ));
    }

    #[test]
    fn parse_bare_crosses_below_is_sell() {
        let stmt = single("rsi crosses below 70");
        assert_eq!(stmt.action, Action::Sell);
    }

    #[test]
    fn parse_case_insensitive_keywords() {
        let stmt = single("if Close >= 10 and volume != 0 then sell");
        assert_eq!(stmt.action, Action::Sell);
        assert!(matches!(stmt.rule, Rule::And(ref r) if r.len() == 2));
    }

    #[test]
    fn parse_and_binds_tighter_than_or() {
        let stmt = single("IF close > 1 OR close < 2 AND volume > 3 THEN BUY");
        match stmt.rule {
            Rule::Or(rules) => {
                assert_eq!(rules.len(), 2);
                assert!(matches!(rules[1], Rule::And(_)));
            }
            other => panic!("expected OR, got {:?}", other),
        }
    }

    #[test]
    fn parse_parentheses_and_not() {
        let stmt = single("IF NOT (close > 1 OR close < 0) THEN BUY");
        match stmt.rule {
            Rule::Not(inner) => assert!(matches!(*inner, Rule::Or(_))),
            other => panic!("expected NOT, got {:?}", other),
        }
    }

    #[test]
    fn parse_macd_fields() {
        let stmt = single("IF MACD crosses above MACD_SIGNAL THEN BUY");
        match stmt.rule {
            Rule::Compare {
                left: Operand::Indicator(l),
                op: CompareOp::CrossesAbove,
                right: Operand::Indicator(r),
            } => {
                assert_eq!(l.field, IndicatorField::MacdLine);
                assert_eq!(r.field, IndicatorField::MacdSignal);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_multiple_lines_and_semicolons() {
        let program =
            parse("IF close > EMA_20 THEN BUY\n\nIF close < EMA_20 THEN SELL; rsi_7 > 80").unwrap();
        assert_eq!(program.statements.len(), 3);
        assert_eq!(program.statements[1].action, Action::Sell);
        assert_eq!(
            program.indicators(),
            vec![IndicatorType::Ema(20), IndicatorType::Rsi(7)]
        );
    }

    #[test]
    fn parse_negative_constant() {
        let stmt = single("MACD_HIST > -0.5");
        assert!(matches!(
            stmt.rule,
            Rule::Compare {
                right: Operand::Constant(v),
                ..
            } if (v + 0.5).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn error_unknown_operand_has_position() {
        let err = parse("IF close > FOO THEN BUY").unwrap_err();
        assert_eq!(err.position, 11);
        assert!(err.message.contains("FOO"));
    }

    #[test]
    fn error_missing_then() {
        let err = parse("IF close > 1 BUY").unwrap_err();
        assert!(err.message.contains("THEN"));
        assert_eq!(err.position, 13);
    }

    #[test]
    fn error_missing_operator() {
        let err = parse("close 5").unwrap_err();
        assert!(err.message.contains("comparison operator"));
    }

    #[test]
    fn error_bad_period() {
        let err = parse("EMA_x > 1").unwrap_err();
        assert!(err.message.contains("invalid period"));
        assert_eq!(err.position, 0);
    }

    #[test]
    fn error_trailing_garbage_on_same_line() {
        let err = parse("close > 1 close").unwrap_err();
        assert!(err.message.contains("unexpected input"));
    }

    #[test]
    fn error_empty_program() {
        assert!(parse("   \n ; ").is_err());
    }

    #[test]
    fn error_unclosed_paren() {
        let err = parse("IF (close > 1 THEN BUY").unwrap_err();
        assert!(err.message.contains("')'"));
    }
}
