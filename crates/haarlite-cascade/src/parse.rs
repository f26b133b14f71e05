//! Loader for the textual cascade description format.
//!
//! The format is a small s-expression grammar produced by an offline
//! converter from floating-point trained cascades:
//!
//! ```text
//! cascade := (hcsb WIDTH HEIGHT STAGE_COUNT stage* )
//! stage   := (hcs STUMP_COUNT stump* THRESHOLD)
//! stump   := (hwcs feature THRESHOLD BELOW ABOVE)
//! feature := (hf rect rect rect TILTED)
//! rect    := (hr X Y WIDTH HEIGHT WEIGHT)
//! ```
//!
//! Every character other than a digit, `-`, `(` or `)` separates tokens,
//! so whitespace, commas and stray words are all accepted between
//! values. A keyword must follow its `(` immediately. Content after the
//! closing `)` of the cascade is ignored.

use std::iter::Peekable;
use std::str::{Chars, FromStr};

use crate::cascade::Cascade;
use crate::classifier::{StageClassifier, Stump};
use crate::feature::{HaarFeature, HaarRect};
use crate::types::{CascadeError, Dimensions, FormatError};

/// Parse a cascade description.
///
/// # Errors
///
/// Returns [`CascadeError::Format`] if the text does not follow the
/// grammar, ends early, contains integers outside the 32-bit range,
/// declares a non-positive window, uses tilted features, or places a
/// rectangle outside the window.
pub fn parse(text: &str) -> Result<Cascade, CascadeError> {
    let mut parser = Parser {
        lexer: Lexer::new(text),
    };
    let (window, stages) = parser.cascade()?;
    log::debug!("parsed cascade description: window {window}, {} stages", stages.len());
    Cascade::new(window, stages)
}

impl FromStr for Cascade {
    type Err = CascadeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        parse(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    line: usize,
    column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// `(` together with the keyword that follows it.
    Open(String),
    Close,
    Int(i32),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Open(keyword) => format!("({keyword}"),
            Self::Close => ")".to_string(),
            Self::Int(value) => value.to_string(),
        }
    }
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    const fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    /// Next token and where it starts, or `None` at end of input.
    fn next_token(&mut self) -> Result<Option<(Token, Position)>, FormatError> {
        while self
            .chars
            .peek()
            .is_some_and(|&c| !(c.is_ascii_digit() || matches!(c, '-' | '(' | ')')))
        {
            self.bump();
        }

        let start = self.position();
        let Some(c) = self.bump() else {
            return Ok(None);
        };

        let token = match c {
            '(' => {
                let mut keyword = String::new();
                while let Some(&c) = self.chars.peek().filter(|c| c.is_ascii_alphabetic()) {
                    keyword.push(c);
                    self.bump();
                }
                Token::Open(keyword)
            }
            ')' => Token::Close,
            _ => Token::Int(self.integer(c, start)?),
        };
        Ok(Some((token, start)))
    }

    fn integer(&mut self, first: char, start: Position) -> Result<i32, FormatError> {
        let mut digits = String::from(first);
        while let Some(&c) = self.chars.peek().filter(|c| c.is_ascii_digit()) {
            digits.push(c);
            self.bump();
        }
        if digits == "-" {
            return Err(FormatError::Unexpected {
                expected: "integer".to_string(),
                found: digits,
                line: start.line,
                column: start.column,
            });
        }

        let (negative, magnitude) = digits
            .strip_prefix('-')
            .map_or((false, digits.as_str()), |rest| (true, rest));
        let value = magnitude
            .bytes()
            .try_fold(0i64, |acc, b| {
                acc.checked_mul(10)?.checked_add(i64::from(b - b'0'))
            })
            .map(|v| if negative { -v } else { v })
            .and_then(|v| i32::try_from(v).ok());

        value.ok_or(FormatError::IntegerOverflow {
            token: digits,
            line: start.line,
            column: start.column,
        })
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl Parser<'_> {
    fn advance(&mut self, expected: &str) -> Result<(Token, Position), FormatError> {
        self.lexer
            .next_token()?
            .ok_or_else(|| FormatError::UnexpectedEnd {
                expected: expected.to_string(),
            })
    }

    fn open(&mut self, keyword: &str) -> Result<Position, FormatError> {
        let expected = format!("({keyword}");
        match self.advance(&expected)? {
            (Token::Open(found), position) if found == keyword => Ok(position),
            (token, position) => Err(unexpected(&expected, &token, position)),
        }
    }

    fn close(&mut self) -> Result<(), FormatError> {
        match self.advance(")")? {
            (Token::Close, _) => Ok(()),
            (token, position) => Err(unexpected(")", &token, position)),
        }
    }

    fn int(&mut self, what: &str) -> Result<(i32, Position), FormatError> {
        match self.advance(what)? {
            (Token::Int(value), position) => Ok((value, position)),
            (token, position) => Err(unexpected(what, &token, position)),
        }
    }

    /// An integer that must be `>= min`.
    fn at_least(&mut self, what: &str, min: i32) -> Result<u32, FormatError> {
        let (value, position) = self.int(what)?;
        if value < min {
            return Err(invalid(format!("{what} must be at least {min}, got {value}"), position));
        }
        Ok(value.unsigned_abs())
    }

    fn cascade(&mut self) -> Result<(Dimensions, Vec<StageClassifier>), FormatError> {
        self.open("hcsb")?;
        let width = self.at_least("window width", 1)?;
        let height = self.at_least("window height", 1)?;
        let stage_count = self.at_least("stage count", 0)?;
        let window = Dimensions::new(width, height);

        // Counts are untrusted; grow as stages actually arrive.
        let mut stages = Vec::new();
        for _ in 0..stage_count {
            stages.push(self.stage(window)?);
        }
        self.close()?;
        Ok((window, stages))
    }

    fn stage(&mut self, window: Dimensions) -> Result<StageClassifier, FormatError> {
        self.open("hcs")?;
        let stump_count = self.at_least("stump count", 0)?;
        let mut stumps = Vec::new();
        for _ in 0..stump_count {
            stumps.push(self.stump(window)?);
        }
        let (threshold, _) = self.int("stage threshold")?;
        self.close()?;
        Ok(StageClassifier::new(stumps, threshold))
    }

    fn stump(&mut self, window: Dimensions) -> Result<Stump, FormatError> {
        self.open("hwcs")?;
        let feature = self.feature(window)?;
        let (threshold, _) = self.int("stump threshold")?;
        let (below, _) = self.int("stump output a")?;
        let (above, _) = self.int("stump output b")?;
        self.close()?;
        Ok(Stump::new(feature, threshold, below, above, window))
    }

    fn feature(&mut self, window: Dimensions) -> Result<HaarFeature, FormatError> {
        self.open("hf")?;
        let rects = [self.rect(window)?, self.rect(window)?, self.rect(window)?];
        let (tilted, position) = self.int("tilted flag")?;
        if tilted != 0 {
            return Err(invalid("tilted features are not supported".to_string(), position));
        }
        self.close()?;
        Ok(HaarFeature::new(rects))
    }

    fn rect(&mut self, window: Dimensions) -> Result<HaarRect, FormatError> {
        let position = self.open("hr")?;
        let x = self.at_least("rectangle x", 0)?;
        let y = self.at_least("rectangle y", 0)?;
        let width = self.at_least("rectangle width", 0)?;
        let height = self.at_least("rectangle height", 0)?;
        let (weight, _) = self.int("rectangle weight")?;
        self.close()?;

        let rect = HaarRect::new(x, y, width, height, weight);
        if !rect.fits(window) {
            return Err(invalid(
                format!(
                    "rectangle {width}x{height} at ({x}, {y}) lies outside the {window} window"
                ),
                position,
            ));
        }
        Ok(rect)
    }
}

fn unexpected(expected: &str, found: &Token, position: Position) -> FormatError {
    FormatError::Unexpected {
        expected: expected.to_string(),
        found: found.describe(),
        line: position.line,
        column: position.column,
    }
}

fn invalid(message: String, position: Position) -> FormatError {
    FormatError::Invalid {
        message,
        line: position.line,
        column: position.column,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cascade::CascadeStructure;

    const NONE: &str = "(hr 0 0 0 0 0)";

    fn single_stage() -> String {
        format!("(hcsb 4 4 1 (hcs 1 (hwcs (hf {NONE} {NONE} {NONE} 0) 0 -1 1) 0))")
    }

    fn format_error(text: &str) -> FormatError {
        let CascadeError::Format(err) = parse(text).unwrap_err() else {
            unreachable!("expected a format error for {text:?}");
        };
        err
    }

    #[test]
    fn parses_single_stage() {
        let cascade = parse(&single_stage()).unwrap();
        assert_eq!(cascade.window(), Dimensions::new(4, 4));
        assert_eq!(cascade.structure(), &CascadeStructure::StumpBase);
        assert_eq!(cascade.stages().len(), 1);
        let stump = &cascade.stages()[0].stumps()[0];
        assert_eq!((stump.threshold(), stump.below(), stump.above()), (0, -1, 1));
        assert_eq!(stump.window(), Dimensions::new(4, 4));
    }

    #[test]
    fn parses_values_and_signs() {
        let text = "(hcsb 24 24 1
            (hcs 2
                (hwcs (hf (hr 0 0 12 24 -1) (hr 12 0 12 24 2) (hr 0 0 0 0 0) 0) -129 -7 42)
                (hwcs (hf (hr 3 4 5 6 1) (hr 0 0 0 0 0) (hr 0 0 0 0 0) 0) 2147483647 1 -2147483648)
                -3))";
        let cascade = parse(text).unwrap();
        let stage = &cascade.stages()[0];
        assert_eq!(stage.threshold(), -3);
        let first = &stage.stumps()[0];
        assert_eq!(first.feature().rects()[0], HaarRect::new(0, 0, 12, 24, -1));
        assert_eq!(first.feature().rects()[1], HaarRect::new(12, 0, 12, 24, 2));
        assert_eq!((first.threshold(), first.below(), first.above()), (-129, -7, 42));
        let second = &stage.stumps()[1];
        assert_eq!(second.threshold(), i32::MAX);
        assert_eq!(second.above(), i32::MIN);
    }

    #[test]
    fn non_numeric_characters_separate_tokens() {
        let text = format!(
            "(hcsb,4;4 1\t(hcs 1 (hwcs (hf {NONE} {NONE} {NONE} 0) x0 a-1 b1) stage 0))"
        );
        assert_eq!(parse(&text).unwrap(), parse(&single_stage()).unwrap());
    }

    #[test]
    fn trailing_content_is_ignored() {
        let text = format!("{} trailing (garbage", single_stage());
        assert!(parse(&text).is_ok());
    }

    #[test]
    fn from_str_matches_parse() {
        let cascade: Cascade = single_stage().parse().unwrap();
        assert_eq!(cascade, parse(&single_stage()).unwrap());
    }

    #[test]
    fn missing_cascade_close_names_paren() {
        let text = format!("(hcsb 4 4 1 (hcs 1 (hwcs (hf {NONE} {NONE} {NONE} 0) 0 -1 1) 0)");
        assert_eq!(
            format_error(&text),
            FormatError::UnexpectedEnd {
                expected: ")".to_string(),
            },
        );
    }

    #[test]
    fn extra_stage_where_close_expected() {
        // Declares one stage but supplies two.
        let stage = format!("(hcs 1 (hwcs (hf {NONE} {NONE} {NONE} 0) 0 -1 1) 0)");
        let text = format!("(hcsb 4 4 1 {stage} {stage})");
        assert!(matches!(
            format_error(&text),
            FormatError::Unexpected { expected, found, .. } if expected == ")" && found == "(hcs"
        ));
    }

    #[test]
    fn wrong_keyword_reports_position() {
        let err = format_error("(hcsb 4 4 1\n  (hwcs 0))");
        assert_eq!(
            err,
            FormatError::Unexpected {
                expected: "(hcs".to_string(),
                found: "(hwcs".to_string(),
                line: 2,
                column: 3,
            },
        );
    }

    #[test]
    fn empty_input_is_unexpected_end() {
        assert_eq!(
            format_error("   "),
            FormatError::UnexpectedEnd {
                expected: "(hcsb".to_string(),
            },
        );
    }

    #[test]
    fn integer_overflow() {
        assert!(matches!(
            format_error("(hcsb 2147483648 4 0)"),
            FormatError::IntegerOverflow { token, line: 1, column: 7 } if token == "2147483648"
        ));
        assert!(matches!(
            format_error("(hcsb 99999999999999999999999 4 0)"),
            FormatError::IntegerOverflow { .. }
        ));
    }

    #[test]
    fn lone_minus_is_rejected() {
        assert!(matches!(
            format_error("(hcsb - 4 0)"),
            FormatError::Unexpected { expected, found, .. } if expected == "integer" && found == "-"
        ));
    }

    #[test]
    fn non_positive_window_is_invalid() {
        assert!(matches!(format_error("(hcsb 0 4 0)"), FormatError::Invalid { .. }));
        assert!(matches!(format_error("(hcsb 4 -4 0)"), FormatError::Invalid { .. }));
        assert!(matches!(format_error("(hcsb 4 4 -1)"), FormatError::Invalid { .. }));
    }

    #[test]
    fn tilted_feature_is_invalid() {
        let text = format!("(hcsb 4 4 1 (hcs 1 (hwcs (hf {NONE} {NONE} {NONE} 1) 0 -1 1) 0))");
        assert!(matches!(
            format_error(&text),
            FormatError::Invalid { message, .. } if message.contains("tilted")
        ));
    }

    #[test]
    fn rect_outside_window_is_invalid() {
        let text =
            format!("(hcsb 4 4 1 (hcs 1 (hwcs (hf (hr 2 0 3 1 1) {NONE} {NONE} 0) 0 -1 1) 0))");
        assert!(matches!(
            format_error(&text),
            FormatError::Invalid { line: 1, column: 30, .. }
        ));
    }

    #[test]
    fn huge_counts_fail_without_allocating() {
        assert_eq!(
            format_error("(hcsb 4 4 2147483647"),
            FormatError::UnexpectedEnd {
                expected: "(hcs".to_string(),
            },
        );
    }

    #[test]
    fn zero_stage_cascade() {
        let cascade = parse("(hcsb 24 24 0)").unwrap();
        assert!(cascade.stages().is_empty());
    }
}
