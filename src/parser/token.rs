// src/parser/token.rs
//! Source positions and lexical tokens of the rule language

use serde::{Deserialize, Serialize};
use std::fmt;

/// A location in the source text.
///
/// `index` is a UTF-8 byte offset, `line` and `column` are 1-based and
/// count code points. A position with `line == 0` means "no position".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub index: usize,
    pub line: u32,
    pub column: u32,
}

impl Pos {
    /// The invalid position.
    pub const NONE: Pos = Pos {
        index: 0,
        line: 0,
        column: 0,
    };

    pub const fn new(index: usize, line: u32, column: u32) -> Self {
        Self {
            index,
            line,
            column,
        }
    }

    pub const fn is_valid(&self) -> bool {
        self.line > 0
    }

    /// Returns the position `n` columns to the right on the same line.
    ///
    /// Columns saturate at `u32::MAX`.
    #[must_use]
    pub fn add_column(self, n: usize) -> Self {
        Self {
            index: self.index + n,
            line: self.line,
            column: self.column.saturating_add(saturating_u32(n)),
        }
    }

    /// Returns the position just past `text` when it starts here.
    ///
    /// `text` must not span lines.
    #[must_use]
    pub fn add_str(self, text: &str) -> Self {
        Self {
            index: self.index + text.len(),
            line: self.line,
            column: self.column.saturating_add(saturating_u32(text.chars().count())),
        }
    }

    /// Returns the start of the line `n` lines below.
    ///
    /// Lines saturate at `u32::MAX`.
    #[must_use]
    pub fn add_line(self, n: usize) -> Self {
        Self {
            index: self.index + n,
            line: self.line.saturating_add(saturating_u32(n)),
            column: 1,
        }
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("-");
        }
        if self.column == 0 {
            return write!(f, "{}", self.line);
        }
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Illegal,
    Eof,
    Comment,

    // Identifiers and literals
    Ident,
    Number,
    String,

    // Keywords
    Between,
    And,
    Or,
    In,
    Matches,
    Now,
    Hours,
    Days,
    With,
    Threshold,
    True,
    False,
    Rules,

    // Punctuation
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Equal,
    LessThan,
    GreaterThan,
    LessEqual,
    GreaterEqual,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl TokenKind {
    /// Maps a scanned word to its keyword kind, or `Ident`.
    pub fn lookup_ident(word: &str) -> TokenKind {
        match word {
            "between" => TokenKind::Between,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "in" => TokenKind::In,
            "matches" => TokenKind::Matches,
            "now" => TokenKind::Now,
            "hours" => TokenKind::Hours,
            "days" => TokenKind::Days,
            "with" => TokenKind::With,
            "threshold" => TokenKind::Threshold,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "Rules" => TokenKind::Rules,
            _ => TokenKind::Ident,
        }
    }

    /// Whether a token of this kind opens an expression.
    pub fn is_expression_start(self) -> bool {
        matches!(
            self,
            TokenKind::Between
                | TokenKind::In
                | TokenKind::Matches
                | TokenKind::Equal
                | TokenKind::GreaterThan
                | TokenKind::LessThan
                | TokenKind::GreaterEqual
                | TokenKind::LessEqual
        )
    }

    /// Whether a token of this kind can start a rule parameter.
    pub fn is_parameter_acceptable(self) -> bool {
        matches!(
            self,
            TokenKind::Number | TokenKind::String | TokenKind::True | TokenKind::False | TokenKind::Now
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Illegal => "ILLEGAL",
            TokenKind::Eof => "EOF",
            TokenKind::Comment => "COMMENT",
            TokenKind::Ident => "IDENT",
            TokenKind::Number => "NUMBER",
            TokenKind::String => "STRING",
            TokenKind::Between => "between",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::In => "in",
            TokenKind::Matches => "matches",
            TokenKind::Now => "now()",
            TokenKind::Hours => "hours",
            TokenKind::Days => "days",
            TokenKind::With => "with",
            TokenKind::Threshold => "threshold",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Rules => "Rules",
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::LeftBracket => "[",
            TokenKind::RightBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Equal => "=",
            TokenKind::LessThan => "<",
            TokenKind::GreaterThan => ">",
            TokenKind::LessEqual => "<=",
            TokenKind::GreaterEqual => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Multiply => "*",
            TokenKind::Divide => "/",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scanned token with its raw text and span.
///
/// For `Illegal` tokens `text` is the scan diagnostic, not source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: Pos,
    pub end: Pos,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, start: Pos, end: Pos) -> Self {
        Self {
            kind,
            text: text.into(),
            start,
            end,
        }
    }

    /// True for the token that ends a stream (`EOF` or `ILLEGAL`).
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, TokenKind::Eof | TokenKind::Illegal)
    }

    /// Text used when an error has to name this token literally.
    pub(crate) fn literal(&self) -> &str {
        if self.text.is_empty() {
            self.kind.as_str()
        } else {
            &self.text
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pos_display() {
        assert_eq!(Pos::NONE.to_string(), "-");
        assert_eq!(Pos::new(0, 3, 0).to_string(), "3");
        assert_eq!(Pos::new(12, 2, 5).to_string(), "2:5");
    }

    #[test]
    fn test_pos_arithmetic() {
        let pos = Pos::new(10, 2, 4);

        assert_eq!(pos.add_column(3), Pos::new(13, 2, 7));
        assert_eq!(pos.add_line(1), Pos::new(11, 3, 1));
        assert_eq!(pos.add_str("ab"), Pos::new(12, 2, 6));
        // index counts bytes, column counts code points
        assert_eq!(pos.add_str("é"), Pos::new(12, 2, 5));
        // the receiver is untouched
        assert_eq!(pos, Pos::new(10, 2, 4));
        assert!(!Pos::default().is_valid());
    }

    #[test]
    fn test_pos_saturates() {
        let pos = Pos::new(0, u32::MAX - 1, u32::MAX - 2);

        assert_eq!(pos.add_column(5).column, u32::MAX);
        assert_eq!(pos.add_str("abcdef").column, u32::MAX);
        assert_eq!(pos.add_line(3).line, u32::MAX);
        assert_eq!(Pos::new(0, 1, 1).add_column(usize::MAX - 1).column, u32::MAX);
    }

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(TokenKind::lookup_ident("Rules"), TokenKind::Rules);
        assert_eq!(TokenKind::lookup_ident("rules"), TokenKind::Ident);
        assert_eq!(TokenKind::lookup_ident("threshold"), TokenKind::Threshold);
        assert_eq!(TokenKind::lookup_ident("IsUnique"), TokenKind::Ident);
    }

    #[test]
    fn test_token_classes() {
        for kind in [TokenKind::Between, TokenKind::In, TokenKind::Matches, TokenKind::LessEqual] {
            assert!(kind.is_expression_start(), "{kind}");
        }
        assert!(!TokenKind::With.is_expression_start());

        for kind in [TokenKind::Number, TokenKind::String, TokenKind::True, TokenKind::Now] {
            assert!(kind.is_parameter_acceptable(), "{kind}");
        }
        assert!(!TokenKind::Ident.is_parameter_acceptable());
        assert!(!TokenKind::Days.is_parameter_acceptable());
    }

    #[test]
    fn test_token_literal() {
        let eof = Token::new(TokenKind::Eof, "", Pos::new(3, 1, 4), Pos::new(3, 1, 4));
        let and = Token::new(TokenKind::And, "and", Pos::new(0, 1, 1), Pos::new(3, 1, 4));

        assert_eq!(eof.literal(), "EOF");
        assert_eq!(and.literal(), "and");
        assert!(eof.is_terminal());
        assert!(!and.is_terminal());
    }
}
