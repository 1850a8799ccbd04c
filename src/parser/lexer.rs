// src/parser/lexer.rs
//! Lexical analyzer (tokenizer) for the rule language
//!
//! The lexer is a small state machine pulled one token at a time through
//! `Iterator`. `Lexer::run` pushes the same tokens into a bounded channel so
//! scanning can happen on its own thread while the parser consumes them.

use super::token::{Pos, Token, TokenKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use tracing::{debug, trace};

/// Shared flag that stops a running scan.
///
/// Once set, the lexer emits a single `ILLEGAL` token with the text
/// `canceled` and produces nothing more.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scan,
    Identifier,
    String,
    Number { seen_dot: bool },
    Comment,
}

pub struct Lexer<'a> {
    name: String,
    input: &'a str,
    /// start of the token being scanned
    start: Pos,
    pos: usize,
    line: u32,
    col: u32,
    /// column of the last newline, restored by `backup`
    prev_line_col: u32,
    /// last char returned by `advance`, `None` at end of input
    last: Option<char>,
    state: Option<State>,
    cancel: Option<CancelFlag>,
}

impl<'a> Lexer<'a> {
    /// `name` only shows up in diagnostics.
    pub fn new(name: impl Into<String>, input: &'a str) -> Self {
        Self {
            name: name.into(),
            input,
            start: Pos::new(0, 1, 1),
            pos: 0,
            line: 1,
            col: 1,
            prev_line_col: 1,
            last: None,
            state: Some(State::Scan),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends every token to `tx`, stopping early if the receiver hangs up.
    pub fn run(self, tx: SyncSender<Token>) {
        let name = self.name.clone();
        for token in self {
            if tx.send(token).is_err() {
                debug!(name = %name, "token receiver dropped, stopping scan");
                return;
            }
        }
    }

    fn is_canceled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_canceled)
    }

    fn current(&self) -> Pos {
        Pos::new(self.pos, self.line, self.col)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input[self.pos..].chars().next();
        self.last = ch;
        let ch = ch?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.prev_line_col = self.col;
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    /// Undoes the most recent `advance`. Only one step can be undone.
    fn backup(&mut self) {
        let Some(ch) = self.last.take() else {
            return;
        };
        self.pos -= ch.len_utf8();
        if ch == '\n' {
            self.line -= 1;
            self.col = self.prev_line_col;
        } else {
            self.col -= 1;
        }
    }

    fn accept(&mut self, expected: char) -> bool {
        if self.advance() == Some(expected) {
            return true;
        }
        self.backup();
        false
    }

    fn ignore(&mut self) {
        self.start = self.current();
    }

    fn emit(&mut self, kind: TokenKind) -> Token {
        let end = self.current();
        let token = Token::new(kind, &self.input[self.start.index..self.pos], self.start, end);
        self.start = end;
        token
    }

    fn error(&mut self, message: impl Into<String>) -> Token {
        self.state = None;
        Token::new(TokenKind::Illegal, message, self.start, self.current())
    }

    fn step(&mut self, state: State) -> Option<Token> {
        match state {
            State::Scan => self.scan(),
            State::Identifier => self.scan_identifier(),
            State::String => self.scan_string(),
            State::Number { seen_dot } => self.scan_number(seen_dot),
            State::Comment => self.scan_comment(),
        }
    }

    fn scan(&mut self) -> Option<Token> {
        let Some(ch) = self.advance() else {
            self.state = None;
            return Some(self.emit(TokenKind::Eof));
        };

        let kind = match ch {
            ' ' | '\t' | '\n' => {
                self.ignore();
                return None;
            }
            c if is_letter(c) => {
                self.backup();
                self.state = Some(State::Identifier);
                return None;
            }
            c if is_digit(c) => {
                self.backup();
                self.state = Some(State::Number { seen_dot: false });
                return None;
            }
            '"' => {
                self.state = Some(State::String);
                return None;
            }
            '#' => {
                self.state = Some(State::Comment);
                return None;
            }
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            ',' => TokenKind::Comma,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Multiply,
            '/' => TokenKind::Divide,
            '=' => TokenKind::Equal,
            '>' if self.accept('=') => TokenKind::GreaterEqual,
            '>' => TokenKind::GreaterThan,
            '<' if self.accept('=') => TokenKind::LessEqual,
            '<' => TokenKind::LessThan,
            other => {
                return Some(self.error(format!("unrecognized character: {}", describe_char(other))));
            }
        };
        Some(self.emit(kind))
    }

    fn scan_identifier(&mut self) -> Option<Token> {
        match self.advance() {
            Some(c) if is_letter(c) => None,
            _ => {
                self.backup();
                let word = &self.input[self.start.index..self.pos];
                let kind = TokenKind::lookup_ident(word);
                // `now` is only valid as the call `now()`
                if kind == TokenKind::Now && !(self.accept('(') && self.accept(')')) {
                    return Some(self.error("expected '()' after NOW"));
                }
                self.state = Some(State::Scan);
                Some(self.emit(kind))
            }
        }
    }

    fn scan_string(&mut self) -> Option<Token> {
        match self.advance() {
            None => Some(self.error("unterminated string")),
            Some('"') => {
                self.state = Some(State::Scan);
                Some(self.emit(TokenKind::String))
            }
            Some(_) => None,
        }
    }

    fn scan_number(&mut self, seen_dot: bool) -> Option<Token> {
        match self.advance() {
            Some(c) if is_digit(c) => None,
            Some('.') if seen_dot => Some(self.error("invalid number")),
            Some('.') => {
                self.state = Some(State::Number { seen_dot: true });
                None
            }
            Some(c) if is_letter(c) => Some(self.error("invalid number")),
            _ => {
                self.backup();
                self.state = Some(State::Scan);
                Some(self.emit(TokenKind::Number))
            }
        }
    }

    fn scan_comment(&mut self) -> Option<Token> {
        match self.advance() {
            None | Some('\n') => {
                self.backup();
                self.state = Some(State::Scan);
                Some(self.emit(TokenKind::Comment))
            }
            Some(_) => None,
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            let state = self.state?;
            if self.is_canceled() {
                debug!(name = %self.name, pos = %self.current(), "scan canceled");
                return Some(self.error("canceled"));
            }
            if let Some(token) = self.step(state) {
                trace!(name = %self.name, kind = %token.kind, start = %token.start, "token");
                return Some(token);
            }
        }
    }
}

fn is_letter(ch: char) -> bool {
    ch.is_ascii_alphabetic()
}

fn is_digit(ch: char) -> bool {
    ch.is_ascii_digit()
}

/// `U+005C '\'`, or just `U+0007` for characters that do not print.
fn describe_char(ch: char) -> String {
    if ch.is_control() {
        format!("U+{:04X}", ch as u32)
    } else {
        format!("U+{:04X} '{}'", ch as u32, ch)
    }
}

/// Token source with unlimited pushback.
///
/// Pushed tokens come back in LIFO order before anything new is pulled
/// from the source. Once the terminal token has been seen it is replayed
/// on every later `pop`.
pub(crate) struct TokenStream<I> {
    source: I,
    stack: Vec<Token>,
    terminal: Option<Token>,
}

impl<I: Iterator<Item = Token>> TokenStream<I> {
    pub(crate) fn new(source: I) -> Self {
        Self {
            source,
            stack: Vec::new(),
            terminal: None,
        }
    }

    /// `None` only when the source stopped without a terminal token.
    pub(crate) fn pop(&mut self) -> Option<Token> {
        if let Some(token) = self.stack.pop() {
            return Some(token);
        }
        if let Some(terminal) = &self.terminal {
            return Some(terminal.clone());
        }
        let token = self.source.next()?;
        if token.is_terminal() {
            self.terminal = Some(token.clone());
        }
        Some(token)
    }

    pub(crate) fn push(&mut self, token: Token) {
        self.stack.push(token);
    }

    /// Throws away every pending token, returning how many were read
    /// from the source.
    pub(crate) fn drain(&mut self) -> usize {
        self.stack.clear();
        if self.terminal.is_some() {
            return 0;
        }
        let mut discarded = 0;
        for token in self.source.by_ref() {
            discarded += 1;
            if token.is_terminal() {
                self.terminal = Some(token);
                break;
            }
        }
        discarded
    }
}
