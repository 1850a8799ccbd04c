// src/parser/mod.rs
//! Parser for the DQDL rule language
//!
//! Converts rule source text into a positioned Abstract Syntax Tree (AST).
//! Each call scans on its own thread and hands tokens over a bounded
//! channel to the parser running on the caller's thread.

pub mod ast;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;
pub mod token;

use std::sync::mpsc;
use std::thread;
use tracing::{debug, trace};

pub use ast::{File, Node, RuleDecl, Ruleset};
pub use lexer::{CancelFlag, Lexer};
pub use parser::{ErrorKind, Parser, SyntaxError};
pub use token::{Pos, Token, TokenKind};

type ChannelParser<'a> = Parser<'a, mpsc::IntoIter<Token>>;

/// Parse a single rule or combined rule
pub fn parse_rule(text: &str) -> Result<RuleDecl, SyntaxError> {
    run("rule", text, |p| p.parse_rule())
}

/// Parse one `Rules = [ ... ]` block
pub fn parse_ruleset(text: &str) -> Result<Ruleset, SyntaxError> {
    run("ruleset", text, |p| p.parse_ruleset())
}

/// Parse every ruleset in `text`. `name` becomes `File::filename`.
pub fn parse_file(name: &str, text: &str) -> Result<File, SyntaxError> {
    run(name, text, |p| p.parse_file(name))
}

/// Runs the lexer on a scoped thread while `parse` consumes its tokens.
///
/// Whatever `parse` returns, the remaining tokens are drained and the lexer
/// thread is joined before this returns. On failure the scan is canceled
/// first so the drain is short.
fn run<T>(
    name: &str,
    text: &str,
    parse: impl FnOnce(&mut ChannelParser<'_>) -> Result<T, SyntaxError>,
) -> Result<T, SyntaxError> {
    debug!(name, len = text.len(), "parse started");

    let cancel = CancelFlag::new();
    let (tx, rx) = mpsc::sync_channel(1);

    thread::scope(|scope| {
        let lexer = Lexer::new(name, text).with_cancel(cancel.clone());
        let handle = scope.spawn(move || lexer.run(tx));

        let mut parser = Parser::new(text, rx.into_iter());
        let result = parse(&mut parser);
        if let Err(err) = &result {
            debug!(name, error = %err, "parse failed");
            cancel.cancel();
        }

        let discarded = parser.drain();
        drop(parser);
        if let Err(panic) = handle.join() {
            std::panic::resume_unwind(panic);
        }
        trace!(name, discarded, "lexer drained and joined");

        result
    })
}
