// src/lib.rs
//! # DQDL Parser
//!
//! Lexer, parser and AST for DQDL, a small declarative language for data
//! quality rules. Every node of the tree carries exact source positions,
//! and comments are kept and attached to the nodes they describe.
//!
//! ## Example
//!
//! ```rust
//! use dqdl_parser::{parse_ruleset, ast::Expression};
//!
//! let source = r#"
//!     ## order checks
//!     Rules = [
//!         IsComplete "order-id",
//!         ColumnValues "status" in ["open", "closed"] with threshold > 0.9
//!     ]
//! "#;
//!
//! let ruleset = parse_ruleset(source).unwrap();
//! assert_eq!(ruleset.description.texts(), vec!["# order checks"]);
//! assert_eq!(ruleset.rules.len(), 2);
//!
//! let rule = ruleset.rules[1].as_rule().unwrap();
//! assert!(matches!(rule.expression, Some(Expression::WithThreshold(_))));
//! ```

pub mod parser;

use std::io::Read;
use thiserror::Error;
use tracing::debug;

pub use parser::ast;
pub use parser::{
    parse_file, parse_rule, parse_ruleset, CancelFlag, ErrorKind, File, Lexer, Node, Parser, Pos, RuleDecl, Ruleset,
    SyntaxError, Token, TokenKind,
};

/// Errors from the reader-based entry points
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("failed to read {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "async")]
    #[error("parse task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Read all of `reader` and parse it as a file named `name`
///
/// # Example
///
/// ```rust
/// use dqdl_parser::parse_reader;
///
/// let source = "Rules = [ RowCount > 100 ]";
/// let file = parse_reader("inline.dqdl", source.as_bytes()).unwrap();
/// assert_eq!(file.filename, "inline.dqdl");
/// ```
pub fn parse_reader(name: &str, mut reader: impl Read) -> Result<File, Error> {
    let mut text = String::new();
    reader.read_to_string(&mut text).map_err(|source| Error::Io {
        name: name.to_string(),
        source,
    })?;
    debug!(name, len = text.len(), "read source");
    Ok(parse_file(name, &text)?)
}

/// Async variant of [`parse_reader`]
///
/// Reading happens on the runtime; parsing runs on the blocking pool.
#[cfg(feature = "async")]
pub async fn parse_reader_async<R>(name: &str, mut reader: R) -> Result<File, Error>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut text = String::new();
    reader.read_to_string(&mut text).await.map_err(|source| Error::Io {
        name: name.to_string(),
        source,
    })?;
    debug!(name, len = text.len(), "read source");

    let name = name.to_string();
    let file = tokio::task::spawn_blocking(move || parse_file(&name, &text)).await??;
    Ok(file)
}
