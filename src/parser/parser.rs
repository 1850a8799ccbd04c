// src/parser/parser.rs
//! Parser that converts tokens into an Abstract Syntax Tree
//!
//! Recursive descent over a `TokenStream`. Any popped token can be pushed
//! back, which is how the parser looks ahead. Every error aborts the parse.

use super::ast::*;
use super::lexer::TokenStream;
use super::token::{Pos, Token, TokenKind};
use thiserror::Error;

/// Number of characters of source quoted in a syntax error.
const NEAR_LIMIT: usize = 20;

type Result<T> = std::result::Result<T, SyntaxError>;

/// What went wrong at a given position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Diagnostic of an `ILLEGAL` token, forwarded verbatim.
    #[error("{0}")]
    Scan(String),

    #[error("unexpected EOF")]
    UnexpectedEof,

    #[error("unexpected token `{0}`")]
    UnexpectedToken(TokenKind),

    #[error("expected `{expected}` but got `{found}`")]
    Expected { expected: TokenKind, found: String },

    #[error("RuleType is required: unexpected {0}")]
    RuleTypeRequired(String),

    #[error("RuleType is already defined")]
    RuleTypeAlreadyDefined,

    #[error("parameters must be before expression")]
    ParametersAfterExpression,

    #[error("expression is already defined")]
    ExpressionAlreadyDefined,

    #[error("must equal after Rules")]
    MissingEqual,

    #[error("missing `[`")]
    MissingLeftBracket,

    #[error("missing `]`")]
    MissingRightBracket,

    #[error("can not mixed `{first}` and `{second}`")]
    MixedOperators {
        first: LogicalOperator,
        second: LogicalOperator,
    },

    #[error("missing `and` or `or` between rules")]
    MissingOperator,

    #[error("deep nested rule is not allowed")]
    DeepNestedRule,

    #[error("duration parameter can not be float")]
    DurationFloat,

    #[error("no parameter")]
    NoParameter,

    #[error("expected duration parameter")]
    ExpectedDuration,

    #[error("expected threshold expression but got `{0}`")]
    InvalidThreshold(TokenKind),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("syntax error near {pos} `{near}`, {kind}")]
    Syntax { pos: Pos, near: String, kind: ErrorKind },

    /// The input holds no `Rules` block at all.
    #[error("no rules found")]
    NoRulesFound,

    /// The token source stopped without an end-of-input token.
    #[error("unexpected EOF")]
    UnexpectedEof,
}

impl SyntaxError {
    pub fn pos(&self) -> Option<Pos> {
        match self {
            SyntaxError::Syntax { pos, .. } => Some(*pos),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            SyntaxError::Syntax { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// a lone rule, ends at EOF
    Single,
    /// a rule inside `Rules = [ ... ]`
    Ruleset,
    /// a rule inside the parentheses of a combined rule
    Nested,
}

impl Scope {
    fn accepts_end(self, kind: TokenKind) -> bool {
        match self {
            Scope::Single => kind == TokenKind::Eof,
            Scope::Ruleset => matches!(kind, TokenKind::Eof | TokenKind::Comma | TokenKind::RightBracket),
            Scope::Nested => matches!(kind, TokenKind::Eof | TokenKind::RightParen),
        }
    }
}

/// Comments buffered until we know whether they describe the next node.
///
/// A run only stays together while its comments sit on consecutive lines.
/// A run that is broken off, or that does not end on the line right above
/// the described node, goes to `sink` as a free-standing group.
#[derive(Debug, Default)]
struct PendingComments {
    group: CommentGroup,
    last_line: Option<u32>,
}

impl PendingComments {
    fn push(&mut self, comment: Comment, sink: &mut Vec<CommentGroup>) {
        let line = comment.sharp_pos.line;
        if self.last_line.is_some_and(|last| last + 1 != line) {
            self.flush(sink);
        }
        self.group.push(comment);
        self.last_line = Some(line);
    }

    /// Takes the run as the description of a node starting on `line`.
    fn describe(&mut self, line: u32, sink: &mut Vec<CommentGroup>) -> CommentGroup {
        if self.last_line.is_some_and(|last| last + 1 == line) {
            self.last_line = None;
            return std::mem::take(&mut self.group);
        }
        self.flush(sink);
        CommentGroup::new()
    }

    fn flush(&mut self, sink: &mut Vec<CommentGroup>) {
        self.last_line = None;
        let group = std::mem::take(&mut self.group);
        if !group.is_empty() {
            sink.push(group);
        }
    }
}

pub struct Parser<'a, I> {
    input: &'a str,
    tokens: TokenStream<I>,
}

impl<'a, I: Iterator<Item = Token>> Parser<'a, I> {
    /// `input` is the text `tokens` were scanned from; it is only used to
    /// quote source in errors.
    pub fn new(input: &'a str, tokens: I) -> Self {
        Self {
            input,
            tokens: TokenStream::new(tokens),
        }
    }

    /// Parses one rule or combined rule spanning the whole input.
    pub fn parse_rule(&mut self) -> Result<RuleDecl> {
        let mut stray = Vec::new();
        self.parse_rule_decl(Scope::Single, &mut stray)?
            .ok_or(SyntaxError::NoRulesFound)
    }

    /// Parses one `Rules = [ ... ]` block. Only comments may follow it.
    pub fn parse_ruleset(&mut self) -> Result<Ruleset> {
        let mut outside = Vec::new();
        let ruleset = self.parse_ruleset_into(&mut outside)?;
        loop {
            let token = self.next()?;
            match token.kind {
                TokenKind::Eof => return Ok(ruleset),
                TokenKind::Comment => continue,
                _ => return Err(self.unexpected(&token)),
            }
        }
    }

    /// Parses every ruleset up to the end of input.
    pub fn parse_file(&mut self, filename: impl Into<String>) -> Result<File> {
        let mut file = File {
            filename: filename.into(),
            ..File::default()
        };

        loop {
            match self.parse_ruleset_into(&mut file.comment_groups) {
                Ok(ruleset) => file.rulesets.push(ruleset),
                Err(SyntaxError::NoRulesFound) if !file.rulesets.is_empty() => break,
                Err(err) => return Err(err),
            }
            let token = self.next()?;
            if token.kind == TokenKind::Eof {
                break;
            }
            self.tokens.push(token);
        }

        Ok(file)
    }

    /// Discards all remaining tokens, returning how many were read.
    pub fn drain(&mut self) -> usize {
        self.tokens.drain()
    }

    fn next(&mut self) -> Result<Token> {
        let token = self.tokens.pop().ok_or(SyntaxError::UnexpectedEof)?;
        if token.kind == TokenKind::Illegal {
            let pos = token.start;
            return Err(self.error_at(pos, ErrorKind::Scan(token.text)));
        }
        Ok(token)
    }

    fn next_skipping_comments(&mut self, comments: &mut CommentGroup) -> Result<Token> {
        loop {
            let token = self.next()?;
            if token.kind != TokenKind::Comment {
                return Ok(token);
            }
            comments.push(comment(token));
        }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token> {
        let token = self.next()?;
        if token.kind == expected {
            return Ok(token);
        }
        let found = token.literal().to_string();
        Err(self.error_at(token.start, ErrorKind::Expected { expected, found }))
    }

    fn error_at(&self, pos: Pos, kind: ErrorKind) -> SyntaxError {
        SyntaxError::Syntax {
            pos,
            near: self.near(pos),
            kind,
        }
    }

    fn unexpected(&self, token: &Token) -> SyntaxError {
        let kind = match token.kind {
            TokenKind::Eof => ErrorKind::UnexpectedEof,
            other => ErrorKind::UnexpectedToken(other),
        };
        self.error_at(token.start, kind)
    }

    /// Source excerpt starting one character before `pos`, cut at the end
    /// of the line and after `NEAR_LIMIT` characters.
    fn near(&self, pos: Pos) -> String {
        let index = pos.index.min(self.input.len());
        let before = self.input.get(..index).unwrap_or_default();
        let start = before.char_indices().next_back().map_or(0, |(i, _)| i);
        let rest = &self.input[start..];
        let line = rest.find('\n').map_or(rest, |end| &rest[..end]);
        match line.char_indices().nth(NEAR_LIMIT) {
            Some((cut, _)) => format!("{}...", &line[..cut]),
            None => line.to_string(),
        }
    }

    /// Comments trailing a token on `line`, continued by comments on the
    /// following lines as long as they stay in the same column.
    fn parse_line_comments(&mut self, line: u32) -> Result<CommentGroup> {
        let mut group = CommentGroup::new();
        loop {
            let token = self.next()?;
            let follows = token.kind == TokenKind::Comment
                && match group.list.last() {
                    None => token.start.line == line,
                    Some(prev) => {
                        prev.sharp_pos.line + 1 == token.start.line
                            && prev.sharp_pos.column == token.start.column
                    }
                };
            if !follows {
                self.tokens.push(token);
                return Ok(group);
            }
            group.push(comment(token));
        }
    }

    /// Line comments after `at` belong to the rule when `at` is on the
    /// rule's first line, otherwise to the node itself.
    fn attach_line_comments(
        &mut self,
        at: Pos,
        rule_line: u32,
        own: &mut CommentGroup,
        line: &mut CommentGroup,
    ) -> Result<()> {
        let comments = self.parse_line_comments(at.line)?;
        if at.line == rule_line {
            line.append(comments);
        } else {
            own.append(comments);
        }
        Ok(())
    }

    fn parse_ruleset_into(&mut self, outside: &mut Vec<CommentGroup>) -> Result<Ruleset> {
        let mut ruleset = Ruleset::default();
        let mut pending = PendingComments::default();
        let mut opened = false;

        loop {
            let token = self.next()?;
            match token.kind {
                TokenKind::Eof if opened => {
                    return Err(self.error_at(token.start, ErrorKind::MissingRightBracket));
                }
                TokenKind::Eof => {
                    pending.flush(outside);
                    return Err(SyntaxError::NoRulesFound);
                }
                TokenKind::RightBracket if opened => {
                    ruleset.right_bracket_pos = token.start;
                    let comments = self.parse_line_comments(token.start.line)?;
                    ruleset.comments.append(comments);
                    return Ok(ruleset);
                }
                TokenKind::Rules if !opened => {
                    ruleset.description = pending.describe(token.start.line, outside);
                    ruleset.decl_pos = token.start;

                    if self.next()?.kind != TokenKind::Equal {
                        return Err(self.error_at(token.start, ErrorKind::MissingEqual));
                    }
                    let bracket = self.next()?;
                    if bracket.kind != TokenKind::LeftBracket {
                        return Err(self.error_at(token.start, ErrorKind::MissingLeftBracket));
                    }
                    ruleset.left_bracket_pos = bracket.start;
                    ruleset.comments = self.parse_line_comments(bracket.start.line)?;
                    opened = true;
                }
                TokenKind::Comment if !opened => pending.push(comment(token), outside),
                _ if opened => {
                    self.tokens.push(token);
                    if let Some(rule) = self.parse_rule_decl(Scope::Ruleset, &mut ruleset.inner_comments)? {
                        ruleset.rules.push(rule);
                    }
                }
                _ => return Err(self.unexpected(&token)),
            }
        }
    }

    /// Returns `None` when a ruleset closes before any rule starts.
    fn parse_rule_decl(&mut self, scope: Scope, inner: &mut Vec<CommentGroup>) -> Result<Option<RuleDecl>> {
        let mut pending = PendingComments::default();
        let mut description = CommentGroup::new();
        let mut rule_type: Option<Ident> = None;
        let mut parameters = Vec::new();
        let mut expression: Option<Expression> = None;
        let mut comments = CommentGroup::new();

        loop {
            let token = self.next()?;
            match token.kind {
                TokenKind::Comment => pending.push(comment(token), inner),
                TokenKind::LeftParen if scope == Scope::Nested => {
                    return Err(self.error_at(token.start, ErrorKind::DeepNestedRule));
                }
                TokenKind::LeftParen if rule_type.is_none() => {
                    let description = pending.describe(token.start.line, inner);
                    self.tokens.push(token);
                    return self.parse_combined_rule(scope, description, inner).map(Some);
                }
                TokenKind::Ident if rule_type.is_some() => {
                    return Err(self.error_at(token.start, ErrorKind::RuleTypeAlreadyDefined));
                }
                TokenKind::Ident => {
                    description = pending.describe(token.start.line, inner);
                    let line_comments = self.parse_line_comments(token.start.line)?;
                    rule_type = Some(Ident {
                        name_pos: token.start,
                        name: token.text,
                        comments: line_comments,
                    });
                }
                TokenKind::Eof | TokenKind::Comma | TokenKind::RightBracket | TokenKind::RightParen => {
                    pending.flush(inner);
                    let Some(rule_type) = rule_type else {
                        if token.kind == TokenKind::RightBracket && scope == Scope::Ruleset {
                            self.tokens.push(token);
                            return Ok(None);
                        }
                        let found = match token.kind {
                            TokenKind::Eof => "EOF".to_string(),
                            other => format!("`{other}`"),
                        };
                        return Err(self.error_at(token.start, ErrorKind::RuleTypeRequired(found)));
                    };
                    if !scope.accepts_end(token.kind) {
                        return Err(self.unexpected(&token));
                    }
                    if token.kind == TokenKind::Comma {
                        comments.append(self.parse_line_comments(token.start.line)?);
                    } else {
                        self.tokens.push(token);
                    }
                    return Ok(Some(RuleDecl::Rule(Rule {
                        description,
                        rule_type,
                        parameters,
                        expression,
                        comments,
                    })));
                }
                kind if kind.is_parameter_acceptable() => {
                    let Some(rule_line) = rule_type.as_ref().map(|t| t.name_pos.line) else {
                        let kind = ErrorKind::RuleTypeRequired("<Parameter>".to_string());
                        return Err(self.error_at(token.start, kind));
                    };
                    if expression.is_some() {
                        return Err(self.error_at(token.start, ErrorKind::ParametersAfterExpression));
                    }
                    let (parameter, line_comments) = self.parse_parameter(token, rule_line)?;
                    comments.append(line_comments);
                    parameters.push(parameter);
                }
                kind if kind.is_expression_start() => {
                    let Some(rule_line) = rule_type.as_ref().map(|t| t.name_pos.line) else {
                        let kind = ErrorKind::RuleTypeRequired("<Expression>".to_string());
                        return Err(self.error_at(token.start, kind));
                    };
                    if expression.is_some() {
                        return Err(self.error_at(token.start, ErrorKind::ExpressionAlreadyDefined));
                    }
                    let (parsed, line_comments) = self.parse_expression(token, rule_line)?;
                    comments.append(line_comments);
                    expression = Some(parsed);
                }
                _ => return Err(self.unexpected(&token)),
            }
        }
    }

    fn parse_combined_rule(
        &mut self,
        scope: Scope,
        description: CommentGroup,
        inner: &mut Vec<CommentGroup>,
    ) -> Result<RuleDecl> {
        let mut rules: Vec<Rule> = Vec::new();
        let mut operator: Option<LogicalOperator> = None;
        let mut first_lparen_pos = Pos::NONE;
        let mut last_rparen_pos = Pos::NONE;
        let mut comments = CommentGroup::new();
        let mut awaiting_rule = true;

        loop {
            let token = self.next()?;
            match token.kind {
                TokenKind::LeftParen => {
                    if !awaiting_rule {
                        return Err(self.error_at(token.start, ErrorKind::MissingOperator));
                    }
                    if rules.is_empty() {
                        first_lparen_pos = token.start;
                    }
                    let rule = match self.parse_rule_decl(Scope::Nested, inner)? {
                        Some(RuleDecl::Rule(rule)) => rule,
                        _ => return Err(self.error_at(token.start, ErrorKind::DeepNestedRule)),
                    };
                    last_rparen_pos = self.expect(TokenKind::RightParen)?.start;
                    rules.push(rule);
                    awaiting_rule = false;
                }
                kind @ (TokenKind::And | TokenKind::Or) => {
                    if awaiting_rule {
                        return Err(self.unexpected(&token));
                    }
                    let second = LogicalOperator::from_kind(kind).unwrap_or_default();
                    match operator {
                        Some(first) if first != second => {
                            let kind = ErrorKind::MixedOperators { first, second };
                            return Err(self.error_at(token.start, kind));
                        }
                        _ => operator = Some(second),
                    }
                    awaiting_rule = true;
                }
                TokenKind::Comment => comments.push(comment(token)),
                kind if !awaiting_rule && scope.accepts_end(kind) => {
                    if kind == TokenKind::Comma {
                        comments.append(self.parse_line_comments(token.start.line)?);
                    } else {
                        self.tokens.push(token);
                    }
                    break;
                }
                _ => return Err(self.unexpected(&token)),
            }
        }

        // a single parenthesized rule is just that rule
        if rules.len() == 1 {
            let mut rule = rules.remove(0);
            rule.description = description;
            rule.comments.append(comments);
            return Ok(RuleDecl::Rule(rule));
        }

        Ok(RuleDecl::Combined(CombinedRule {
            description,
            first_lparen_pos,
            last_rparen_pos,
            rules,
            operator: operator.unwrap_or_default(),
            comments,
        }))
    }

    /// Returns the parameter and the line comments that belong to the rule.
    fn parse_parameter(&mut self, token: Token, rule_line: u32) -> Result<(Parameter, CommentGroup)> {
        let (mut parameter, last) = match token.kind {
            TokenKind::String => {
                let right_quote_pos = last_char(token.end);
                let parameter = Parameter::String(StringParameter {
                    left_quote_pos: token.start,
                    right_quote_pos,
                    value: unquote(&token.text).to_string(),
                    comments: CommentGroup::new(),
                });
                (parameter, right_quote_pos)
            }
            TokenKind::Number => {
                let next = self.next()?;
                match DurationUnit::from_kind(next.kind) {
                    Some(unit) => {
                        if token.text.contains('.') {
                            return Err(self.error_at(token.start, ErrorKind::DurationFloat));
                        }
                        let parameter = Parameter::Duration(DurationParameter {
                            number_pos: token.start,
                            unit_pos: next.start,
                            number: token.text,
                            unit,
                            comments: CommentGroup::new(),
                        });
                        (parameter, next.start)
                    }
                    None => {
                        self.tokens.push(next);
                        let parameter = Parameter::Number(NumberParameter {
                            number_pos: token.start,
                            value: token.text,
                            comments: CommentGroup::new(),
                        });
                        (parameter, token.start)
                    }
                }
            }
            TokenKind::True | TokenKind::False => {
                let parameter = Parameter::Bool(BoolParameter {
                    bool_pos: token.start,
                    value: token.kind == TokenKind::True,
                    comments: CommentGroup::new(),
                });
                (parameter, token.start)
            }
            TokenKind::Now => (Parameter::Date(DateParameter::now(token.start)), token.start),
            _ => return Err(self.error_at(token.start, ErrorKind::NoParameter)),
        };

        let mut line = CommentGroup::new();
        self.attach_line_comments(last, rule_line, parameter.comments_mut(), &mut line)?;
        Ok((parameter, line))
    }

    /// Operands of `between` and `in`: plain literals, never `now()`.
    fn parse_operand(&mut self, token: Token, rule_line: u32) -> Result<(Parameter, CommentGroup)> {
        if token.kind == TokenKind::Now || !token.kind.is_parameter_acceptable() {
            return Err(self.unexpected(&token));
        }
        self.parse_parameter(token, rule_line)
    }

    fn parse_expression(&mut self, token: Token, rule_line: u32) -> Result<(Expression, CommentGroup)> {
        match token.kind {
            TokenKind::Between => {
                let (between, line) = self.parse_between(token, rule_line)?;
                Ok((Expression::Between(between), line))
            }
            TokenKind::In => {
                let (target, line) = self.parse_in(token, rule_line)?;
                self.parse_with_threshold(ThresholdTarget::In(target), line, rule_line)
            }
            TokenKind::Matches => {
                let (target, line) = self.parse_matches(token, rule_line)?;
                self.parse_with_threshold(ThresholdTarget::Matches(target), line, rule_line)
            }
            _ => {
                let (comparison, line) = self.parse_comparison(token, rule_line)?;
                Ok((Expression::Comparison(comparison), line))
            }
        }
    }

    fn parse_comparison(&mut self, op: Token, rule_line: u32) -> Result<(ComparisonExpression, CommentGroup)> {
        let Some(operator) = ComparisonOperator::from_kind(op.kind) else {
            return Err(self.unexpected(&op));
        };
        let mut comments = CommentGroup::new();
        let mut line = CommentGroup::new();
        self.attach_line_comments(op.start, rule_line, &mut comments, &mut line)?;

        let token = self.next()?;
        let right = match token.kind {
            TokenKind::LeftParen => Parameter::Date(self.parse_relative_date(token, rule_line, &mut line)?),
            kind if kind.is_parameter_acceptable() => {
                let (parameter, line_comments) = self.parse_parameter(token, rule_line)?;
                line.append(line_comments);
                parameter
            }
            _ => return Err(self.unexpected(&token)),
        };

        let expr = ComparisonExpression {
            expr_pos: op.start,
            operator,
            right,
            comments,
        };
        Ok((expr, line))
    }

    /// `(now() - <duration>)`, starting at the already consumed `(`.
    fn parse_relative_date(&mut self, open: Token, rule_line: u32, line: &mut CommentGroup) -> Result<DateParameter> {
        let mut comments = CommentGroup::new();
        self.attach_line_comments(open.start, rule_line, &mut comments, line)?;

        let now = self.expect(TokenKind::Now)?;
        self.attach_line_comments(now.start, rule_line, &mut comments, line)?;

        let minus = self.expect(TokenKind::Minus)?;
        self.attach_line_comments(minus.start, rule_line, &mut comments, line)?;

        let token = self.next()?;
        let number_pos = token.start;
        if token.kind != TokenKind::Number {
            return Err(self.error_at(number_pos, ErrorKind::ExpectedDuration));
        }
        let duration = match self.parse_parameter(token, rule_line)? {
            (Parameter::Duration(duration), line_comments) => {
                line.append(line_comments);
                duration
            }
            _ => return Err(self.error_at(number_pos, ErrorKind::ExpectedDuration)),
        };

        let close = self.expect(TokenKind::RightParen)?;
        self.attach_line_comments(close.start, rule_line, &mut comments, line)?;

        Ok(DateParameter {
            left_paren_pos: Some(open.start),
            right_paren_pos: Some(close.start),
            now_pos: now.start,
            minus_pos: Some(minus.start),
            duration: Some(duration),
            comments,
        })
    }

    fn parse_between(&mut self, between: Token, rule_line: u32) -> Result<(BetweenExpression, CommentGroup)> {
        let mut comments = CommentGroup::new();
        let mut line = CommentGroup::new();

        let token = self.next()?;
        let (left, line_comments) = self.parse_operand(token, rule_line)?;
        line.append(line_comments);

        let and = self.expect(TokenKind::And)?;
        self.attach_line_comments(and.start, rule_line, &mut comments, &mut line)?;

        let token = self.next()?;
        let (right, line_comments) = self.parse_operand(token, rule_line)?;
        line.append(line_comments);

        let expr = BetweenExpression {
            expr_pos: between.start,
            left,
            right,
            comments,
        };
        Ok((expr, line))
    }

    fn parse_in(&mut self, in_token: Token, rule_line: u32) -> Result<(InExpression, CommentGroup)> {
        let mut comments = CommentGroup::new();
        let mut line = CommentGroup::new();

        let open = self.expect(TokenKind::LeftBracket)?;
        self.attach_line_comments(open.start, rule_line, &mut comments, &mut line)?;

        let mut values = Vec::new();
        let close = loop {
            let token = self.next_skipping_comments(&mut comments)?;
            if token.kind == TokenKind::RightBracket && values.is_empty() {
                break token;
            }
            let (value, line_comments) = self.parse_operand(token, rule_line)?;
            line.append(line_comments);
            values.push(value);

            let separator = self.next_skipping_comments(&mut comments)?;
            match separator.kind {
                TokenKind::RightBracket => break separator,
                TokenKind::Comma => {
                    self.attach_line_comments(separator.start, rule_line, &mut comments, &mut line)?;
                }
                _ => {
                    let found = separator.literal().to_string();
                    let kind = ErrorKind::Expected {
                        expected: TokenKind::Comma,
                        found,
                    };
                    return Err(self.error_at(separator.start, kind));
                }
            }
        };
        self.attach_line_comments(close.start, rule_line, &mut comments, &mut line)?;

        let expr = InExpression {
            expr_pos: in_token.start,
            left_bracket_pos: open.start,
            right_bracket_pos: close.start,
            values,
            comments,
        };
        Ok((expr, line))
    }

    fn parse_matches(&mut self, matches: Token, rule_line: u32) -> Result<(MatchesExpression, CommentGroup)> {
        let mut comments = CommentGroup::new();
        let mut line = CommentGroup::new();

        let pattern = self.expect(TokenKind::String)?;
        self.attach_line_comments(pattern.start, rule_line, &mut comments, &mut line)?;

        let expr = MatchesExpression {
            expr_pos: matches.start,
            regexp_pos: pattern.start,
            value: unquote(&pattern.text).to_string(),
            comments,
        };
        Ok((expr, line))
    }

    /// Wraps `target` when `with threshold` follows, otherwise returns it.
    fn parse_with_threshold(
        &mut self,
        target: ThresholdTarget,
        mut line: CommentGroup,
        rule_line: u32,
    ) -> Result<(Expression, CommentGroup)> {
        let with = self.next()?;
        if with.kind != TokenKind::With {
            self.tokens.push(with);
            return Ok((target.into(), line));
        }

        let mut comments = CommentGroup::new();
        self.attach_line_comments(with.start, rule_line, &mut comments, &mut line)?;
        let keyword = self.expect(TokenKind::Threshold)?;
        self.attach_line_comments(keyword.start, rule_line, &mut comments, &mut line)?;

        let token = self.next()?;
        let threshold = match token.kind {
            TokenKind::Between => {
                let (between, line_comments) = self.parse_between(token, rule_line)?;
                line.append(line_comments);
                ThresholdExpression::Between(between)
            }
            kind if ComparisonOperator::from_kind(kind).is_some() => {
                let (comparison, line_comments) = self.parse_comparison(token, rule_line)?;
                line.append(line_comments);
                ThresholdExpression::Comparison(comparison)
            }
            kind if kind.is_expression_start() => {
                return Err(self.error_at(token.start, ErrorKind::InvalidThreshold(kind)));
            }
            _ => return Err(self.unexpected(&token)),
        };

        let expr = WithThresholdExpression {
            with_pos: with.start,
            target,
            threshold,
            comments,
        };
        Ok((Expression::WithThreshold(expr), line))
    }
}

fn comment(token: Token) -> Comment {
    Comment {
        sharp_pos: token.start,
        text: token.text,
    }
}

/// Position of the last character of a single-line token ending at `end`.
fn last_char(end: Pos) -> Pos {
    Pos::new(end.index.saturating_sub(1), end.line, end.column.saturating_sub(1))
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lexer::{CancelFlag, Lexer};

    fn parse_rule(input: &str) -> Result<RuleDecl> {
        Parser::new(input, Lexer::new("rule", input)).parse_rule()
    }

    fn parse_ruleset(input: &str) -> Result<Ruleset> {
        Parser::new(input, Lexer::new("ruleset", input)).parse_ruleset()
    }

    fn parse_file(input: &str) -> Result<File> {
        Parser::new(input, Lexer::new("file", input)).parse_file("file")
    }

    fn rule(input: &str) -> Rule {
        match parse_rule(input) {
            Ok(RuleDecl::Rule(rule)) => rule,
            other => panic!("expected a single rule for {input:?}, got {other:?}"),
        }
    }

    fn combined(input: &str) -> CombinedRule {
        match parse_rule(input) {
            Ok(RuleDecl::Combined(combined)) => combined,
            other => panic!("expected a combined rule for {input:?}, got {other:?}"),
        }
    }

    fn error(result: Result<impl std::fmt::Debug>) -> String {
        result.expect_err("expected a syntax error").to_string()
    }

    fn pos(index: usize, line: u32, column: u32) -> Pos {
        Pos::new(index, line, column)
    }

    fn ident(name_pos: Pos, name: &str) -> Ident {
        Ident {
            name_pos,
            name: name.to_string(),
            comments: CommentGroup::new(),
        }
    }

    fn string(left: Pos, right: Pos, value: &str) -> Parameter {
        Parameter::String(StringParameter {
            left_quote_pos: left,
            right_quote_pos: right,
            value: value.to_string(),
            comments: CommentGroup::new(),
        })
    }

    fn number(number_pos: Pos, value: &str) -> Parameter {
        Parameter::Number(NumberParameter {
            number_pos,
            value: value.to_string(),
            comments: CommentGroup::new(),
        })
    }

    fn duration(number_pos: Pos, unit_pos: Pos, number: &str, unit: DurationUnit) -> DurationParameter {
        DurationParameter {
            number_pos,
            unit_pos,
            number: number.to_string(),
            unit,
            comments: CommentGroup::new(),
        }
    }

    fn group(comments: &[(Pos, &str)]) -> CommentGroup {
        comments
            .iter()
            .map(|(sharp_pos, text)| Comment {
                sharp_pos: *sharp_pos,
                text: text.to_string(),
            })
            .collect()
    }

    fn simple(rule_type: Ident, parameters: Vec<Parameter>) -> Rule {
        Rule {
            description: CommentGroup::new(),
            rule_type,
            parameters,
            expression: None,
            comments: CommentGroup::new(),
        }
    }

    #[test]
    fn test_rule_errors() {
        let cases = [
            ("", "syntax error near 1:1 ``, RuleType is required: unexpected EOF"),
            (
                r#"\" IsUnique "col-A""#,
                r#"syntax error near 1:1 `\" IsUnique "col-A"`, unrecognized character: U+005C '\'"#,
            ),
            (
                r#""cal-A""#,
                r#"syntax error near 1:1 `"cal-A"`, RuleType is required: unexpected <Parameter>"#,
            ),
            (
                "between 1 and 5",
                "syntax error near 1:1 `between 1 and 5`, RuleType is required: unexpected <Expression>",
            ),
            (
                r#"(IsUnique "col-A") and (IsPrimaryKey "col-A") or (IsUnique "col-B") and (IsPrimaryKey "col-B")"#,
                r#"syntax error near 1:47 ` or (IsUnique "col-B...`, can not mixed `and` and `or`"#,
            ),
        ];

        for (input, want) in cases {
            assert_eq!(error(parse_rule(input)), want, "input: {input:?}");
        }
    }

    #[test]
    fn test_structural_errors() {
        let cases = [
            (r#"IsUnique "a" IsUnique "b""#, ErrorKind::RuleTypeAlreadyDefined),
            (r#"Mean "a" > 1 "b""#, ErrorKind::ParametersAfterExpression),
            (r#"Mean "a" > 1 < 3"#, ErrorKind::ExpressionAlreadyDefined),
            (r#"((IsUnique "a")) and (IsUnique "b")"#, ErrorKind::DeepNestedRule),
            (r#"(IsUnique "a") (IsUnique "b")"#, ErrorKind::MissingOperator),
            (r#"DataFreshness "a" <= 1.5 hours"#, ErrorKind::DurationFloat),
            (r#"Mean "a" between 1 2"#, ErrorKind::Expected {
                expected: TokenKind::And,
                found: "2".to_string(),
            }),
            (r#"Col "a" > (now() + 3 days)"#, ErrorKind::Expected {
                expected: TokenKind::Minus,
                found: "+".to_string(),
            }),
            (r#"Col "a" > (now() - 3)"#, ErrorKind::ExpectedDuration),
            (r#"Col "a" in ["x" "y"]"#, ErrorKind::Expected {
                expected: TokenKind::Comma,
                found: "\"y\"".to_string(),
            }),
            (r#"Col "a" in ["x",]"#, ErrorKind::UnexpectedToken(TokenKind::RightBracket)),
            (r#"Col "a" in [,]"#, ErrorKind::UnexpectedToken(TokenKind::Comma)),
            (r#"Col "a" in ["x",,"y"]"#, ErrorKind::UnexpectedToken(TokenKind::Comma)),
            (r#"Col "a" between now() and 3"#, ErrorKind::UnexpectedToken(TokenKind::Now)),
            (r#"Col "a" in ["x"] with threshold in ["y"]"#, ErrorKind::InvalidThreshold(TokenKind::In)),
            (r#"Col "a" in ["x"] with 0.5"#, ErrorKind::Expected {
                expected: TokenKind::Threshold,
                found: "0.5".to_string(),
            }),
            (r#"Col "a" matches 5"#, ErrorKind::Expected {
                expected: TokenKind::String,
                found: "5".to_string(),
            }),
            (r#"IsUnique "a", IsUnique "b""#, ErrorKind::UnexpectedToken(TokenKind::Comma)),
            (r#"(IsUnique "a") and"#, ErrorKind::UnexpectedEof),
            (r#"(IsUnique "a""#, ErrorKind::Expected {
                expected: TokenKind::RightParen,
                found: "EOF".to_string(),
            }),
            (r#"IsUnique "a" )"#, ErrorKind::UnexpectedToken(TokenKind::RightParen)),
            ("()", ErrorKind::RuleTypeRequired("`)`".to_string())),
            ("IsUnique \"a\" + 1", ErrorKind::UnexpectedToken(TokenKind::Plus)),
        ];

        for (input, want) in cases {
            let err = parse_rule(input).expect_err(input);
            assert_eq!(err.kind(), Some(&want), "input: {input:?}, error: {err}");
        }
    }

    #[test]
    fn test_error_position_and_excerpt() {
        let err = parse_rule("IsUnique \"a\"\n  IsUnique \"b\"").expect_err("duplicate type");

        assert_eq!(err.pos(), Some(pos(15, 2, 3)));
        assert_eq!(
            err.to_string(),
            "syntax error near 2:3 ` IsUnique \"b\"`, RuleType is already defined"
        );
    }

    #[test]
    fn test_is_unique() {
        assert_eq!(
            rule(r#"IsUnique "col-A""#),
            simple(
                ident(pos(0, 1, 1), "IsUnique"),
                vec![string(pos(9, 1, 10), pos(15, 1, 16), "col-A")],
            )
        );
    }

    #[test]
    fn test_is_unique_with_comments() {
        let input = concat!(
            "\n",
            "\t\t\t\t# this is sample of DQDL rule\n",
            "\n",
            "\t\t\t\t# IsUnique rule checks whether all of the values in a column are unique, and returns a Boolean value.\n",
            "\t\t\t\tIsUnique    # RuleType\n",
            "\t\t\t\t            # IsUnique accept 1 column parameter\n",
            "\t\t\t\t    \"col-A\" # ColumnName\n",
            "\t\t\t\t# more details: https://docs.aws.amazon.com/glue/latest/dg/dqdl.html#dqdl-rule-types-IsUnique\n",
            "\t\t\t",
        );

        let mut rule_type = ident(pos(146, 5, 5), "IsUnique");
        rule_type.comments = group(&[
            (pos(158, 5, 17), "# RuleType"),
            (pos(185, 6, 17), "# IsUnique accept 1 column parameter"),
        ]);
        let mut column = string(pos(230, 7, 9), pos(236, 7, 15), "col-A");
        *column.comments_mut() = group(&[(pos(238, 7, 17), "# ColumnName")]);

        let want = Rule {
            description: group(&[(
                pos(40, 4, 5),
                "# IsUnique rule checks whether all of the values in a column are unique, and returns a Boolean value.",
            )]),
            rule_type,
            parameters: vec![column],
            expression: None,
            comments: CommentGroup::new(),
        };
        assert_eq!(rule(input), want);
    }

    #[test]
    fn test_rule_in_parens() {
        assert_eq!(
            rule(r#"(IsUnique "col-A")"#),
            simple(
                ident(pos(1, 1, 2), "IsUnique"),
                vec![string(pos(10, 1, 11), pos(16, 1, 17), "col-A")],
            )
        );
    }

    #[test]
    fn test_description_and_line_comment() {
        let got = rule("# comment\n\t\t\tIsUnique \"col-A\"  # line comment");

        assert_eq!(got.description, group(&[(pos(0, 1, 1), "# comment")]));
        assert_eq!(got.rule_type, ident(pos(13, 2, 4), "IsUnique"));
        assert_eq!(got.parameters, vec![string(pos(22, 2, 13), pos(28, 2, 19), "col-A")]);
        assert_eq!(got.comments, group(&[(pos(31, 2, 22), "# line comment")]));
    }

    #[test]
    fn test_comparison_less_than() {
        let got = rule(r#"ColumnCorrelation "colA" "colB" < 0.5"#);

        assert_eq!(got.parameters.len(), 2);
        assert_eq!(got.parameters[1], string(pos(25, 1, 26), pos(30, 1, 31), "colB"));
        assert_eq!(
            got.expression,
            Some(Expression::Comparison(ComparisonExpression {
                expr_pos: pos(32, 1, 33),
                operator: ComparisonOperator::LessThan,
                right: number(pos(34, 1, 35), "0.5"),
                comments: CommentGroup::new(),
            }))
        );
    }

    #[test]
    fn test_duration_parameter() {
        let got = rule(r#"DataFreshness "Order_Date" <= 24 hours"#);

        assert_eq!(
            got.expression,
            Some(Expression::Comparison(ComparisonExpression {
                expr_pos: pos(27, 1, 28),
                operator: ComparisonOperator::LessEqual,
                right: Parameter::Duration(duration(pos(30, 1, 31), pos(33, 1, 34), "24", DurationUnit::Hours)),
                comments: CommentGroup::new(),
            }))
        );
    }

    #[test]
    fn test_between_durations() {
        let got = rule(r#"DataFreshness "Order_Date" between 2 days and 5 days"#);

        assert_eq!(
            got.expression,
            Some(Expression::Between(BetweenExpression {
                expr_pos: pos(27, 1, 28),
                left: Parameter::Duration(duration(pos(35, 1, 36), pos(37, 1, 38), "2", DurationUnit::Days)),
                right: Parameter::Duration(duration(pos(46, 1, 47), pos(48, 1, 49), "5", DurationUnit::Days)),
                comments: CommentGroup::new(),
            }))
        );
    }

    #[test]
    fn test_in_expression() {
        let got = rule(r#"ColumnValues "colA" in [ "a", "b", "c" ]"#);

        assert_eq!(
            got.expression,
            Some(Expression::In(InExpression {
                expr_pos: pos(20, 1, 21),
                left_bracket_pos: pos(23, 1, 24),
                right_bracket_pos: pos(39, 1, 40),
                values: vec![
                    string(pos(25, 1, 26), pos(27, 1, 28), "a"),
                    string(pos(30, 1, 31), pos(32, 1, 33), "b"),
                    string(pos(35, 1, 36), pos(37, 1, 38), "c"),
                ],
                comments: CommentGroup::new(),
            }))
        );
    }

    #[test]
    fn test_empty_in_list() {
        let got = rule(r#"ColumnValues "colA" in []"#);

        match got.expression {
            Some(Expression::In(expr)) => {
                assert!(expr.values.is_empty());
                assert_eq!(expr.right_bracket_pos, pos(24, 1, 25));
            }
            other => panic!("unexpected expression {other:?}"),
        }
    }

    #[test]
    fn test_in_list_across_lines() {
        let input = "ColumnValues \"colA\" in [\n  \"a\", # first\n  # standalone\n  \"b\"\n]";
        let got = rule(input);

        let Some(Expression::In(expr)) = got.expression else {
            panic!("expected in expression");
        };
        assert_eq!(expr.values.len(), 2);
        assert_eq!(expr.comments.texts(), vec!["# first", "# standalone"]);
        assert!(got.comments.is_empty());
    }

    #[test]
    fn test_matches_expression() {
        let got = rule(r#"ColumnValues "colA" matches "[a-ZA-Z]*""#);

        assert_eq!(
            got.expression,
            Some(Expression::Matches(MatchesExpression {
                expr_pos: pos(20, 1, 21),
                regexp_pos: pos(28, 1, 29),
                value: "[a-ZA-Z]*".to_string(),
                comments: CommentGroup::new(),
            }))
        );
    }

    #[test]
    fn test_relative_date() {
        let input = r#"ColumnValues "load_date" > (now() - 3 days)"#;
        let want_date = DateParameter {
            left_paren_pos: Some(pos(27, 1, 28)),
            right_paren_pos: Some(pos(42, 1, 43)),
            now_pos: pos(28, 1, 29),
            minus_pos: Some(pos(34, 1, 35)),
            duration: Some(duration(pos(36, 1, 37), pos(38, 1, 39), "3", DurationUnit::Days)),
            comments: CommentGroup::new(),
        };
        let want = Some(Expression::Comparison(ComparisonExpression {
            expr_pos: pos(25, 1, 26),
            operator: ComparisonOperator::GreaterThan,
            right: Parameter::Date(want_date),
            comments: CommentGroup::new(),
        }));

        let got = rule(input);
        assert_eq!(got.expression, want);
        assert!(got.comments.is_empty());

        let got = rule(&format!("{input} #line comment"));
        assert_eq!(got.expression, want);
        assert_eq!(got.comments, group(&[(pos(44, 1, 45), "#line comment")]));
    }

    #[test]
    fn test_bare_now() {
        let got = rule(r#"ColumnValues "load_date" <= now()"#);

        assert_eq!(
            got.expression,
            Some(Expression::Comparison(ComparisonExpression {
                expr_pos: pos(25, 1, 26),
                operator: ComparisonOperator::LessEqual,
                right: Parameter::Date(DateParameter::now(pos(28, 1, 29))),
                comments: CommentGroup::new(),
            }))
        );
    }

    #[test]
    fn test_matches_with_threshold() {
        let got = rule(r#"ColumnValues "colA" matches "[a-zA-Z]*" with threshold between 0.2 and 0.9"#);

        let want = WithThresholdExpression {
            with_pos: pos(40, 1, 41),
            target: ThresholdTarget::Matches(MatchesExpression {
                expr_pos: pos(20, 1, 21),
                regexp_pos: pos(28, 1, 29),
                value: "[a-zA-Z]*".to_string(),
                comments: CommentGroup::new(),
            }),
            threshold: ThresholdExpression::Between(BetweenExpression {
                expr_pos: pos(55, 1, 56),
                left: number(pos(63, 1, 64), "0.2"),
                right: number(pos(71, 1, 72), "0.9"),
                comments: CommentGroup::new(),
            }),
            comments: CommentGroup::new(),
        };
        assert_eq!(got.expression, Some(Expression::WithThreshold(want)));
    }

    #[test]
    fn test_in_with_threshold() {
        let got = rule(r#"ColumnValues "colA" in ["A", "B"] with threshold > 0.8"#);

        let want = WithThresholdExpression {
            with_pos: pos(34, 1, 35),
            target: ThresholdTarget::In(InExpression {
                expr_pos: pos(20, 1, 21),
                left_bracket_pos: pos(23, 1, 24),
                right_bracket_pos: pos(32, 1, 33),
                values: vec![
                    string(pos(24, 1, 25), pos(26, 1, 27), "A"),
                    string(pos(29, 1, 30), pos(31, 1, 32), "B"),
                ],
                comments: CommentGroup::new(),
            }),
            threshold: ThresholdExpression::Comparison(ComparisonExpression {
                expr_pos: pos(49, 1, 50),
                operator: ComparisonOperator::GreaterThan,
                right: number(pos(51, 1, 52), "0.8"),
                comments: CommentGroup::new(),
            }),
            comments: CommentGroup::new(),
        };
        let expr = got.expression.expect("expression");
        assert_eq!(expr.pos(), pos(20, 1, 21));
        assert_eq!(expr.end(), pos(54, 1, 55));
        assert_eq!(expr, Expression::WithThreshold(want));
    }

    #[test]
    fn test_combined_and() {
        let got = combined(r#"(IsUnique "col-A") and (IsUnique "col-B")"#);

        assert_eq!(
            got,
            CombinedRule {
                description: CommentGroup::new(),
                first_lparen_pos: pos(0, 1, 1),
                last_rparen_pos: pos(40, 1, 41),
                rules: vec![
                    simple(
                        ident(pos(1, 1, 2), "IsUnique"),
                        vec![string(pos(10, 1, 11), pos(16, 1, 17), "col-A")],
                    ),
                    simple(
                        ident(pos(24, 1, 25), "IsUnique"),
                        vec![string(pos(33, 1, 34), pos(39, 1, 40), "col-B")],
                    ),
                ],
                operator: LogicalOperator::And,
                comments: CommentGroup::new(),
            }
        );
    }

    #[test]
    fn test_combined_or() {
        let got = combined(r#"(IsUnique "col-A") or (IsPrimaryKey "col-A")"#);

        assert_eq!(got.operator, LogicalOperator::Or);
        assert_eq!(got.last_rparen_pos, pos(43, 1, 44));
        assert_eq!(got.rules[1].rule_type, ident(pos(23, 1, 24), "IsPrimaryKey"));
        assert_eq!(got.rules[1].parameters, vec![string(pos(36, 1, 37), pos(42, 1, 43), "col-A")]);
    }

    #[test]
    fn test_combined_with_description() {
        let input = "# comment\n\t\t\t# comment 2\n\t\t\t(IsUnique \"col-A\") or (IsPrimaryKey \"col-A\") or (IsUnique \"col-B\") or (IsPrimaryKey \"col-B\")";
        let got = combined(input);

        assert_eq!(
            got.description,
            group(&[(pos(0, 1, 1), "# comment"), (pos(13, 2, 4), "# comment 2")])
        );
        assert_eq!(got.first_lparen_pos, pos(28, 3, 4));
        assert_eq!(got.last_rparen_pos, pos(119, 3, 95));
        assert_eq!(got.rules.len(), 4);
        assert_eq!(got.rules[3].rule_type, ident(pos(99, 3, 75), "IsPrimaryKey"));
        assert_eq!(got.rules[3].parameters, vec![string(pos(112, 3, 88), pos(118, 3, 94), "col-B")]);
        assert!(got.rules.iter().all(|r| r.description.is_empty()));
    }

    #[test]
    fn test_single_paren_rule_keeps_description() {
        let got = rule("# described\n(IsUnique \"a\") # trailing");

        assert_eq!(got.description.texts(), vec!["# described"]);
        assert_eq!(got.comments.texts(), vec!["# trailing"]);
    }

    #[test]
    fn test_ruleset_errors() {
        assert_eq!(parse_ruleset("").expect_err("empty"), SyntaxError::NoRulesFound);
        assert_eq!(parse_ruleset("# only a comment").expect_err("comment"), SyntaxError::NoRulesFound);
        assert_eq!(error(parse_ruleset("Rules =")), "syntax error near 1:1 `Rules =`, missing `[`");
        assert_eq!(error(parse_ruleset("Rules = [")), "syntax error near 1:10 `[`, missing `]`");
        assert_eq!(error(parse_ruleset("Rules [ ]")), "syntax error near 1:1 `Rules [ ]`, must equal after Rules");
        assert_eq!(
            error(parse_ruleset("Rules = [ , ]")),
            "syntax error near 1:11 ` , ]`, RuleType is required: unexpected `,`"
        );
        assert_eq!(
            parse_ruleset("IsUnique \"a\"").expect_err("no block").kind(),
            Some(&ErrorKind::UnexpectedToken(TokenKind::Ident))
        );
        assert_eq!(
            parse_ruleset("Rules = [ ] Rules").expect_err("trailing").kind(),
            Some(&ErrorKind::UnexpectedToken(TokenKind::Rules))
        );
    }

    #[test]
    fn test_empty_ruleset() {
        let got = parse_ruleset("\nRules = [\n\n]").expect("empty ruleset");

        assert_eq!(
            got,
            Ruleset {
                decl_pos: pos(1, 2, 1),
                left_bracket_pos: pos(9, 2, 9),
                right_bracket_pos: pos(12, 4, 1),
                ..Ruleset::default()
            }
        );
    }

    #[test]
    fn test_ruleset_rules() {
        let got = parse_ruleset("\nRules = [\n\tIsUnique \"col-A\"\n]").expect("one rule");
        assert_eq!(got.right_bracket_pos, pos(29, 4, 1));
        assert_eq!(
            got.rules,
            vec![RuleDecl::Rule(simple(
                ident(pos(12, 3, 2), "IsUnique"),
                vec![string(pos(21, 3, 11), pos(27, 3, 17), "col-A")],
            ))]
        );

        let got = parse_ruleset("\nRules = [\n\tIsComplete \"order-id\",\n\tIsUnique \"order-id\"\n]").expect("two rules");
        assert_eq!(got.right_bracket_pos, pos(56, 5, 1));
        assert_eq!(
            got.rules,
            vec![
                RuleDecl::Rule(simple(
                    ident(pos(12, 3, 2), "IsComplete"),
                    vec![string(pos(23, 3, 13), pos(32, 3, 22), "order-id")],
                )),
                RuleDecl::Rule(simple(
                    ident(pos(36, 4, 2), "IsUnique"),
                    vec![string(pos(45, 4, 11), pos(54, 4, 20), "order-id")],
                )),
            ]
        );
    }

    const RULESET_WITH_COMMENTS: &str = "# This is a file comment

# this is a ruleset description
Rules = [
\t# this is a IsComplete rule description
\tIsComplete \"order-id\",

\t# this is Ruleset inner comment

\t# this is a IsUnique rule description
\tIsUnique \"order-id\"
] #this is ruleset comment

# this is last file comment";

    #[test]
    fn test_ruleset_with_comments() {
        let got = parse_ruleset(RULESET_WITH_COMMENTS).expect("ruleset");

        let mut complete = simple(
            ident(pos(110, 6, 2), "IsComplete"),
            vec![string(pos(121, 6, 13), pos(130, 6, 22), "order-id")],
        );
        complete.description = group(&[(pos(69, 5, 2), "# this is a IsComplete rule description")]);
        let mut unique = simple(
            ident(pos(208, 11, 2), "IsUnique"),
            vec![string(pos(217, 11, 11), pos(226, 11, 20), "order-id")],
        );
        unique.description = group(&[(pos(169, 10, 2), "# this is a IsUnique rule description")]);

        let want = Ruleset {
            description: group(&[(pos(26, 3, 1), "# this is a ruleset description")]),
            decl_pos: pos(58, 4, 1),
            left_bracket_pos: pos(66, 4, 9),
            rules: vec![RuleDecl::Rule(complete), RuleDecl::Rule(unique)],
            inner_comments: vec![group(&[(pos(135, 8, 2), "# this is Ruleset inner comment")])],
            right_bracket_pos: pos(228, 12, 1),
            comments: group(&[(pos(230, 12, 3), "#this is ruleset comment")]),
        };
        assert_eq!(got, want);
        assert_eq!(got.end(), pos(254, 12, 27));
    }

    #[test]
    fn test_ruleset_comment_placement() {
        let input = "Rules = [ # opening
  IsUnique \"a\", # after comma

  # loose one

  # loose two
  IsComplete \"b\"
  # before close
]";
        let got = parse_ruleset(input).expect("ruleset");

        assert_eq!(got.comments.texts(), vec!["# opening"]);
        assert_eq!(got.rules[0].comments().texts(), vec!["# after comma"]);
        assert_eq!(got.rules[1].description().texts(), vec!["# loose two"]);
        let inner: Vec<Vec<&str>> = got.inner_comments.iter().map(CommentGroup::texts).collect();
        assert_eq!(inner, vec![vec!["# loose one"], vec!["# before close"]]);
    }

    #[test]
    fn test_ruleset_with_only_comments() {
        let got = parse_ruleset("Rules = [\n  # nothing yet\n]").expect("ruleset");

        assert!(got.rules.is_empty());
        assert_eq!(got.inner_comments.len(), 1);
        assert_eq!(got.inner_comments[0].texts(), vec!["# nothing yet"]);
    }

    #[test]
    fn test_ruleset_with_combined_rules() {
        let input = "Rules = [\n  (IsUnique \"a\") or (IsComplete \"a\"),\n  (IsUnique \"b\") and (IsComplete \"b\")\n]";
        let got = parse_ruleset(input).expect("ruleset");

        let operators: Vec<LogicalOperator> = got
            .rules
            .iter()
            .filter_map(RuleDecl::as_combined)
            .map(|c| c.operator)
            .collect();
        assert_eq!(operators, vec![LogicalOperator::Or, LogicalOperator::And]);
    }

    #[test]
    fn test_trailing_comma_is_accepted() {
        let got = parse_ruleset("Rules = [ IsUnique \"a\", ]").expect("ruleset");
        assert_eq!(got.rules.len(), 1);
    }

    #[test]
    fn test_file() {
        let input = format!("{RULESET_WITH_COMMENTS}\n\nRules = [ RowCount > 10 ]\n# tail\n");
        let got = parse_file(&input).expect("file");

        assert_eq!(got.filename, "file");
        assert_eq!(got.rulesets.len(), 2);
        let groups: Vec<Vec<&str>> = got.comment_groups.iter().map(CommentGroup::texts).collect();
        assert_eq!(
            groups,
            vec![vec!["# This is a file comment"], vec!["# this is last file comment"], vec!["# tail"]]
        );
        assert_eq!(got.pos(), pos(0, 1, 1));
        assert_eq!(got.end(), pos(input.len() - 1, 17, 7));
    }

    #[test]
    fn test_file_errors() {
        assert_eq!(parse_file("").expect_err("empty"), SyntaxError::NoRulesFound);
        assert_eq!(
            parse_file("Rules = [ IsUnique ] Rules = [").expect_err("second block").kind(),
            Some(&ErrorKind::MissingRightBracket)
        );
    }

    #[test]
    fn test_ruleset_allows_only_trailing_comments() {
        let got = parse_ruleset("Rules = [ IsUnique \"a\" ] # closing\n# after\n").expect("ruleset");
        assert_eq!(got.comments.texts(), vec!["# closing"]);

        for (input, kind) in [
            ("Rules = [ ]\nRules = [ ]", TokenKind::Rules),
            ("Rules = [ ] ]", TokenKind::RightBracket),
            ("Rules = [ ] IsUnique \"a\"", TokenKind::Ident),
        ] {
            let err = parse_ruleset(input).expect_err(input);
            assert_eq!(err.kind(), Some(&ErrorKind::UnexpectedToken(kind)), "input: {input:?}");
        }
    }

    #[test]
    fn test_free_standing_groups_are_never_empty() {
        let input = "# a\n\nRules = [\n  IsUnique \"x\",\n\n  # b\n\n  IsUnique \"y\"\n]\n";
        let got = parse_file(input).expect("file");

        assert!(got.comment_groups.iter().all(|g| !g.is_empty()));
        assert!(got.rulesets[0].inner_comments.iter().all(|g| !g.is_empty()));
        assert_eq!(got.rulesets[0].inner_comments.len(), 1);
        assert!(got.rulesets[0].description.is_empty());
        assert!(got.rulesets[0].rules[1].description().is_empty());
    }

    #[test]
    fn test_canceled_scan_is_a_scan_error() {
        let input = r#"IsUnique "a""#;
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = Parser::new(input, Lexer::new("rule", input).with_cancel(cancel))
            .parse_rule()
            .expect_err("canceled before the first token");
        assert_eq!(err.kind(), Some(&ErrorKind::Scan("canceled".to_string())));
        assert_eq!(err.to_string(), r#"syntax error near 1:1 `IsUnique "a"`, canceled"#);
    }

    #[test]
    fn test_closed_token_source() {
        let tokens = Lexer::new("cut", "IsUnique \"a\"").take(1);
        let err = Parser::new("IsUnique \"a\"", tokens).parse_rule().expect_err("cut short");
        assert_eq!(err, SyntaxError::UnexpectedEof);
        assert_eq!(err.pos(), None);
    }

    #[test]
    fn test_near_is_limited() {
        let input = "Rules = [ IsUnique \"a\" \"b\" \"c\" \"d\" \"e\" IsUnique ]";
        let err = parse_ruleset(input).expect_err("duplicate type");
        assert_eq!(
            err.to_string(),
            "syntax error near 1:40 ` IsUnique ]`, RuleType is already defined"
        );

        let parser = Parser::new("é12345678901234567890123", std::iter::empty::<Token>());
        assert_eq!(parser.near(pos(2, 1, 2)), "é1234567890123456789...");
        assert_eq!(parser.near(pos(0, 1, 1)), "é1234567890123456789...");
    }
}
