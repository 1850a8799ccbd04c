// src/parser/ast.rs
//! Abstract Syntax Tree definitions for the rule language
//!
//! Nodes only store the positions of their own tokens; `end()` is always
//! computed from the last child so it cannot drift from the tree.

use super::token::{Pos, TokenKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Source span of a syntax node.
pub trait Node {
    /// Position of the first character of the node.
    fn pos(&self) -> Pos;
    /// Position immediately after the node.
    fn end(&self) -> Pos;
}

/// A single `#` comment, text includes the leading `#`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub sharp_pos: Pos,
    pub text: String,
}

impl Node for Comment {
    fn pos(&self) -> Pos {
        self.sharp_pos
    }

    fn end(&self) -> Pos {
        self.sharp_pos.add_str(&self.text)
    }
}

/// Comments on consecutive lines.
///
/// An empty group means "no comments" and serializes as `[]`. Only the
/// `description` and trailing `comments` fields hold empty groups; the
/// free-standing group lists never do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentGroup {
    pub list: Vec<Comment>,
}

impl CommentGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn push(&mut self, comment: Comment) {
        self.list.push(comment);
    }

    /// Moves every comment of `other` to the end of this group.
    pub fn append(&mut self, mut other: CommentGroup) {
        self.list.append(&mut other.list);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Comment> {
        self.list.iter()
    }

    /// Comment texts in order, handy for assertions and tooling.
    pub fn texts(&self) -> Vec<&str> {
        self.list.iter().map(|c| c.text.as_str()).collect()
    }
}

impl FromIterator<Comment> for CommentGroup {
    fn from_iter<T: IntoIterator<Item = Comment>>(iter: T) -> Self {
        Self {
            list: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CommentGroup {
    type Item = &'a Comment;
    type IntoIter = std::slice::Iter<'a, Comment>;

    fn into_iter(self) -> Self::IntoIter {
        self.list.iter()
    }
}

impl Node for CommentGroup {
    fn pos(&self) -> Pos {
        self.list.first().map_or(Pos::NONE, Comment::pos)
    }

    fn end(&self) -> Pos {
        self.list.last().map_or(Pos::NONE, Comment::end)
    }
}

/// A whole source file: top-level comments plus every ruleset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub filename: String,
    /// comments outside of any ruleset
    pub comment_groups: Vec<CommentGroup>,
    pub rulesets: Vec<Ruleset>,
}

impl Node for File {
    fn pos(&self) -> Pos {
        let comments = self.comment_groups.first().map(CommentGroup::pos);
        let rulesets = self.rulesets.first().map(Ruleset::pos);
        comments
            .into_iter()
            .chain(rulesets)
            .filter(Pos::is_valid)
            .min()
            .unwrap_or(Pos::NONE)
    }

    fn end(&self) -> Pos {
        let comments = self.comment_groups.last().map(CommentGroup::end);
        let rulesets = self.rulesets.last().map(Ruleset::end);
        comments
            .into_iter()
            .chain(rulesets)
            .filter(Pos::is_valid)
            .max()
            .unwrap_or(Pos::NONE)
    }
}

/// `Rules = [ ... ]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    /// comments directly above `Rules`
    pub description: CommentGroup,
    pub decl_pos: Pos,
    pub left_bracket_pos: Pos,
    pub rules: Vec<RuleDecl>,
    /// comment groups inside the brackets that describe no rule
    pub inner_comments: Vec<CommentGroup>,
    pub right_bracket_pos: Pos,
    /// line comments after `[` and `]`
    pub comments: CommentGroup,
}

impl Node for Ruleset {
    fn pos(&self) -> Pos {
        self.decl_pos
    }

    fn end(&self) -> Pos {
        self.right_bracket_pos.add_column(1).max(self.comments.end())
    }
}

/// A rule declaration: either a single rule or parenthesized rules
/// joined by one logical operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleDecl {
    Rule(Rule),
    Combined(CombinedRule),
}

impl RuleDecl {
    pub fn description(&self) -> &CommentGroup {
        match self {
            RuleDecl::Rule(rule) => &rule.description,
            RuleDecl::Combined(combined) => &combined.description,
        }
    }

    pub fn comments(&self) -> &CommentGroup {
        match self {
            RuleDecl::Rule(rule) => &rule.comments,
            RuleDecl::Combined(combined) => &combined.comments,
        }
    }

    /// Inserts `comments` in front of the declaration's line comments.
    pub fn prepend_comments(&mut self, mut comments: CommentGroup) {
        let target = match self {
            RuleDecl::Rule(rule) => &mut rule.comments,
            RuleDecl::Combined(combined) => &mut combined.comments,
        };
        comments.append(std::mem::take(target));
        *target = comments;
    }

    pub fn as_rule(&self) -> Option<&Rule> {
        match self {
            RuleDecl::Rule(rule) => Some(rule),
            RuleDecl::Combined(_) => None,
        }
    }

    pub fn as_combined(&self) -> Option<&CombinedRule> {
        match self {
            RuleDecl::Rule(_) => None,
            RuleDecl::Combined(combined) => Some(combined),
        }
    }
}

impl Node for RuleDecl {
    fn pos(&self) -> Pos {
        match self {
            RuleDecl::Rule(rule) => rule.pos(),
            RuleDecl::Combined(combined) => combined.pos(),
        }
    }

    fn end(&self) -> Pos {
        match self {
            RuleDecl::Rule(rule) => rule.end(),
            RuleDecl::Combined(combined) => combined.end(),
        }
    }
}

/// `RuleType param... [expression]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub description: CommentGroup,
    pub rule_type: Ident,
    pub parameters: Vec<Parameter>,
    pub expression: Option<Expression>,
    /// line comments on the rule's first line
    pub comments: CommentGroup,
}

impl Node for Rule {
    fn pos(&self) -> Pos {
        self.rule_type.pos()
    }

    fn end(&self) -> Pos {
        if let Some(expression) = &self.expression {
            return expression.end();
        }
        match self.parameters.last() {
            Some(parameter) => parameter.end(),
            None => self.rule_type.end(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    pub fn from_kind(kind: TokenKind) -> Option<Self> {
        match kind {
            TokenKind::And => Some(LogicalOperator::And),
            TokenKind::Or => Some(LogicalOperator::Or),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogicalOperator::And => "and",
            LogicalOperator::Or => "or",
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(rule) and (rule) ...` - never nests another combined rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRule {
    pub description: CommentGroup,
    pub first_lparen_pos: Pos,
    pub last_rparen_pos: Pos,
    pub rules: Vec<Rule>,
    pub operator: LogicalOperator,
    pub comments: CommentGroup,
}

impl Node for CombinedRule {
    fn pos(&self) -> Pos {
        self.first_lparen_pos
    }

    fn end(&self) -> Pos {
        self.last_rparen_pos.add_column(1)
    }
}

/// The rule type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ident {
    pub name_pos: Pos,
    pub name: String,
    pub comments: CommentGroup,
}

impl Node for Ident {
    fn pos(&self) -> Pos {
        self.name_pos
    }

    fn end(&self) -> Pos {
        self.name_pos.add_str(&self.name)
    }
}

// ---------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Parameter {
    String(StringParameter),
    Number(NumberParameter),
    Bool(BoolParameter),
    Duration(DurationParameter),
    Date(DateParameter),
}

impl Parameter {
    pub fn comments(&self) -> &CommentGroup {
        match self {
            Parameter::String(p) => &p.comments,
            Parameter::Number(p) => &p.comments,
            Parameter::Bool(p) => &p.comments,
            Parameter::Duration(p) => &p.comments,
            Parameter::Date(p) => &p.comments,
        }
    }

    pub(crate) fn comments_mut(&mut self) -> &mut CommentGroup {
        match self {
            Parameter::String(p) => &mut p.comments,
            Parameter::Number(p) => &mut p.comments,
            Parameter::Bool(p) => &mut p.comments,
            Parameter::Duration(p) => &mut p.comments,
            Parameter::Date(p) => &mut p.comments,
        }
    }
}

impl Node for Parameter {
    fn pos(&self) -> Pos {
        match self {
            Parameter::String(p) => p.pos(),
            Parameter::Number(p) => p.pos(),
            Parameter::Bool(p) => p.pos(),
            Parameter::Duration(p) => p.pos(),
            Parameter::Date(p) => p.pos(),
        }
    }

    fn end(&self) -> Pos {
        match self {
            Parameter::String(p) => p.end(),
            Parameter::Number(p) => p.end(),
            Parameter::Bool(p) => p.end(),
            Parameter::Duration(p) => p.end(),
            Parameter::Date(p) => p.end(),
        }
    }
}

/// `"value"`, stored without its quotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringParameter {
    pub left_quote_pos: Pos,
    pub right_quote_pos: Pos,
    pub value: String,
    pub comments: CommentGroup,
}

impl Node for StringParameter {
    fn pos(&self) -> Pos {
        self.left_quote_pos
    }

    fn end(&self) -> Pos {
        self.right_quote_pos.add_column(1)
    }
}

/// A numeric literal kept as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberParameter {
    pub number_pos: Pos,
    pub value: String,
    pub comments: CommentGroup,
}

impl NumberParameter {
    pub fn is_integer(&self) -> bool {
        !self.value.contains('.')
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.parse().ok()
    }
}

impl Node for NumberParameter {
    fn pos(&self) -> Pos {
        self.number_pos
    }

    fn end(&self) -> Pos {
        self.number_pos.add_str(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolParameter {
    pub bool_pos: Pos,
    pub value: bool,
    pub comments: CommentGroup,
}

impl Node for BoolParameter {
    fn pos(&self) -> Pos {
        self.bool_pos
    }

    fn end(&self) -> Pos {
        if self.value {
            self.bool_pos.add_column(4)
        } else {
            self.bool_pos.add_column(5)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Days,
    Hours,
}

impl DurationUnit {
    pub fn from_kind(kind: TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Days => Some(DurationUnit::Days),
            TokenKind::Hours => Some(DurationUnit::Hours),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DurationUnit::Days => "days",
            DurationUnit::Hours => "hours",
        }
    }

    fn seconds(self) -> u64 {
        match self {
            DurationUnit::Days => 24 * 60 * 60,
            DurationUnit::Hours => 60 * 60,
        }
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `24 hours`, `3 days` - the magnitude is always an integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationParameter {
    pub number_pos: Pos,
    pub unit_pos: Pos,
    pub number: String,
    pub unit: DurationUnit,
    pub comments: CommentGroup,
}

impl DurationParameter {
    /// The duration as written, e.g. `"24 hours"`.
    pub fn value(&self) -> String {
        format!("{} {}", self.number, self.unit)
    }

    pub fn amount(&self) -> Option<u64> {
        self.number.parse().ok()
    }

    /// `None` when the magnitude does not fit.
    pub fn to_duration(&self) -> Option<Duration> {
        let secs = self.amount()?.checked_mul(self.unit.seconds())?;
        Some(Duration::from_secs(secs))
    }
}

impl Node for DurationParameter {
    fn pos(&self) -> Pos {
        self.number_pos
    }

    fn end(&self) -> Pos {
        self.unit_pos.add_str(self.unit.as_str())
    }
}

/// Either a bare `now()` or `(now() - <duration>)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateParameter {
    pub left_paren_pos: Option<Pos>,
    pub right_paren_pos: Option<Pos>,
    pub now_pos: Pos,
    pub minus_pos: Option<Pos>,
    pub duration: Option<DurationParameter>,
    pub comments: CommentGroup,
}

impl DateParameter {
    pub(crate) fn now(now_pos: Pos) -> Self {
        Self {
            left_paren_pos: None,
            right_paren_pos: None,
            now_pos,
            minus_pos: None,
            duration: None,
            comments: CommentGroup::new(),
        }
    }

    /// True for the `(now() - N unit)` form.
    pub fn is_relative(&self) -> bool {
        self.duration.is_some()
    }
}

impl Node for DateParameter {
    fn pos(&self) -> Pos {
        self.left_paren_pos.unwrap_or(self.now_pos)
    }

    fn end(&self) -> Pos {
        match self.right_paren_pos {
            Some(pos) => pos.add_column(1),
            None => self.now_pos.add_str(TokenKind::Now.as_str()),
        }
    }
}

// ---------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expression {
    Comparison(ComparisonExpression),
    Between(BetweenExpression),
    In(InExpression),
    Matches(MatchesExpression),
    WithThreshold(WithThresholdExpression),
}

impl Expression {
    /// Whether this expression may stand right of `with threshold`.
    pub fn is_threshold_expression(&self) -> bool {
        matches!(self, Expression::Comparison(_) | Expression::Between(_))
    }

    /// Whether this expression may stand left of `with threshold`.
    pub fn is_threshold_target(&self) -> bool {
        matches!(self, Expression::In(_) | Expression::Matches(_))
    }

    pub fn comments(&self) -> &CommentGroup {
        match self {
            Expression::Comparison(x) => &x.comments,
            Expression::Between(x) => &x.comments,
            Expression::In(x) => &x.comments,
            Expression::Matches(x) => &x.comments,
            Expression::WithThreshold(x) => &x.comments,
        }
    }
}

impl Node for Expression {
    fn pos(&self) -> Pos {
        match self {
            Expression::Comparison(x) => x.pos(),
            Expression::Between(x) => x.pos(),
            Expression::In(x) => x.pos(),
            Expression::Matches(x) => x.pos(),
            Expression::WithThreshold(x) => x.pos(),
        }
    }

    fn end(&self) -> Pos {
        match self {
            Expression::Comparison(x) => x.end(),
            Expression::Between(x) => x.end(),
            Expression::In(x) => x.end(),
            Expression::Matches(x) => x.end(),
            Expression::WithThreshold(x) => x.end(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "<=")]
    LessEqual,
}

impl ComparisonOperator {
    pub fn from_kind(kind: TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Equal => Some(ComparisonOperator::Equal),
            TokenKind::GreaterThan => Some(ComparisonOperator::GreaterThan),
            TokenKind::LessThan => Some(ComparisonOperator::LessThan),
            TokenKind::GreaterEqual => Some(ComparisonOperator::GreaterEqual),
            TokenKind::LessEqual => Some(ComparisonOperator::LessEqual),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOperator::Equal => "=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::GreaterEqual => ">=",
            ComparisonOperator::LessEqual => "<=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `> 10`, `<= (now() - 3 days)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonExpression {
    pub expr_pos: Pos,
    pub operator: ComparisonOperator,
    pub right: Parameter,
    pub comments: CommentGroup,
}

impl Node for ComparisonExpression {
    fn pos(&self) -> Pos {
        self.expr_pos
    }

    fn end(&self) -> Pos {
        self.right.end()
    }
}

/// `between 1 and 5`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetweenExpression {
    pub expr_pos: Pos,
    pub left: Parameter,
    pub right: Parameter,
    pub comments: CommentGroup,
}

impl Node for BetweenExpression {
    fn pos(&self) -> Pos {
        self.expr_pos
    }

    fn end(&self) -> Pos {
        self.right.end()
    }
}

/// `in ["a", "b"]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InExpression {
    pub expr_pos: Pos,
    pub left_bracket_pos: Pos,
    pub right_bracket_pos: Pos,
    pub values: Vec<Parameter>,
    pub comments: CommentGroup,
}

impl Node for InExpression {
    fn pos(&self) -> Pos {
        self.expr_pos
    }

    fn end(&self) -> Pos {
        self.right_bracket_pos.add_column(1)
    }
}

/// `matches "[a-z]*"` - the pattern is kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchesExpression {
    pub expr_pos: Pos,
    pub regexp_pos: Pos,
    pub value: String,
    pub comments: CommentGroup,
}

impl Node for MatchesExpression {
    fn pos(&self) -> Pos {
        self.expr_pos
    }

    fn end(&self) -> Pos {
        // the quotes around the pattern
        self.regexp_pos.add_str(&self.value).add_column(2)
    }
}

/// Expressions allowed on the right of `with threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThresholdExpression {
    Comparison(ComparisonExpression),
    Between(BetweenExpression),
}

impl Node for ThresholdExpression {
    fn pos(&self) -> Pos {
        match self {
            ThresholdExpression::Comparison(x) => x.pos(),
            ThresholdExpression::Between(x) => x.pos(),
        }
    }

    fn end(&self) -> Pos {
        match self {
            ThresholdExpression::Comparison(x) => x.end(),
            ThresholdExpression::Between(x) => x.end(),
        }
    }
}

impl From<ThresholdExpression> for Expression {
    fn from(expr: ThresholdExpression) -> Self {
        match expr {
            ThresholdExpression::Comparison(x) => Expression::Comparison(x),
            ThresholdExpression::Between(x) => Expression::Between(x),
        }
    }
}

impl TryFrom<Expression> for ThresholdExpression {
    type Error = Expression;

    fn try_from(expr: Expression) -> Result<Self, Self::Error> {
        match expr {
            Expression::Comparison(x) => Ok(ThresholdExpression::Comparison(x)),
            Expression::Between(x) => Ok(ThresholdExpression::Between(x)),
            other => Err(other),
        }
    }
}

/// Expressions allowed on the left of `with threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThresholdTarget {
    In(InExpression),
    Matches(MatchesExpression),
}

impl Node for ThresholdTarget {
    fn pos(&self) -> Pos {
        match self {
            ThresholdTarget::In(x) => x.pos(),
            ThresholdTarget::Matches(x) => x.pos(),
        }
    }

    fn end(&self) -> Pos {
        match self {
            ThresholdTarget::In(x) => x.end(),
            ThresholdTarget::Matches(x) => x.end(),
        }
    }
}

impl From<ThresholdTarget> for Expression {
    fn from(target: ThresholdTarget) -> Self {
        match target {
            ThresholdTarget::In(x) => Expression::In(x),
            ThresholdTarget::Matches(x) => Expression::Matches(x),
        }
    }
}

impl TryFrom<Expression> for ThresholdTarget {
    type Error = Expression;

    fn try_from(expr: Expression) -> Result<Self, Self::Error> {
        match expr {
            Expression::In(x) => Ok(ThresholdTarget::In(x)),
            Expression::Matches(x) => Ok(ThresholdTarget::Matches(x)),
            other => Err(other),
        }
    }
}

/// `<target> with threshold <threshold>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithThresholdExpression {
    /// position of `with`
    pub with_pos: Pos,
    pub target: ThresholdTarget,
    pub threshold: ThresholdExpression,
    pub comments: CommentGroup,
}

impl Node for WithThresholdExpression {
    fn pos(&self) -> Pos {
        self.target.pos()
    }

    fn end(&self) -> Pos {
        self.threshold.end()
    }
}
