//! Predicate builder for entry queries
//!
//! Builds a parameterized `WHERE` expression, its positional arguments and
//! an `ORDER BY` clause without the caller ever concatenating SQL.
//!
//! Queries are immutable expression trees. Every builder method consumes
//! the query and returns a new one, so a sub-query passed to
//! [`EntryQuery::and_inner`] can't be mutated afterwards. Each `and`/`or`
//! wraps everything built so far as its left operand, and the rendered SQL
//! keeps that grouping.
//!
//! ```
//! use notesync_core::query::EntryQuery;
//!
//! let query = EntryQuery::new()
//!     .or("_id", "=", ["123"])?
//!     .or("title", "LIKE", ["abc"])?;
//!
//! assert_eq!(query.selection().as_deref(), Some("(_id = ?) OR (title LIKE ?)"));
//! # Ok::<(), notesync_core::query::QueryError>(())
//! ```
//!
//! Column names are the only text spliced into SQL, so they are checked
//! against the `entries` table columns. Operands always travel as `?`
//! parameters.

use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput};
use thiserror::Error;

/// Errors raised while building a query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Operand count doesn't match the operator's arity
    #[error("Operator {operator} takes {expected} operand(s), got {actual}")]
    ArgumentCount {
        operator: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Operator token is not one of `=`, `LIKE`, `BETWEEN`
    #[error("Unknown operator: '{0}'")]
    UnknownOperator(String),

    /// Column is not part of the entries table
    #[error("Unknown column: '{0}'")]
    UnknownColumn(String),

    /// Sort column or direction outside the allow-list
    #[error("Invalid sort order: '{0}'")]
    InvalidOrder(String),
}

/// Queryable columns of the `entries` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    Title,
    Description,
    Color,
    Created,
    Edited,
    Viewed,
    Position,
    SyncId,
    Pending,
}

impl Column {
    pub const ALL: [Column; 10] = [
        Column::Id,
        Column::Title,
        Column::Description,
        Column::Color,
        Column::Created,
        Column::Edited,
        Column::Viewed,
        Column::Position,
        Column::SyncId,
        Column::Pending,
    ];

    /// SQL column name
    pub fn name(&self) -> &'static str {
        match self {
            Column::Id => "_id",
            Column::Title => "title",
            Column::Description => "description",
            Column::Color => "color",
            Column::Created => "created",
            Column::Edited => "edited",
            Column::Viewed => "viewed",
            Column::Position => "position",
            Column::SyncId => "sync_id",
            Column::Pending => "pending",
        }
    }

    /// Whether entries may be ordered by this column
    pub fn is_sortable(&self) -> bool {
        !matches!(self, Column::Id | Column::SyncId | Column::Pending)
    }

    /// Parse a column name
    pub fn parse(name: &str) -> Result<Self, QueryError> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| QueryError::UnknownColumn(name.to_string()))
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Comparison operator with fixed arity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    Like,
    Between,
}

impl Operator {
    /// Parse an operator token (case-insensitive)
    pub fn parse(token: &str) -> Result<Self, QueryError> {
        match token.trim().to_ascii_uppercase().as_str() {
            "=" | "EQUALS" => Ok(Operator::Equals),
            "LIKE" => Ok(Operator::Like),
            "BETWEEN" => Ok(Operator::Between),
            _ => Err(QueryError::UnknownOperator(token.to_string())),
        }
    }

    /// Number of operands the operator takes
    pub fn arity(&self) -> usize {
        match self {
            Operator::Equals | Operator::Like => 1,
            Operator::Between => 2,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::Like => "LIKE",
            Operator::Between => "BETWEEN",
        }
    }
}

/// A positional query argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryArg {
    Text(String),
    Integer(i64),
}

impl From<&str> for QueryArg {
    fn from(s: &str) -> Self {
        QueryArg::Text(s.to_string())
    }
}

impl From<String> for QueryArg {
    fn from(s: String) -> Self {
        QueryArg::Text(s)
    }
}

impl From<&String> for QueryArg {
    fn from(s: &String) -> Self {
        QueryArg::Text(s.clone())
    }
}

impl From<i64> for QueryArg {
    fn from(n: i64) -> Self {
        QueryArg::Integer(n)
    }
}

impl From<bool> for QueryArg {
    fn from(b: bool) -> Self {
        QueryArg::Integer(i64::from(b))
    }
}

/// Timestamps are stored as epoch milliseconds
impl From<DateTime<Utc>> for QueryArg {
    fn from(t: DateTime<Utc>) -> Self {
        QueryArg::Integer(t.timestamp_millis())
    }
}

impl fmt::Display for QueryArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryArg::Text(s) => f.write_str(s),
            QueryArg::Integer(n) => write!(f, "{}", n),
        }
    }
}

impl ToSql for QueryArg {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            QueryArg::Text(s) => s.to_sql(),
            QueryArg::Integer(n) => n.to_sql(),
        }
    }
}

/// A single comparison, with operands already checked against the arity
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    column: Column,
    operator: Operator,
    operands: Vec<QueryArg>,
}

impl Clause {
    /// Build a clause, checking arity and wildcarding `LIKE` operands
    pub fn new(
        column: Column,
        operator: Operator,
        operands: Vec<QueryArg>,
    ) -> Result<Self, QueryError> {
        if operands.len() != operator.arity() {
            return Err(QueryError::ArgumentCount {
                operator: operator.token(),
                expected: operator.arity(),
                actual: operands.len(),
            });
        }

        let operands = match operator {
            Operator::Like => operands
                .into_iter()
                .map(|op| QueryArg::Text(format!("%{}%", op)))
                .collect(),
            _ => operands,
        };

        Ok(Self {
            column,
            operator,
            operands,
        })
    }

    pub fn column(&self) -> Column {
        self.column
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }
}

/// Boolean expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Clause(Clause),
    Group(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn render(&self, out: &mut String) {
        match self {
            Expr::Clause(clause) => match clause.operator {
                Operator::Between => {
                    out.push_str(&format!("({} BETWEEN ? AND ?)", clause.column));
                }
                op => out.push_str(&format!("({} {} ?)", clause.column, op.token())),
            },
            Expr::Group(inner) => {
                out.push('(');
                inner.render(out);
                out.push(')');
            }
            Expr::And(left, right) => {
                left.render_within(Joiner::And, out);
                out.push_str(" AND ");
                right.render_within(Joiner::And, out);
            }
            Expr::Or(left, right) => {
                left.render_within(Joiner::Or, out);
                out.push_str(" OR ");
                right.render_within(Joiner::Or, out);
            }
        }
    }

    /// Same-joiner chains stay flat; a mixed operand is parenthesized so SQL
    /// precedence can't regroup it
    fn render_within(&self, parent: Joiner, out: &mut String) {
        let mixed = matches!(
            (self, parent),
            (Expr::Or(..), Joiner::And) | (Expr::And(..), Joiner::Or)
        );
        if mixed {
            out.push('(');
            self.render(out);
            out.push(')');
        } else {
            self.render(out);
        }
    }

    /// Arguments in placeholder order (left to right)
    fn collect_args(&self, out: &mut Vec<QueryArg>) {
        match self {
            Expr::Clause(clause) => out.extend(clause.operands.iter().cloned()),
            Expr::Group(inner) => inner.collect_args(out),
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_args(out);
                right.collect_args(out);
            }
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Direction {
    pub fn parse(token: &str) -> Result<Self, QueryError> {
        match token.trim().to_ascii_uppercase().as_str() {
            "ASC" | "ASCENDING" => Ok(Direction::Ascending),
            "DESC" | "DESCENDING" => Ok(Direction::Descending),
            _ => Err(QueryError::InvalidOrder(token.to_string())),
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Joiner {
    And,
    Or,
}

/// Filter and sort description for entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryQuery {
    expr: Option<Expr>,
    order: Option<Column>,
    direction: Direction,
}

impl EntryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a clause joined with `AND`
    pub fn and<I, A>(self, column: &str, operator: &str, operands: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = A>,
        A: Into<QueryArg>,
    {
        let clause = parse_clause(column, operator, operands)?;
        Ok(self.join(Joiner::And, Expr::Clause(clause)))
    }

    /// Append a clause joined with `OR`
    pub fn or<I, A>(self, column: &str, operator: &str, operands: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = A>,
        A: Into<QueryArg>,
    {
        let clause = parse_clause(column, operator, operands)?;
        Ok(self.join(Joiner::Or, Expr::Clause(clause)))
    }

    /// Append another query's expression as one group joined with `AND`
    ///
    /// The other query's ordering is ignored.
    pub fn and_inner(self, other: EntryQuery) -> Self {
        match other.expr {
            Some(expr) => self.join(Joiner::And, Expr::Group(Box::new(expr))),
            None => self,
        }
    }

    /// Append another query's expression as one group joined with `OR`
    pub fn or_inner(self, other: EntryQuery) -> Self {
        match other.expr {
            Some(expr) => self.join(Joiner::Or, Expr::Group(Box::new(expr))),
            None => self,
        }
    }

    /// Order by a sortable column
    pub fn order_by(mut self, column: &str) -> Result<Self, QueryError> {
        let parsed =
            Column::parse(column).map_err(|_| QueryError::InvalidOrder(column.to_string()))?;
        if !parsed.is_sortable() {
            return Err(QueryError::InvalidOrder(column.to_string()));
        }
        self.order = Some(parsed);
        Ok(self)
    }

    /// Set the sort direction (`ASC`/`ASCENDING`/`DESC`/`DESCENDING`)
    pub fn direction(mut self, direction: &str) -> Result<Self, QueryError> {
        self.direction = Direction::parse(direction)?;
        Ok(self)
    }

    /// The composed `WHERE` expression, `None` when no clause was added
    pub fn selection(&self) -> Option<String> {
        self.expr.as_ref().map(|expr| {
            let mut out = String::new();
            expr.render(&mut out);
            out
        })
    }

    /// Positional arguments, aligned 1:1 with the `?` placeholders
    pub fn selection_args(&self) -> Vec<QueryArg> {
        let mut args = Vec::new();
        if let Some(expr) = &self.expr {
            expr.collect_args(&mut args);
        }
        args
    }

    /// `"<column> <ASC|DESC>"`, `None` when no order column was set
    pub fn sort_order(&self) -> Option<String> {
        self.order
            .map(|column| format!("{} {}", column.name(), self.direction.as_sql()))
    }

    pub fn expr(&self) -> Option<&Expr> {
        self.expr.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.expr.is_none()
    }

    fn join(mut self, joiner: Joiner, rhs: Expr) -> Self {
        self.expr = Some(match self.expr.take() {
            None => rhs,
            Some(lhs) => match joiner {
                Joiner::And => Expr::And(Box::new(lhs), Box::new(rhs)),
                Joiner::Or => Expr::Or(Box::new(lhs), Box::new(rhs)),
            },
        });
        self
    }
}

fn parse_clause<I, A>(column: &str, operator: &str, operands: I) -> Result<Clause, QueryError>
where
    I: IntoIterator<Item = A>,
    A: Into<QueryArg>,
{
    let operator = Operator::parse(operator)?;
    let column = Column::parse(column)?;
    let operands = operands.into_iter().map(Into::into).collect();
    Clause::new(column, operator, operands)
}

/// User-facing list filter, turned into an [`EntryQuery`]
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    /// Substring matched against title or description
    pub text: Option<String>,
    /// Exact color
    pub color: Option<String>,
    /// Inclusive creation range
    pub created_between: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Sort column
    pub sort: Option<String>,
    /// Sort descending
    pub descending: bool,
}

impl EntryFilter {
    /// Whether no filtering or sorting was requested
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.color.is_none()
            && self.created_between.is_none()
            && self.sort.is_none()
    }

    pub fn to_query(&self) -> Result<EntryQuery, QueryError> {
        let mut query = EntryQuery::new();

        if let Some(text) = &self.text {
            let text_match = EntryQuery::new()
                .or("title", "LIKE", [text.as_str()])?
                .or("description", "LIKE", [text.as_str()])?;
            query = query.and_inner(text_match);
        }

        if let Some(color) = &self.color {
            query = query.and("color", "=", [color.as_str()])?;
        }

        if let Some((from, to)) = self.created_between {
            query = query.and("created", "BETWEEN", [from, to])?;
        }

        let sort = self.sort.as_deref().unwrap_or("position");
        query = query.order_by(sort)?;
        query.direction(if self.descending { "DESC" } else { "ASC" })
    }
}
