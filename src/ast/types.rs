//! Logical query types for propstore.
//!
//! A `LogicalQuery` is the one description of a data operation shared by
//! every backend. Callers build it through the constructors and chained
//! setters below; translators in `compiler` and `rest` render it into the
//! native form of each backend. Nothing here is ever parsed from text.

use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Kind of data operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Count,
}

impl Operation {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Operation::Insert | Operation::Update | Operation::Delete
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Select => write!(f, "select"),
            Operation::Insert => write!(f, "insert"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::Count => write!(f, "count"),
        }
    }
}

/// Tables known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Clients,
    Users,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Clients => "clients",
            Table::Users => "users",
        }
    }

    /// Name-like and identifier-like columns used by free-text search.
    pub fn search_columns(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Table::Clients => Some(("nome", "cpf_cnpj")),
            Table::Users => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed scalar (or opaque JSON blob) carried by filters, values and records.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl Value {
    pub fn display(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Json(j) => j.to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Json(j) => j.clone(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Filter comparison. Only equality exists; search is modelled separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
}

/// `column = value` predicate. All filters are joined with AND.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

/// Free-text search over the table's name and document columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    pub term: String,
}

impl Search {
    /// The term with every non-digit removed, matched against the document column.
    pub fn digits(&self) -> String {
        self.term.chars().filter(|c| c.is_ascii_digit()).collect()
    }

    /// The term with `LIKE` wildcards escaped by a backslash, so it only
    /// ever matches itself.
    pub fn escaped(&self) -> String {
        let mut out = String::with_capacity(self.term.len());
        for c in self.term.chars() {
            if matches!(c, '\\' | '%' | '_') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn keyword(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

/// Backend-agnostic description of one data operation.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalQuery {
    pub operation: Operation,
    pub table: Table,
    pub filters: Vec<Filter>,
    pub search: Option<Search>,
    pub projection: Projection,
    pub order: Option<OrderBy>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Column values for Insert/Update, in declaration order.
    pub values: Vec<(String, Value)>,
}

/// Errors raised when a query is handed to the store in an unusable shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("invalid column name {0:?}")]
    InvalidColumn(String),
    #[error("{0} requires at least one column value")]
    MissingValues(Operation),
    #[error("{0} without filters is refused")]
    Unfiltered(Operation),
    #[error("table {0} has no searchable columns")]
    SearchUnsupported(Table),
    #[error("expected a {expected} query, got {found}")]
    WrongOperation {
        expected: &'static str,
        found: Operation,
    },
}

impl LogicalQuery {
    fn new(operation: Operation, table: Table) -> Self {
        Self {
            operation,
            table,
            filters: Vec::new(),
            search: None,
            projection: Projection::All,
            order: None,
            limit: None,
            offset: None,
            values: Vec::new(),
        }
    }

    pub fn select(table: Table) -> Self {
        Self::new(Operation::Select, table)
    }

    pub fn insert(table: Table) -> Self {
        Self::new(Operation::Insert, table)
    }

    pub fn update(table: Table) -> Self {
        Self::new(Operation::Update, table)
    }

    pub fn delete(table: Table) -> Self {
        Self::new(Operation::Delete, table)
    }

    pub fn count(table: Table) -> Self {
        Self::new(Operation::Count, table)
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.into(),
        });
        self
    }

    /// Adds a free-text search. Blank terms are ignored.
    pub fn search(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        let trimmed = term.trim();
        self.search = if trimmed.is_empty() {
            None
        } else {
            Some(Search {
                term: trimmed.to_string(),
            })
        };
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Projection::Columns(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order = Some(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sets a column value for Insert/Update. A repeated column replaces the earlier value.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.values.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
        self
    }

    /// Checks the query is renderable and safe to send to a backend.
    pub fn validate(&self) -> Result<(), QueryError> {
        for column in self.referenced_columns() {
            if !is_identifier(column) {
                return Err(QueryError::InvalidColumn(column.to_string()));
            }
        }

        if self.search.is_some() && self.table.search_columns().is_none() {
            return Err(QueryError::SearchUnsupported(self.table));
        }

        match self.operation {
            Operation::Insert if self.values.is_empty() => {
                Err(QueryError::MissingValues(self.operation))
            }
            Operation::Update if self.values.is_empty() => {
                Err(QueryError::MissingValues(self.operation))
            }
            Operation::Update | Operation::Delete
                if self.filters.is_empty() && self.search.is_none() =>
            {
                Err(QueryError::Unfiltered(self.operation))
            }
            _ => Ok(()),
        }
    }

    /// Every column name this query mentions, in no particular order.
    pub fn referenced_columns(&self) -> impl Iterator<Item = &str> {
        let projected: &[String] = match &self.projection {
            Projection::All => &[],
            Projection::Columns(cols) => cols,
        };
        self.filters
            .iter()
            .map(|f| f.column.as_str())
            .chain(self.values.iter().map(|(c, _)| c.as_str()))
            .chain(projected.iter().map(String::as_str))
            .chain(self.order.iter().map(|o| o.column.as_str()))
    }

    /// Returns this query with every reference to `column` removed, or `None`
    /// when the query never mentioned it.
    ///
    /// Writes only lose value and projection columns. A mutation whose
    /// filters or search use `column` is never narrowed, since the retry
    /// would touch rows the caller excluded.
    pub fn without_column(&self, column: &str) -> Option<LogicalQuery> {
        if self.operation.is_mutation() && self.predicates_use(column) {
            return None;
        }

        let mut narrowed = self.clone();
        let mut removed = false;

        let before = narrowed.filters.len();
        narrowed.filters.retain(|f| f.column != column);
        removed |= narrowed.filters.len() != before;

        let before = narrowed.values.len();
        narrowed.values.retain(|(c, _)| c != column);
        removed |= narrowed.values.len() != before;

        if let Projection::Columns(cols) = &mut narrowed.projection {
            let before = cols.len();
            cols.retain(|c| c != column);
            removed |= cols.len() != before;
            if cols.is_empty() {
                narrowed.projection = Projection::All;
            }
        }

        if narrowed.order.as_ref().is_some_and(|o| o.column == column) {
            narrowed.order = None;
            removed = true;
        }

        if let (Some(_), Some((name_col, doc_col))) =
            (&narrowed.search, narrowed.table.search_columns())
        {
            if column == name_col || column == doc_col {
                narrowed.search = None;
                removed = true;
            }
        }

        removed.then_some(narrowed)
    }

    /// Whether a filter or the search condition reads `column`.
    fn predicates_use(&self, column: &str) -> bool {
        if self.filters.iter().any(|f| f.column == column) {
            return true;
        }
        match (&self.search, self.table.search_columns()) {
            (Some(_), Some((name_col, doc_col))) => column == name_col || column == doc_col,
            _ => false,
        }
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_digits_strips_formatting() {
        let q = LogicalQuery::select(Table::Clients).search(" 111.222.333-44 ");
        assert_eq!(q.search.as_ref().unwrap().term, "111.222.333-44");
        assert_eq!(q.search.unwrap().digits(), "11122233344");
    }

    #[test]
    fn test_search_escapes_wildcards() {
        let q = LogicalQuery::select(Table::Clients).search(r"50%_a\b");
        assert_eq!(q.search.unwrap().escaped(), r"50\%\_a\\b");
    }

    #[test]
    fn test_blank_search_is_dropped() {
        let q = LogicalQuery::select(Table::Clients).search("   ");
        assert!(q.search.is_none());
    }

    #[test]
    fn test_set_replaces_existing_value() {
        let q = LogicalQuery::insert(Table::Clients)
            .set("nome", "A")
            .set("cpf_cnpj", "1")
            .set("nome", "B");
        assert_eq!(q.values.len(), 2);
        assert_eq!(q.values[0], ("nome".to_string(), Value::from("B")));
    }

    #[test]
    fn test_validate_rejects_bad_identifier() {
        let q = LogicalQuery::select(Table::Clients).filter("nome; DROP", "x");
        assert_eq!(
            q.validate(),
            Err(QueryError::InvalidColumn("nome; DROP".to_string()))
        );
    }

    #[test]
    fn test_validate_mutations() {
        assert_eq!(
            LogicalQuery::insert(Table::Clients).validate(),
            Err(QueryError::MissingValues(Operation::Insert))
        );
        assert_eq!(
            LogicalQuery::delete(Table::Clients).validate(),
            Err(QueryError::Unfiltered(Operation::Delete))
        );
        assert_eq!(
            LogicalQuery::update(Table::Users).set("role", "admin").validate(),
            Err(QueryError::Unfiltered(Operation::Update))
        );
        assert!(LogicalQuery::delete(Table::Clients)
            .filter("id", 3)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_search_on_users() {
        let q = LogicalQuery::select(Table::Users).search("ana");
        assert_eq!(q.validate(), Err(QueryError::SearchUnsupported(Table::Users)));
    }

    #[test]
    fn test_without_column_drops_every_reference() {
        let q = LogicalQuery::select(Table::Clients)
            .filter("created_by", 7)
            .filter("nome", "Ana")
            .columns(["id", "created_by"])
            .order_by("created_by", Direction::Desc);

        let narrowed = q.without_column("created_by").unwrap();
        assert_eq!(narrowed.filters.len(), 1);
        assert_eq!(narrowed.filters[0].column, "nome");
        assert_eq!(narrowed.projection, Projection::Columns(vec!["id".into()]));
        assert!(narrowed.order.is_none());
    }

    #[test]
    fn test_without_column_untouched_query() {
        let q = LogicalQuery::select(Table::Clients).filter("nome", "Ana");
        assert!(q.without_column("created_by").is_none());
    }

    #[test]
    fn test_without_column_projection_falls_back_to_all() {
        let q = LogicalQuery::select(Table::Clients).columns(["created_by"]);
        let narrowed = q.without_column("created_by").unwrap();
        assert_eq!(narrowed.projection, Projection::All);
    }

    #[test]
    fn test_without_column_drops_search() {
        let q = LogicalQuery::count(Table::Clients).search("maria");
        let narrowed = q.without_column("cpf_cnpj").unwrap();
        assert!(narrowed.search.is_none());
    }

    #[test]
    fn test_without_column_keeps_mutation_predicates() {
        let delete = LogicalQuery::delete(Table::Clients)
            .filter("nome", "Ana")
            .filter("created_by", 7);
        assert_eq!(delete.without_column("created_by"), None);

        let update = LogicalQuery::update(Table::Clients)
            .set("nome", "Ana")
            .search("maria");
        assert_eq!(update.without_column("nome"), None);

        let update = LogicalQuery::update(Table::Clients)
            .set("created_by", 7)
            .set("nome", "Ana")
            .filter("id", 1);
        let narrowed = update.without_column("created_by").unwrap();
        assert_eq!(narrowed.values.len(), 1);
        assert_eq!(narrowed.filters, update.filters);
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("cpf_cnpj"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(Value::Int(3).to_json(), serde_json::json!(3));
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(
            Value::from(Some("x")).to_json(),
            serde_json::Value::String("x".into())
        );
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }
}
