/// Logical query → parameterized SQL compiler.
///
/// Renders a `LogicalQuery` for the two relational backends. The text only
/// ever contains quoted identifiers, placeholders and integer literals; every
/// caller-supplied value travels in `params`, in the order it was declared.
use super::types::*;

/// Placeholder style of the target engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `?` placeholders, `LIKE` (SQLite).
    Sqlite,
    /// `$1..$n` placeholders, `ILIKE` (PostgreSQL).
    Postgres,
}

/// A rendered statement and its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub text: String,
    pub params: Vec<Value>,
}

struct Params {
    dialect: Dialect,
    values: Vec<Value>,
}

impl Params {
    fn bind(&mut self, value: Value) -> String {
        self.values.push(value);
        match self.dialect {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${}", self.values.len()),
        }
    }
}

/// Compile a logical query into a statement for the given dialect.
pub fn compile(query: &LogicalQuery, dialect: Dialect) -> SqlStatement {
    let mut params = Params {
        dialect,
        values: Vec::new(),
    };

    let text = match query.operation {
        Operation::Select => compile_select(query, &mut params),
        Operation::Count => compile_count(query, &mut params),
        Operation::Insert => compile_insert(query, &mut params),
        Operation::Update => compile_update(query, &mut params),
        Operation::Delete => compile_delete(query, &mut params),
    };

    SqlStatement {
        text,
        params: params.values,
    }
}

fn compile_select(query: &LogicalQuery, params: &mut Params) -> String {
    let mut parts = Vec::new();

    let projection = match &query.projection {
        Projection::All => "*".to_string(),
        Projection::Columns(cols) => cols
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
    };
    parts.push(format!("SELECT {}", projection));
    parts.push(format!("FROM {}", quote_ident(query.table.name())));

    if let Some(where_clause) = compile_where(query, params) {
        parts.push(where_clause);
    }

    if let Some(order) = &query.order {
        parts.push(format!(
            "ORDER BY {} {}",
            quote_ident(&order.column),
            order.direction.keyword()
        ));
    }

    match (query.limit, query.offset) {
        (Some(limit), Some(offset)) => {
            parts.push(format!("LIMIT {}", limit));
            parts.push(format!("OFFSET {}", offset));
        }
        (Some(limit), None) => parts.push(format!("LIMIT {}", limit)),
        (None, Some(offset)) => {
            // SQLite only accepts OFFSET after a LIMIT
            if params.dialect == Dialect::Sqlite {
                parts.push("LIMIT -1".to_string());
            }
            parts.push(format!("OFFSET {}", offset));
        }
        (None, None) => {}
    }

    parts.join(" ")
}

fn compile_count(query: &LogicalQuery, params: &mut Params) -> String {
    let mut parts = vec![format!(
        "SELECT COUNT(*) FROM {}",
        quote_ident(query.table.name())
    )];
    if let Some(where_clause) = compile_where(query, params) {
        parts.push(where_clause);
    }
    parts.join(" ")
}

fn compile_insert(query: &LogicalQuery, params: &mut Params) -> String {
    let columns: Vec<String> = query.values.iter().map(|(c, _)| quote_ident(c)).collect();
    let placeholders: Vec<String> = query
        .values
        .iter()
        .map(|(_, v)| params.bind(v.clone()))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING \"id\"",
        quote_ident(query.table.name()),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn compile_update(query: &LogicalQuery, params: &mut Params) -> String {
    let assignments: Vec<String> = query
        .values
        .iter()
        .map(|(c, v)| format!("{} = {}", quote_ident(c), params.bind(v.clone())))
        .collect();

    let mut parts = vec![
        format!("UPDATE {}", quote_ident(query.table.name())),
        format!("SET {}", assignments.join(", ")),
    ];
    if let Some(where_clause) = compile_where(query, params) {
        parts.push(where_clause);
    }
    parts.push("RETURNING \"id\"".to_string());
    parts.join(" ")
}

fn compile_delete(query: &LogicalQuery, params: &mut Params) -> String {
    let mut parts = vec![format!("DELETE FROM {}", quote_ident(query.table.name()))];
    if let Some(where_clause) = compile_where(query, params) {
        parts.push(where_clause);
    }
    parts.push("RETURNING \"id\"".to_string());
    parts.join(" ")
}

fn compile_where(query: &LogicalQuery, params: &mut Params) -> Option<String> {
    let mut conditions: Vec<String> = query
        .filters
        .iter()
        .map(|f| compile_filter(f, params))
        .collect();

    if let Some(search) = &query.search {
        if let Some(condition) = compile_search(query.table, search, params) {
            conditions.push(condition);
        }
    }

    if conditions.is_empty() {
        None
    } else {
        Some(format!("WHERE {}", conditions.join(" AND ")))
    }
}

fn compile_filter(filter: &Filter, params: &mut Params) -> String {
    match (&filter.op, &filter.value) {
        (FilterOp::Eq, Value::Null) => format!("{} IS NULL", quote_ident(&filter.column)),
        (FilterOp::Eq, value) => format!(
            "{} = {}",
            quote_ident(&filter.column),
            params.bind(value.clone())
        ),
    }
}

/// Substring match on the name column (raw term) OR the document column
/// (digits only). The document half is skipped when the term has no digits.
fn compile_search(table: Table, search: &Search, params: &mut Params) -> Option<String> {
    let (name_col, doc_col) = table.search_columns()?;
    let like = match params.dialect {
        Dialect::Sqlite => "LIKE",
        Dialect::Postgres => "ILIKE",
    };

    let name_cond = format!(
        "{} {} {} ESCAPE '\\'",
        quote_ident(name_col),
        like,
        params.bind(Value::Text(format!("%{}%", search.escaped())))
    );

    let digits = search.digits();
    if digits.is_empty() {
        return Some(format!("({})", name_cond));
    }

    let doc_cond = format!(
        "{} {} {}",
        quote_ident(doc_col),
        like,
        params.bind(Value::Text(format!("%{}%", digits)))
    );
    Some(format!("({} OR {})", name_cond, doc_cond))
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
