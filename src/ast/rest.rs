/// Logical query → REST resource request.
///
/// Targets a PostgREST-style data API: the table is the resource path and
/// predicates travel in the query string as `column=op.value` pairs.
/// There is no server-side count; Count asks for the id column only and the
/// adapter measures the returned collection.
use super::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl RestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestMethod::Get => "GET",
            RestMethod::Post => "POST",
            RestMethod::Patch => "PATCH",
            RestMethod::Delete => "DELETE",
        }
    }
}

/// A rendered request. `query` pairs are kept unencoded; use
/// [`RestRequest::path_and_query`] for the wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: RestMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Ask the server to echo the touched rows (`Prefer: return=representation`).
    pub return_representation: bool,
}

impl RestRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string())
        }
    }
}

/// Render a logical query as a REST request.
pub fn render(query: &LogicalQuery) -> RestRequest {
    let path = format!("/{}", query.table.name());
    let mut pairs = Vec::new();

    match query.operation {
        Operation::Select => {
            pairs.push(("select".to_string(), render_projection(&query.projection)));
            push_predicates(query, &mut pairs);
            if let Some(order) = &query.order {
                let dir = match order.direction {
                    Direction::Asc => "asc",
                    Direction::Desc => "desc",
                };
                pairs.push(("order".to_string(), format!("{}.{}", order.column, dir)));
            }
            if let Some(limit) = query.limit {
                pairs.push(("limit".to_string(), limit.to_string()));
            }
            if let Some(offset) = query.offset {
                pairs.push(("offset".to_string(), offset.to_string()));
            }
            RestRequest {
                method: RestMethod::Get,
                path,
                query: pairs,
                body: None,
                return_representation: false,
            }
        }
        Operation::Count => {
            pairs.push(("select".to_string(), "id".to_string()));
            push_predicates(query, &mut pairs);
            RestRequest {
                method: RestMethod::Get,
                path,
                query: pairs,
                body: None,
                return_representation: false,
            }
        }
        Operation::Insert => RestRequest {
            method: RestMethod::Post,
            path,
            query: pairs,
            body: Some(render_body(&query.values)),
            return_representation: true,
        },
        Operation::Update => {
            push_predicates(query, &mut pairs);
            RestRequest {
                method: RestMethod::Patch,
                path,
                query: pairs,
                body: Some(render_body(&query.values)),
                return_representation: true,
            }
        }
        Operation::Delete => {
            push_predicates(query, &mut pairs);
            RestRequest {
                method: RestMethod::Delete,
                path,
                query: pairs,
                body: None,
                return_representation: true,
            }
        }
    }
}

fn render_projection(projection: &Projection) -> String {
    match projection {
        Projection::All => "*".to_string(),
        Projection::Columns(cols) => cols.join(","),
    }
}

fn render_body(values: &[(String, Value)]) -> serde_json::Value {
    let object: serde_json::Map<String, serde_json::Value> = values
        .iter()
        .map(|(c, v)| (c.clone(), v.to_json()))
        .collect();
    serde_json::Value::Object(object)
}

fn push_predicates(query: &LogicalQuery, pairs: &mut Vec<(String, String)>) {
    for filter in &query.filters {
        let rendered = match (&filter.op, &filter.value) {
            (FilterOp::Eq, Value::Null) => "is.null".to_string(),
            (FilterOp::Eq, value) => format!("eq.{}", value.display()),
        };
        pairs.push((filter.column.clone(), rendered));
    }

    if let (Some(search), Some((name_col, doc_col))) = (&query.search, query.table.search_columns())
    {
        // `*` is the API's wildcard and has no escape; `_` stands in for it
        let pattern = search.escaped().replace('*', "_");
        let mut conditions = vec![format!(
            "{}.ilike.{}",
            name_col,
            quote_operand(&format!("*{}*", pattern))
        )];
        let digits = search.digits();
        if !digits.is_empty() {
            conditions.push(format!("{}.ilike.*{}*", doc_col, digits));
        }
        pairs.push(("or".to_string(), format!("({})", conditions.join(","))));
    }
}

/// Operands inside a logic tree are double-quoted when they contain
/// characters the tree grammar reserves.
fn quote_operand(operand: &str) -> String {
    if operand.contains([',', '.', ':', '(', ')', '"', '\\']) {
        format!(
            "\"{}\"",
            operand.replace('\\', "\\\\").replace('"', "\\\"")
        )
    } else {
        operand.to_string()
    }
}
