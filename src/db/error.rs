use regex::Regex;
use std::error::Error as StdError;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Coarse failure classes the fallback coordinator decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network/socket level failure, backend not reachable
    Unreachable,
    /// Referenced column or table absent from the live schema
    SchemaMismatch,
    /// Uniqueness or NOT NULL violation
    ConstraintViolation,
    /// Unclassified driver error
    Unknown,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Unreachable => write!(f, "Unreachable"),
            FailureClass::SchemaMismatch => write!(f, "Schema Mismatch"),
            FailureClass::ConstraintViolation => write!(f, "Constraint Violation"),
            FailureClass::Unknown => write!(f, "Error"),
        }
    }
}

/// Structured failure returned by every adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class}: {message}")]
pub struct BackendError {
    pub class: FailureClass,
    /// Backend diagnostic, as reported by the driver or server
    pub message: String,
    /// SQLSTATE or API error code, when the backend supplied one
    pub code: Option<String>,
    /// Column named by a schema mismatch, used to narrow the query
    pub column: Option<String>,
}

impl BackendError {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            code: None,
            column: None,
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Unreachable, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Unknown, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach the offending column when one can be read from the message.
    fn with_column_from_message(mut self) -> Self {
        if self.class == FailureClass::SchemaMismatch {
            self.column = missing_column(&self.message);
        }
        self
    }

    /// Classify a tokio-postgres error by SQLSTATE.
    pub fn from_pg_error(err: &tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code().to_string();
            let mut message = db_err.message().to_string();
            if let Some(detail) = db_err.detail() {
                message = format!("{} ({})", message, detail);
            }
            let mut error = BackendError::new(categorize_sqlstate(&code), message).with_code(code);
            error.column = db_err
                .column()
                .map(str::to_string)
                .or_else(|| missing_column(db_err.message()));
            if error.class != FailureClass::SchemaMismatch {
                error.column = None;
            }
            error
        } else if err.is_closed() || is_pg_transport_failure(&err.to_string()) {
            BackendError::unreachable(describe(err))
        } else {
            BackendError::unknown(err.to_string())
        }
    }

    /// Classify a rusqlite error by extended code and message.
    pub fn from_sqlite_error(err: &rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err {
            rusqlite::Error::SqliteFailure(failure, msg) => {
                let message = msg.clone().unwrap_or_else(|| err.to_string());
                let class = match failure.code {
                    ErrorCode::ConstraintViolation => FailureClass::ConstraintViolation,
                    ErrorCode::CannotOpen
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::NotADatabase
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::PermissionDenied => FailureClass::Unreachable,
                    _ if is_sqlite_schema_message(&message) => FailureClass::SchemaMismatch,
                    _ => FailureClass::Unknown,
                };
                BackendError::new(class, message)
                    .with_code(failure.extended_code.to_string())
                    .with_column_from_message()
            }
            other => {
                let message = other.to_string();
                let class = if is_sqlite_schema_message(&message) {
                    FailureClass::SchemaMismatch
                } else {
                    FailureClass::Unknown
                };
                BackendError::new(class, message).with_column_from_message()
            }
        }
    }

    /// Classify a transport-level reqwest error.
    pub fn from_reqwest_error(err: &reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            BackendError::unreachable(describe(err))
        } else {
            BackendError::unknown(describe(err))
        }
    }

    /// Classify a non-2xx REST response from its status and JSON error body.
    pub fn from_rest_response(status: u16, body: &str) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
        let field = |name: &str| {
            parsed
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let code = field("code");
        let mut message = field("message").unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty response body".to_string()
            } else {
                trimmed.to_string()
            }
        });
        if let Some(details) = field("details") {
            message = format!("{} ({})", message, details);
        }

        let class = match code.as_deref() {
            Some("42703" | "42P01" | "PGRST204" | "PGRST205" | "PGRST200") => {
                FailureClass::SchemaMismatch
            }
            Some(c) if c.starts_with("23") => FailureClass::ConstraintViolation,
            Some(c) if c.starts_with("08") => FailureClass::Unreachable,
            _ => match status {
                409 => FailureClass::ConstraintViolation,
                408 | 502 | 503 | 504 => FailureClass::Unreachable,
                _ => FailureClass::Unknown,
            },
        };

        let mut error = BackendError::new(class, format!("HTTP {}: {}", status, message))
            .with_column_from_message();
        error.code = code;
        error
    }
}

/// Render an error with its source chain.
fn describe(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

/// Categorize a SQLSTATE code into a FailureClass.
fn categorize_sqlstate(code: &str) -> FailureClass {
    if code.len() < 2 {
        return FailureClass::Unknown;
    }
    match code {
        // 42703 = undefined_column, 42P01 = undefined_table
        "42703" | "42P01" => return FailureClass::SchemaMismatch,
        _ => {}
    }
    match &code[..2] {
        // Class 23: Integrity Constraint Violation
        "23" => FailureClass::ConstraintViolation,
        // Class 08: Connection Exception
        "08" => FailureClass::Unreachable,
        // Class 57: Operator Intervention (admin shutdown, cannot connect now)
        "57" => FailureClass::Unreachable,
        // Class 53: Insufficient Resources (too many connections)
        "53" => FailureClass::Unreachable,
        _ => FailureClass::Unknown,
    }
}

/// Non-database tokio-postgres errors that mean the server could not be reached.
fn is_pg_transport_failure(message: &str) -> bool {
    [
        "error connecting to server",
        "error communicating with the server",
        "error performing TLS handshake",
        "connection closed",
        "timeout waiting for server",
    ]
    .iter()
    .any(|prefix| message.starts_with(prefix))
}

fn is_sqlite_schema_message(message: &str) -> bool {
    message.contains("no such column")
        || message.contains("has no column named")
        || message.contains("no such table")
}

static COLUMN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // SQLite
        r"no such column: (?:\w+\.)?(\w+)",
        r"has no column named (\w+)",
        // PostgreSQL, quoted or table-qualified
        r#"column "?(?:\w+\.)?(\w+)"? (?:of relation "?\w+"? )?does not exist"#,
        // PostgREST schema cache
        r"Could not find the '(\w+)' column",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Extract the column name from a "missing column" diagnostic.
pub fn missing_column(message: &str) -> Option<String> {
    COLUMN_PATTERNS
        .iter()
        .find_map(|re| re.captures(message))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
