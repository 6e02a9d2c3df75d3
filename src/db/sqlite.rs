//! Embedded SQLite adapter.

use crate::ast::{compile, Dialect, LogicalQuery, Operation, SqlStatement, Value};
use crate::config::AdminSeed;
use crate::db::backend::{Backend, BackendHandle, BackendKind, Outcome, WriteAck};
use crate::db::error::BackendError;
use crate::db::normalize::{record_from_sqlite_row, RecordId};
use crate::db::schema::bootstrap_sqlite;
use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::{spawn_blocking, JoinError};
use tracing::{debug, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteBackend {
    path: PathBuf,
    admin: AdminSeed,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>, admin: AdminSeed) -> Self {
        Self {
            path: path.into(),
            admin,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Create parent directories, open the file and bring the schema up to date.
fn open_connection(path: &Path, admin: &AdminSeed) -> Result<Connection, BackendError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BackendError::unreachable(format!(
                    "cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let conn = Connection::open(path).map_err(|e| {
        let mut err = BackendError::from_sqlite_error(&e);
        err.message = format!("{} ({})", err.message, path.display());
        err
    })?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| BackendError::from_sqlite_error(&e))?;
    bootstrap_sqlite(&conn, admin).map_err(|e| BackendError::from_sqlite_error(&e))?;
    Ok(conn)
}

fn task_failed(err: JoinError) -> BackendError {
    BackendError::unknown(format!("sqlite task failed: {}", err))
}

#[async_trait]
impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    async fn open(&self) -> Result<Box<dyn BackendHandle>, BackendError> {
        let path = self.path.clone();
        let admin = self.admin.clone();
        let conn = spawn_blocking(move || open_connection(&path, &admin))
            .await
            .map_err(task_failed)??;
        debug!(path = %self.path.display(), "opened sqlite database");
        Ok(Box::new(SqliteHandle { conn: Some(conn) }))
    }
}

/// Open SQLite connection. Statements run on the blocking pool; the
/// connection travels to the worker and back for each one.
pub struct SqliteHandle {
    conn: Option<Connection>,
}

#[async_trait]
impl BackendHandle for SqliteHandle {
    async fn execute(&mut self, query: &LogicalQuery) -> Result<Outcome, BackendError> {
        let statement = compile(query, Dialect::Sqlite);
        debug!(sql = %statement.text, params = statement.params.len(), "executing on sqlite");

        let conn = self
            .conn
            .take()
            .ok_or_else(|| BackendError::unknown("sqlite connection was lost by an earlier statement"))?;
        let operation = query.operation;
        let (conn, result) = spawn_blocking(move || {
            let result = run(&conn, operation, &statement);
            (conn, result)
        })
        .await
        .map_err(task_failed)?;
        self.conn = Some(conn);
        result.map_err(|e| BackendError::from_sqlite_error(&e))
    }

    async fn close(self: Box<Self>) {
        let Some(conn) = self.conn else {
            return;
        };
        match spawn_blocking(move || conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err((_, e))) => warn!(error = %e, "failed to close sqlite connection"),
            Err(e) => warn!(error = %e, "sqlite close task failed"),
        }
    }
}

fn run(conn: &Connection, operation: Operation, statement: &SqlStatement) -> rusqlite::Result<Outcome> {
    let mut stmt = conn.prepare(&statement.text)?;
    let params = params_from_iter(statement.params.iter());

    match operation {
        Operation::Count => {
            let count: i64 = stmt.query_row(params, |row| row.get(0))?;
            Ok(Outcome::Count(count.max(0) as u64))
        }
        Operation::Select => {
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = stmt.query(params)?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(record_from_sqlite_row(row, &columns)?);
            }
            Ok(Outcome::Rows(records))
        }
        Operation::Insert | Operation::Update | Operation::Delete => {
            let mut rows = stmt.query(params)?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                match row.get_ref(0)? {
                    ValueRef::Integer(i) => ids.push(RecordId::Int(i)),
                    ValueRef::Text(t) => ids.push(RecordId::Text(String::from_utf8_lossy(t).into_owned())),
                    _ => {}
                }
            }
            Ok(Outcome::Written(WriteAck::from_ids(ids)))
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Bool(b) => ToSqlOutput::from(*b),
            Value::Int(i) => ToSqlOutput::from(*i),
            Value::Float(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            // JSON documents are stored as text
            Value::Json(v) => ToSqlOutput::from(v.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Table;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> SqliteBackend {
        SqliteBackend::new(dir.path().join("nested").join("store.db"), AdminSeed::default())
    }

    async fn exec(backend: &SqliteBackend, query: LogicalQuery) -> Result<Outcome, BackendError> {
        let mut handle = backend.open().await?;
        let result = handle.execute(&query).await;
        handle.close().await;
        result
    }

    #[tokio::test]
    async fn test_open_creates_file_and_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        assert!(!backend.path().exists());
        let handle = backend.open().await.unwrap();
        handle.close().await;
        assert!(backend.path().exists());
    }

    #[tokio::test]
    async fn test_insert_returns_generated_id() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        let outcome = exec(
            &backend,
            LogicalQuery::insert(Table::Clients)
                .set("nome", "Maria Silva")
                .set("cpf_cnpj", "111.222.333-44")
                .set("data", serde_json::json!({"tipo": "PF"})),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Written(WriteAck::from_ids(vec![RecordId::Int(1)])));

        let Outcome::Rows(rows) = exec(&backend, LogicalQuery::select(Table::Clients))
            .await
            .unwrap()
        else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("data"), Some(&Value::Json(serde_json::json!({"tipo": "PF"}))));
        assert!(rows[0].created_at.as_deref().is_some_and(|ts| ts.contains('T')));
    }

    #[tokio::test]
    async fn test_count_includes_seeded_admin() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        assert_eq!(
            exec(&backend, LogicalQuery::count(Table::Users)).await.unwrap(),
            Outcome::Count(1)
        );
    }

    #[tokio::test]
    async fn test_update_without_match_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        let outcome = exec(
            &backend,
            LogicalQuery::update(Table::Clients)
                .set("nome", "Nobody")
                .filter("id", 42),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Written(WriteAck::default()));
    }

    #[tokio::test]
    async fn test_unknown_column_is_schema_mismatch() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        let err = exec(
            &backend,
            LogicalQuery::insert(Table::Clients)
                .set("nome", "Ana")
                .set("cpf_cnpj", "1")
                .set("apelido", "x"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.class, crate::db::FailureClass::SchemaMismatch);
        assert_eq!(err.column.as_deref(), Some("apelido"));
    }

    #[tokio::test]
    async fn test_uncreatable_directory_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let backend = SqliteBackend::new(blocker.join("store.db"), AdminSeed::default());
        let err = backend.open().await.err().unwrap();
        assert_eq!(err.class, crate::db::FailureClass::Unreachable);
    }

    #[tokio::test]
    async fn test_busy_database_does_not_stall_the_runtime() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(backend(&dir));
        exec(&backend, LogicalQuery::count(Table::Clients)).await.unwrap();

        let locker = Connection::open(backend.path()).unwrap();
        locker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let writer = {
            let backend = backend.clone();
            tokio::spawn(async move {
                exec(
                    &backend,
                    LogicalQuery::insert(Table::Clients)
                        .set("nome", "Ana")
                        .set("cpf_cnpj", "1"),
                )
                .await
            })
        };

        // The writer waits on the lock without holding the only runtime thread
        let start = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(start.elapsed() < Duration::from_secs(2));

        locker.execute_batch("COMMIT").unwrap();
        let outcome = writer.await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::Written(ack) if ack.committed()));
    }
}
