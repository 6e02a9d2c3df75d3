use crate::ast::LogicalQuery;
use crate::db::error::BackendError;
use crate::db::normalize::{Record, RecordId};
use async_trait::async_trait;
use std::fmt;

/// The three storage engines a store can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Embedded SQLite file
    File,
    /// PostgreSQL over the wire protocol
    Network,
    /// PostgREST-style HTTP data API
    Rest,
}

impl BackendKind {
    /// Relational backends run compiled SQL; REST gets a rendered request.
    pub fn is_relational(&self) -> bool {
        matches!(self, BackendKind::File | BackendKind::Network)
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::File => "sqlite",
            BackendKind::Network => "postgres",
            BackendKind::Rest => "rest",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteAck {
    /// Rows the backend reported as touched
    pub affected: u64,
    /// Identifiers of the touched rows, as echoed by the backend
    pub ids: Vec<RecordId>,
}

impl WriteAck {
    pub fn from_ids(ids: Vec<RecordId>) -> Self {
        Self {
            affected: ids.len() as u64,
            ids,
        }
    }

    /// A write is committed only when the backend acknowledged at least one row.
    pub fn committed(&self) -> bool {
        !self.ids.is_empty()
    }
}

/// What an adapter hands back for one executed query.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rows(Vec<Record>),
    Count(u64),
    Written(WriteAck),
}

/// A configured backend. Cheap to hold; a connection exists only between
/// `open` and `close`.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Open a fresh connection or session for one operation.
    async fn open(&self) -> Result<Box<dyn BackendHandle>, BackendError>;
}

/// An open connection, scoped to a single operation.
#[async_trait]
pub trait BackendHandle: Send {
    async fn execute(&mut self, query: &LogicalQuery) -> Result<Outcome, BackendError>;

    /// Release the connection. Called on success and failure alike.
    async fn close(self: Box<Self>);
}
