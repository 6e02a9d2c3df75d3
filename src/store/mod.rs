//! The store facade: validates a logical query, runs it through the
//! fallback coordinator and hands back normalized results.

mod fallback;
mod trail;

pub use trail::{Attempt, Step, Trail};

use crate::ast::{LogicalQuery, Operation, QueryError};
use crate::config::{ConfigError, NetworkConfig, RestConfig, StoreConfig};
use crate::db::{
    Backend, BackendError, BackendKind, FailureClass, Outcome, PostgresBackend, Record, RecordId,
    RestBackend, SqliteBackend,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),
    #[error("{backend} backend failed: {source}")]
    Backend {
        backend: BackendKind,
        #[source]
        source: BackendError,
        trail: Trail,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("backend returned an unexpected result for {0}")]
    UnexpectedOutcome(Operation),
}

impl StoreError {
    /// Failure class of a backend error.
    pub fn class(&self) -> Option<FailureClass> {
        match self {
            StoreError::Backend { source, .. } => Some(source.class),
            _ => None,
        }
    }

    pub fn trail(&self) -> Option<&Trail> {
        match self {
            StoreError::Backend { trail, .. } => Some(trail),
            _ => None,
        }
    }
}

/// Result of [`Store::execute`]: what the backend returned and how it got there.
#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: Outcome,
    pub trail: Trail,
}

#[derive(Clone)]
pub struct Store {
    primary: Arc<dyn Backend>,
    fallback: Option<Arc<dyn Backend>>,
}

impl Store {
    /// Build the adapters the configuration selects.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let selection = config.selection();
        let primary = build_backend(config, selection.primary)?;
        let fallback = selection
            .fallback
            .map(|kind| build_backend(config, kind))
            .transpose()?;

        info!(
            primary = %selection.primary,
            fallback = selection.fallback.map(|k| k.label()).unwrap_or("none"),
            "store backends selected"
        );
        Ok(Self { primary, fallback })
    }

    pub fn with_backends(primary: Arc<dyn Backend>, fallback: Option<Arc<dyn Backend>>) -> Self {
        Self { primary, fallback }
    }

    pub fn primary_kind(&self) -> BackendKind {
        self.primary.kind()
    }

    pub fn fallback_kind(&self) -> Option<BackendKind> {
        self.fallback.as_ref().map(|b| b.kind())
    }

    /// Run any query and keep the attempt trail.
    pub async fn execute(&self, query: &LogicalQuery) -> Result<Execution, StoreError> {
        query.validate()?;
        match fallback::execute(self.primary.as_ref(), self.fallback.as_deref(), query).await {
            Ok((outcome, trail)) => Ok(Execution { outcome, trail }),
            Err(failure) => Err(StoreError::Backend {
                backend: failure.backend,
                source: failure.error,
                trail: failure.trail,
            }),
        }
    }

    /// Every matching record.
    pub async fn fetch_all(&self, query: &LogicalQuery) -> Result<Vec<Record>, StoreError> {
        require_operation(query, "select", |op| op == Operation::Select)?;
        match self.execute(query).await?.outcome {
            Outcome::Rows(rows) => Ok(rows),
            _ => Err(StoreError::UnexpectedOutcome(query.operation)),
        }
    }

    /// The first matching record, or `None`. Limits to one row unless the
    /// query already carries a limit.
    pub async fn fetch_one(&self, query: &LogicalQuery) -> Result<Option<Record>, StoreError> {
        require_operation(query, "select", |op| op == Operation::Select)?;
        let query = match query.limit {
            Some(_) => query.clone(),
            None => query.clone().limit(1),
        };
        Ok(self.fetch_all(&query).await?.into_iter().next())
    }

    pub async fn count(&self, query: &LogicalQuery) -> Result<u64, StoreError> {
        require_operation(query, "count", |op| op == Operation::Count)?;
        match self.execute(query).await?.outcome {
            Outcome::Count(n) => Ok(n),
            _ => Err(StoreError::UnexpectedOutcome(query.operation)),
        }
    }

    /// Run a mutation. `true` only when the backend acknowledged at least one row.
    pub async fn commit(&self, query: &LogicalQuery) -> Result<bool, StoreError> {
        require_operation(query, "mutation", |op| op.is_mutation())?;
        match self.execute(query).await?.outcome {
            Outcome::Written(ack) => Ok(ack.committed()),
            _ => Err(StoreError::UnexpectedOutcome(query.operation)),
        }
    }

    /// Run an insert and return the new record's identifier.
    pub async fn insert(&self, query: &LogicalQuery) -> Result<Option<RecordId>, StoreError> {
        require_operation(query, "insert", |op| op == Operation::Insert)?;
        match self.execute(query).await?.outcome {
            Outcome::Written(ack) => Ok(ack.ids.into_iter().next()),
            _ => Err(StoreError::UnexpectedOutcome(query.operation)),
        }
    }
}

fn require_operation(
    query: &LogicalQuery,
    expected: &'static str,
    accepts: impl Fn(Operation) -> bool,
) -> Result<(), QueryError> {
    if accepts(query.operation) {
        Ok(())
    } else {
        Err(QueryError::WrongOperation {
            expected,
            found: query.operation,
        })
    }
}

fn build_backend(config: &StoreConfig, kind: BackendKind) -> Result<Arc<dyn Backend>, StoreError> {
    let missing = |what: &str| ConfigError::Invalid(format!("{} backend selected but not configured", what));
    let backend: Arc<dyn Backend> = match kind {
        BackendKind::File => Arc::new(SqliteBackend::new(
            config.sqlite_path.clone(),
            config.admin.clone(),
        )),
        BackendKind::Network => {
            let network: &NetworkConfig = config.network.as_ref().ok_or_else(|| missing("postgres"))?;
            Arc::new(PostgresBackend::new(network.clone(), config.admin.clone()))
        }
        BackendKind::Rest => {
            let rest: &RestConfig = config.rest.as_ref().ok_or_else(|| missing("rest"))?;
            let backend = RestBackend::new(rest.clone()).map_err(|e| ConfigError::Invalid(e.message))?;
            Arc::new(backend)
        }
    };
    Ok(backend)
}
