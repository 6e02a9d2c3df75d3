//! Fallback coordination.
//!
//! ```text
//! preferred ──ok──────────────────────────────► result
//!    │ SchemaMismatch + known column
//!    ▼
//! narrowed (column removed, once) ──ok────────► result
//!    │ Unreachable, or SchemaMismatch on REST
//!    ▼
//! fallback (caller's query, unchanged) ──ok───► result
//!    │
//!    ▼
//! error surfaced with the full trail
//! ```

use crate::ast::LogicalQuery;
use crate::db::{Backend, BackendError, BackendKind, FailureClass, Outcome};
use crate::store::trail::{Attempt, Step, Trail};
use std::time::Instant;
use tracing::{debug, warn};

/// Terminal failure: the error of the last attempt and where it happened.
#[derive(Debug)]
pub(crate) struct Failure {
    pub backend: BackendKind,
    pub error: BackendError,
    pub trail: Trail,
}

pub(crate) async fn execute(
    primary: &dyn Backend,
    fallback: Option<&dyn Backend>,
    query: &LogicalQuery,
) -> Result<(Outcome, Trail), Failure> {
    let mut trail = Trail::new();

    let mut error = match execute_once(primary, query, Step::Preferred, None, &mut trail).await {
        Ok(outcome) => return Ok((outcome, trail)),
        Err(e) => e,
    };
    let mut failed_on = primary.kind();

    if let Some((column, narrowed)) = narrowing(query, &error) {
        warn!(
            backend = %primary.kind(),
            column = %column,
            "column missing on backend, retrying without it"
        );
        match execute_once(primary, &narrowed, Step::Narrowed, Some(column), &mut trail).await {
            Ok(outcome) => return Ok((outcome, trail)),
            Err(e) => error = e,
        }
    }

    if let Some(fallback) = fallback.filter(|_| should_fall_back(primary.kind(), &error)) {
        if query.operation.is_mutation() {
            warn!(
                from = %primary.kind(),
                to = %fallback.kind(),
                operation = %query.operation,
                table = %query.table,
                "writing to fallback backend, stores may diverge"
            );
        } else {
            debug!(from = %primary.kind(), to = %fallback.kind(), "falling back");
        }
        match execute_once(fallback, query, Step::Fallback, None, &mut trail).await {
            Ok(outcome) => return Ok((outcome, trail)),
            Err(e) => {
                error = e;
                failed_on = fallback.kind();
            }
        }
    }

    Err(Failure {
        backend: failed_on,
        error,
        trail,
    })
}

/// The narrowed query, when the failure names a column the query uses and
/// removing it still leaves a safe query.
fn narrowing(query: &LogicalQuery, error: &BackendError) -> Option<(String, LogicalQuery)> {
    if error.class != FailureClass::SchemaMismatch {
        return None;
    }
    let column = error.column.as_deref()?;
    // Mutations keep their predicates, so a narrowed write touches no extra rows
    let narrowed = query.without_column(column)?;
    narrowed.validate().ok()?;
    Some((column.to_string(), narrowed))
}

fn should_fall_back(primary: BackendKind, error: &BackendError) -> bool {
    match error.class {
        FailureClass::Unreachable => true,
        FailureClass::SchemaMismatch => primary == BackendKind::Rest,
        FailureClass::ConstraintViolation | FailureClass::Unknown => false,
    }
}

/// Open, run and close on one backend, recording the attempt.
async fn execute_once(
    backend: &dyn Backend,
    query: &LogicalQuery,
    step: Step,
    dropped_column: Option<String>,
    trail: &mut Trail,
) -> Result<Outcome, BackendError> {
    let start = Instant::now();
    let result = match backend.open().await {
        Ok(mut handle) => {
            let result = handle.execute(query).await;
            handle.close().await;
            result
        }
        Err(e) => Err(e),
    };
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => debug!(
            backend = %backend.kind(),
            step = %step,
            elapsed_ms = elapsed.as_millis() as u64,
            "query succeeded"
        ),
        Err(e) => warn!(
            backend = %backend.kind(),
            step = %step,
            class = %e.class,
            error = %e.message,
            elapsed_ms = elapsed.as_millis() as u64,
            "query failed"
        ),
    }

    trail.push(Attempt {
        backend: backend.kind(),
        step,
        dropped_column,
        failure: result.as_ref().err().map(|e| (e.class, e.message.clone())),
        elapsed,
    });
    result
}
