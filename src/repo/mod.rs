//! Typed repositories over the store, one per table.

mod clients;
mod proposal;
mod users;

pub use clients::{Client, ClientInput, ClientListQuery, ClientPage, ClientRepo, ProposalClients};
pub use users::{User, UserInput, UserRepo, UserUpdate};

use crate::db::RecordId;
use crate::store::StoreError;
use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid input: {0}")]
    Invalid(String),
}

/// Wall-clock timestamp in the shape every backend accepts for `updated_at`.
fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn require_text(field: &str, value: &str) -> Result<String, RepoError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(RepoError::Invalid(format!("{} must not be empty", field)))
    } else {
        Ok(trimmed.to_string())
    }
}

fn id_value(id: &RecordId) -> crate::ast::Value {
    id.clone().into()
}
