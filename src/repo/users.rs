use super::{id_value, now_timestamp, require_text, RepoError};
use crate::ast::{Direction, LogicalQuery, Table};
use crate::db::{Record, RecordId};
use crate::store::Store;
use serde::Serialize;

const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: Option<RecordId>,
    pub nome: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl User {
    fn from_record(record: Record) -> Self {
        Self {
            nome: record.text("nome").unwrap_or_default().to_string(),
            username: record.text("username").unwrap_or_default().to_string(),
            password_hash: record.text("password_hash").unwrap_or_default().to_string(),
            role: record.text("role").unwrap_or(DEFAULT_ROLE).to_string(),
            id: record.id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserInput {
    pub nome: String,
    pub username: String,
    pub password_hash: String,
    /// Defaults to `user`
    pub role: Option<String>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserUpdate {
    pub nome: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<String>,
}

pub struct UserRepo {
    store: Store,
}

impl UserRepo {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<User>, RepoError> {
        let query = LogicalQuery::select(Table::Users).order_by("nome", Direction::Asc);
        Ok(self
            .store
            .fetch_all(&query)
            .await?
            .into_iter()
            .map(User::from_record)
            .collect())
    }

    pub async fn get(&self, id: &RecordId) -> Result<Option<User>, RepoError> {
        let query = LogicalQuery::select(Table::Users).filter("id", id_value(id));
        Ok(self.store.fetch_one(&query).await?.map(User::from_record))
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        let username = username.trim();
        if username.is_empty() {
            return Ok(None);
        }
        let query = LogicalQuery::select(Table::Users).filter("username", username);
        Ok(self.store.fetch_one(&query).await?.map(User::from_record))
    }

    pub async fn create(&self, input: &UserInput) -> Result<Option<RecordId>, RepoError> {
        let query = LogicalQuery::insert(Table::Users)
            .set("nome", require_text("nome", &input.nome)?)
            .set("username", require_text("username", &input.username)?)
            .set("password_hash", require_text("password_hash", &input.password_hash)?)
            .set("role", input.role.as_deref().unwrap_or(DEFAULT_ROLE));
        Ok(self.store.insert(&query).await?)
    }

    pub async fn update(&self, id: &RecordId, changes: &UserUpdate) -> Result<bool, RepoError> {
        let mut query = LogicalQuery::update(Table::Users).filter("id", id_value(id));
        if let Some(nome) = &changes.nome {
            query = query.set("nome", require_text("nome", nome)?);
        }
        if let Some(hash) = &changes.password_hash {
            query = query.set("password_hash", require_text("password_hash", hash)?);
        }
        if let Some(role) = &changes.role {
            query = query.set("role", require_text("role", role)?);
        }
        if query.values.is_empty() {
            return Err(RepoError::Invalid("no fields to update".into()));
        }
        query = query.set("updated_at", now_timestamp());
        Ok(self.store.commit(&query).await?)
    }

    pub async fn delete(&self, id: &RecordId) -> Result<bool, RepoError> {
        let query = LogicalQuery::delete(Table::Users).filter("id", id_value(id));
        Ok(self.store.commit(&query).await?)
    }
}
