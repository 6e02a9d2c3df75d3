use super::proposal::{contact_input, second_proponent_record, titular_record};
use super::{id_value, now_timestamp, require_text, RepoError};
use crate::ast::{Direction, LogicalQuery, Table, Value};
use crate::db::{Record, RecordId};
use crate::store::Store;
use serde::Serialize;
use tracing::info;

const DEFAULT_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Client {
    pub id: Option<RecordId>,
    pub nome: String,
    pub cpf_cnpj: String,
    pub data: serde_json::Value,
    pub created_by: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Client {
    fn from_record(record: Record) -> Self {
        let data = match record.get("data") {
            Some(Value::Json(v)) => v.clone(),
            Some(Value::Text(s)) => serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({})),
            _ => serde_json::json!({}),
        };
        Self {
            nome: record.text("nome").unwrap_or_default().to_string(),
            cpf_cnpj: record.text("cpf_cnpj").unwrap_or_default().to_string(),
            created_by: record.int("created_by"),
            data,
            id: record.id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Listing parameters. Pages start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientListQuery {
    pub search: Option<String>,
    pub created_by: Option<i64>,
    pub page: u32,
    pub limit: u32,
}

impl Default for ClientListQuery {
    fn default() -> Self {
        Self {
            search: None,
            created_by: None,
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientPage {
    pub clients: Vec<Client>,
    pub total_count: u64,
    pub page: u32,
    pub limit: u32,
}

/// Fields written by [`ClientRepo::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInput {
    pub nome: String,
    pub cpf_cnpj: String,
    pub data: serde_json::Value,
    pub created_by: Option<i64>,
}

/// Clients written by [`ClientRepo::save_from_proposal`]. A slot is `None`
/// when that proponent lacked a name or document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProposalClients {
    pub titular: Option<RecordId>,
    pub segundo: Option<RecordId>,
}

pub struct ClientRepo {
    store: Store,
}

impl ClientRepo {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Apply the listing predicates shared by the page and its total.
    fn scoped(mut query: LogicalQuery, params: &ClientListQuery) -> LogicalQuery {
        if let Some(term) = &params.search {
            query = query.search(term.as_str());
        }
        if let Some(creator) = params.created_by {
            query = query.filter("created_by", creator);
        }
        query
    }

    pub async fn list(&self, params: &ClientListQuery) -> Result<ClientPage, RepoError> {
        let page = params.page.max(1);
        let limit = params.limit.max(1);

        let total_count = self
            .store
            .count(&Self::scoped(LogicalQuery::count(Table::Clients), params))
            .await?;

        let select = Self::scoped(LogicalQuery::select(Table::Clients), params)
            .order_by("nome", Direction::Asc)
            .limit(limit)
            .offset((page - 1).saturating_mul(limit));
        let clients = self
            .store
            .fetch_all(&select)
            .await?
            .into_iter()
            .map(Client::from_record)
            .collect();

        Ok(ClientPage {
            clients,
            total_count,
            page,
            limit,
        })
    }

    pub async fn count(&self) -> Result<u64, RepoError> {
        Ok(self.store.count(&LogicalQuery::count(Table::Clients)).await?)
    }

    pub async fn get(&self, id: &RecordId) -> Result<Option<Client>, RepoError> {
        let query = LogicalQuery::select(Table::Clients).filter("id", id_value(id));
        Ok(self.store.fetch_one(&query).await?.map(Client::from_record))
    }

    /// Another client holding the same document, ignoring `excluding` (the one being edited).
    pub async fn find_by_document(
        &self,
        cpf_cnpj: &str,
        excluding: Option<&RecordId>,
    ) -> Result<Option<Client>, RepoError> {
        let document = cpf_cnpj.trim();
        if document.is_empty() {
            return Ok(None);
        }
        let query = LogicalQuery::select(Table::Clients)
            .columns(["id", "nome", "cpf_cnpj"])
            .filter("cpf_cnpj", document);
        let found = self
            .store
            .fetch_all(&query)
            .await?
            .into_iter()
            .map(Client::from_record)
            .find(|c| excluding.is_none() || c.id.as_ref() != excluding);
        Ok(found)
    }

    /// Insert, or update name and data when the document already exists.
    /// Returns the identifier of the written client.
    pub async fn upsert(&self, input: &ClientInput) -> Result<Option<RecordId>, RepoError> {
        let nome = require_text("nome", &input.nome)?;
        let cpf_cnpj = require_text("cpf_cnpj", &input.cpf_cnpj)?;
        let now = now_timestamp();

        if let Some(existing) = self.find_by_document(&cpf_cnpj, None).await? {
            let Some(id) = existing.id else {
                return Err(RepoError::Invalid(format!(
                    "client with document {} has no id",
                    cpf_cnpj
                )));
            };
            let update = LogicalQuery::update(Table::Clients)
                .set("nome", nome)
                .set("data", input.data.clone())
                .set("updated_at", now)
                .filter("id", id_value(&id));
            let committed = self.store.commit(&update).await?;
            info!(id = %id, committed, "updated client");
            return Ok(committed.then_some(id));
        }

        let mut insert = LogicalQuery::insert(Table::Clients)
            .set("nome", nome)
            .set("cpf_cnpj", cpf_cnpj)
            .set("data", input.data.clone())
            .set("updated_at", now);
        if let Some(creator) = input.created_by {
            insert = insert.set("created_by", creator);
        }
        let id = self.store.insert(&insert).await?;
        info!(id = ?id, "inserted client");
        Ok(id)
    }

    /// Store the proponents of a proposal payload as clients.
    ///
    /// The titular is keyed on `cpf_cnpj_proponente`. When `has_segundo` is
    /// set the second proponent gets a client record of their own.
    pub async fn save_from_proposal(
        &self,
        payload: &serde_json::Value,
        created_by: Option<i64>,
    ) -> Result<ProposalClients, RepoError> {
        let Some(payload) = payload.as_object() else {
            return Err(RepoError::Invalid("proposal payload must be a JSON object".to_string()));
        };

        let mut saved = ProposalClients::default();
        if let Some(input) = contact_input(titular_record(payload), created_by) {
            saved.titular = self.upsert(&input).await?;
        }
        if let Some(input) = second_proponent_record(payload).and_then(|r| contact_input(r, created_by)) {
            saved.segundo = self.upsert(&input).await?;
        }
        info!(titular = ?saved.titular, segundo = ?saved.segundo, "saved proposal clients");
        Ok(saved)
    }

    pub async fn delete(&self, id: &RecordId) -> Result<bool, RepoError> {
        let query = LogicalQuery::delete(Table::Clients).filter("id", id_value(id));
        Ok(self.store.commit(&query).await?)
    }
}
