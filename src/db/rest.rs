//! PostgREST-style HTTP adapter.

use crate::ast::{render, LogicalQuery, Operation, RestMethod, RestRequest};
use crate::config::RestConfig;
use crate::db::backend::{Backend, BackendHandle, BackendKind, Outcome, WriteAck};
use crate::db::error::BackendError;
use crate::db::normalize::{record_from_json, Record};
use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::debug;

pub struct RestBackend {
    config: RestConfig,
    client: Client,
}

impl RestBackend {
    pub fn new(config: RestConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| BackendError::unknown(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Absolute URL for a rendered request.
    pub fn url_for(&self, request: &RestRequest) -> String {
        request_url(&self.config, request)
    }
}

#[async_trait]
impl Backend for RestBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Rest
    }

    /// HTTP is sessionless; the handle only carries the shared client.
    async fn open(&self) -> Result<Box<dyn BackendHandle>, BackendError> {
        Ok(Box::new(RestHandle {
            client: self.client.clone(),
            config: self.config.clone(),
        }))
    }
}

pub struct RestHandle {
    client: Client,
    config: RestConfig,
}

impl RestHandle {
    async fn send(&self, request: &RestRequest) -> Result<Vec<Record>, BackendError> {
        let url = request_url(&self.config, request);
        let method = match request.method {
            RestMethod::Get => Method::GET,
            RestMethod::Post => Method::POST,
            RestMethod::Patch => Method::PATCH,
            RestMethod::Delete => Method::DELETE,
        };
        debug!(method = request.method.as_str(), url = %url, "sending rest request");

        let mut builder = self
            .client
            .request(method, &url)
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Accept", "application/json");
        if request.return_representation {
            builder = builder.header("Prefer", "return=representation");
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest_error(&e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::from_reqwest_error(&e))?;

        if !status.is_success() {
            return Err(BackendError::from_rest_response(status.as_u16(), &body));
        }
        parse_records(&body)
    }
}

#[async_trait]
impl BackendHandle for RestHandle {
    async fn execute(&mut self, query: &LogicalQuery) -> Result<Outcome, BackendError> {
        let request = render(query);
        let records = self.send(&request).await?;

        Ok(match query.operation {
            Operation::Select => Outcome::Rows(records),
            Operation::Count => Outcome::Count(records.len() as u64),
            Operation::Insert | Operation::Update | Operation::Delete => Outcome::Written(
                WriteAck::from_ids(records.into_iter().filter_map(|r| r.id).collect()),
            ),
        })
    }

    async fn close(self: Box<Self>) {}
}

fn request_url(config: &RestConfig, request: &RestRequest) -> String {
    format!(
        "{}{}",
        config.base_url.trim_end_matches('/'),
        request.path_and_query()
    )
}

/// Decode a success body: an array of objects, a single object, or nothing.
fn parse_records(body: &str) -> Result<Vec<Record>, BackendError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| BackendError::unknown(format!("invalid JSON response: {}", e)))?;

    match parsed {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::Object(map) => Ok(record_from_json(map)),
                other => Err(BackendError::unknown(format!(
                    "expected an object in response array, got {}",
                    other
                ))),
            })
            .collect(),
        serde_json::Value::Object(map) => Ok(vec![record_from_json(map)]),
        other => Err(BackendError::unknown(format!(
            "unexpected response body: {}",
            other
        ))),
    }
}
