//! PostgreSQL adapter.

use crate::ast::{compile, Dialect, LogicalQuery, Operation, Value};
use crate::config::{AdminSeed, NetworkConfig, SslMode};
use crate::db::backend::{Backend, BackendHandle, BackendKind, Outcome, WriteAck};
use crate::db::error::BackendError;
use crate::db::normalize::{parse_timestamp, record_from_pg_row};
use crate::db::schema::bootstrap_postgres;
use async_trait::async_trait;
use bytes::BytesMut;
use postgres_native_tls::MakeTlsConnector;
use std::error::Error as StdError;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

pub struct PostgresBackend {
    config: NetworkConfig,
    admin: AdminSeed,
}

impl PostgresBackend {
    pub fn new(config: NetworkConfig, admin: AdminSeed) -> Self {
        Self { config, admin }
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Network
    }

    async fn open(&self) -> Result<Box<dyn BackendHandle>, BackendError> {
        let (client, connection) = create_client(&self.config).await?;
        let handle = PostgresHandle { client, connection };
        if let Err(e) = bootstrap_postgres(&handle.client, &self.admin).await {
            let err = BackendError::from_pg_error(&e);
            Box::new(handle).close().await;
            return Err(err);
        }
        Ok(Box::new(handle))
    }
}

pub struct PostgresHandle {
    client: Client,
    connection: JoinHandle<()>,
}

#[async_trait]
impl BackendHandle for PostgresHandle {
    async fn execute(&mut self, query: &LogicalQuery) -> Result<Outcome, BackendError> {
        let statement = compile(query, Dialect::Postgres);
        debug!(sql = %statement.text, params = statement.params.len(), "executing on postgres");

        let params: Vec<&(dyn ToSql + Sync)> = statement
            .params
            .iter()
            .map(|v| v as &(dyn ToSql + Sync))
            .collect();

        match query.operation {
            Operation::Count => {
                let row = self
                    .client
                    .query_one(&statement.text, &params)
                    .await
                    .map_err(|e| BackendError::from_pg_error(&e))?;
                let count: i64 = row.try_get(0).map_err(|e| BackendError::from_pg_error(&e))?;
                Ok(Outcome::Count(count.max(0) as u64))
            }
            Operation::Select => {
                let rows = self
                    .client
                    .query(&statement.text, &params)
                    .await
                    .map_err(|e| BackendError::from_pg_error(&e))?;
                Ok(Outcome::Rows(rows.iter().map(record_from_pg_row).collect()))
            }
            Operation::Insert | Operation::Update | Operation::Delete => {
                let rows = self
                    .client
                    .query(&statement.text, &params)
                    .await
                    .map_err(|e| BackendError::from_pg_error(&e))?;
                let ids = rows
                    .iter()
                    .filter_map(|row| record_from_pg_row(row).id)
                    .collect();
                Ok(Outcome::Written(WriteAck::from_ids(ids)))
            }
        }
    }

    async fn close(self: Box<Self>) {
        let PostgresHandle { client, connection } = *self;
        // The connection task finishes once its last client is gone
        drop(client);
        if let Err(e) = connection.await {
            warn!(error = %e, "postgres connection task ended abnormally");
        }
    }
}

/// Connect with the configured timeout and TLS mode.
///
/// The connection future is driven on its own task; the returned handle
/// resolves once the client is dropped.
pub async fn create_client(config: &NetworkConfig) -> Result<(Client, JoinHandle<()>), BackendError> {
    let mut pg_config = config
        .url
        .parse::<tokio_postgres::Config>()
        .map_err(|e| BackendError::unknown(format!("invalid database URL: {}", e)))?;
    let timeout = config.connect_timeout();
    pg_config.connect_timeout(timeout);

    // An explicit sslmode in the URL wins over the configured default
    if !config.url.contains("sslmode") {
        pg_config.ssl_mode(match config.ssl_mode {
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
            SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            SslMode::Require | SslMode::VerifyFull => tokio_postgres::config::SslMode::Require,
        });
    }

    let timed_out = || {
        BackendError::unreachable(format!(
            "connection timed out after {}s",
            timeout.as_secs()
        ))
    };

    let (client, connection) = match pg_config.get_ssl_mode() {
        tokio_postgres::config::SslMode::Disable => {
            let (client, connection) = tokio::time::timeout(timeout, pg_config.connect(NoTls))
                .await
                .map_err(|_| timed_out())?
                .map_err(|e| BackendError::from_pg_error(&e))?;
            (client, spawn_connection(connection))
        }
        _ => {
            let strict = config.ssl_mode == SslMode::VerifyFull;
            let tls = build_tls_connector(config, strict)?;
            let (client, connection) = tokio::time::timeout(timeout, pg_config.connect(tls))
                .await
                .map_err(|_| timed_out())?
                .map_err(|e| BackendError::from_pg_error(&e))?;
            (client, spawn_connection(connection))
        }
    };

    debug!("connected to postgres");
    Ok((client, connection))
}

fn spawn_connection<F>(connection: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!(error = %e, "postgres connection error");
        }
    })
}

/// Build a TLS connector with appropriate certificate configuration.
///
/// `strict_verify` always verifies the certificate chain and hostname,
/// regardless of `accept_invalid_certs`.
fn build_tls_connector(
    config: &NetworkConfig,
    strict_verify: bool,
) -> Result<MakeTlsConnector, BackendError> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(ca_path) = &config.ca_cert_path {
        let pem = std::fs::read(ca_path).map_err(|e| {
            BackendError::unknown(format!(
                "failed to read CA certificate file {}: {}",
                ca_path.display(),
                e
            ))
        })?;
        let cert = native_tls::Certificate::from_pem(&pem)
            .map_err(|e| BackendError::unknown(format!("invalid CA certificate: {}", e)))?;
        builder.add_root_certificate(cert);
    }
    // Otherwise the system trust store applies

    let connector = builder
        .build()
        .map_err(|e| BackendError::unknown(format!("failed to build TLS connector: {}", e)))?;
    Ok(MakeTlsConnector::new(connector))
}

type BoxedError = Box<dyn StdError + Sync + Send>;

/// Values bind to whatever type the server inferred for the placeholder.
impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ => b.to_string().to_sql(ty, out),
            },
            Value::Int(i) => int_to_sql(*i, ty, out),
            Value::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::FLOAT8 => f.to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::from(*f).to_sql(ty, out),
                _ => f.to_string().to_sql(ty, out),
            },
            Value::Text(s) => text_to_sql(s, ty, out),
            Value::Json(v) => match *ty {
                Type::JSON | Type::JSONB => v.to_sql(ty, out),
                _ => v.to_string().to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn int_to_sql(i: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedError> {
    match *ty {
        Type::INT2 => i16::try_from(i)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(i)?.to_sql(ty, out),
        Type::INT8 => i.to_sql(ty, out),
        Type::FLOAT4 => (i as f32).to_sql(ty, out),
        Type::FLOAT8 => (i as f64).to_sql(ty, out),
        Type::BOOL => (i != 0).to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::Value::from(i).to_sql(ty, out),
        _ => i.to_string().to_sql(ty, out),
    }
}

fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedError> {
    match *ty {
        Type::TIMESTAMPTZ => parse_timestamp(s)
            .ok_or_else(|| format!("invalid timestamp {:?}", s))?
            .to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(s)
            .ok_or_else(|| format!("invalid timestamp {:?}", s))?
            .naive_utc()
            .to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(s.trim().parse::<i64>()?, ty, out),
        Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)
            .unwrap_or_else(|_| serde_json::Value::String(s.to_string()))
            .to_sql(ty, out),
        _ => s.to_sql(ty, out),
    }
}
