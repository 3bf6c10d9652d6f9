//! `PostgreSQL` Connector Implementation
//!
//! Implements [`Connector`] and [`Session`] over `tokio-postgres`.
//!
//! # Implementation Notes
//! - One client per session, the connection task is spawned on the runtime
//! - Statements run through the simple query protocol (DDL takes no
//!   parameters, every value is already quoted)
//! - Catalog queries use the extended protocol with text parameters
//! - Values are converted to JSON: text arrays become JSON arrays,
//!   timestamps become RFC 3339 strings

use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};

use crate::engine::{ConnectionConfig, Connector, QueryResult, Session};
use crate::error::{ReconcileError, Result};

/// Opens `tokio-postgres` sessions for one connection profile
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    config: ConnectionConfig,
}

impl PostgresConnector {
    #[must_use]
    pub const fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

/// One open client
pub struct PostgresSession {
    client: Client,
}

impl Connector for PostgresConnector {
    type Session = PostgresSession;

    async fn open(&self, database: Option<&str>) -> Result<PostgresSession> {
        let pg_config = build_pg_config(&self.config, database)?;

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            ReconcileError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
        })?;

        // Connection errors are not logged to prevent credential leakage
        tokio::spawn(async move {
            let _ = connection.await;
        });

        Ok(PostgresSession { client })
    }
}

impl Session for PostgresSession {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.client.batch_execute(sql).await.map_err(|e| ReconcileError::query_failed(db_message(&e)))?;
        Ok(0)
    }

    async fn query(&mut self, sql: &str, params: &[&str]) -> Result<QueryResult> {
        let bound: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self
            .client
            .query(sql, &bound)
            .await
            .map_err(|e| ReconcileError::query_failed(format!("Catalog query failed: {}", db_message(&e))))?;

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = rows.iter().map(row_to_json).collect::<Result<Vec<_>>>()?;
        Ok(QueryResult { columns, rows })
    }
}

/// Server error text without the driver's wrapping
fn db_message(err: &tokio_postgres::Error) -> String {
    err.as_db_error().map_or_else(|| err.to_string(), |db| db.message().to_string())
}

/// Build `PostgreSQL` connection config, optionally overriding the database
fn build_pg_config(config: &ConnectionConfig, database: Option<&str>) -> Result<Config> {
    if config.host.is_empty() {
        return Err(ReconcileError::config_error("PostgreSQL requires 'host' parameter"));
    }
    if config.user.is_empty() {
        return Err(ReconcileError::config_error("PostgreSQL requires 'user' parameter"));
    }

    let db_name = database.unwrap_or(&config.database);
    if db_name.is_empty() {
        return Err(ReconcileError::config_error("PostgreSQL requires 'database' parameter"));
    }

    let mut pg_config = Config::new();
    pg_config
        .host(&config.host)
        .port(config.port)
        .user(&config.user)
        .dbname(db_name)
        .application_name("pgconverge");
    if let Some(password) = &config.password {
        pg_config.password(password);
    }

    Ok(pg_config)
}

fn row_to_json(row: &Row) -> Result<Vec<serde_json::Value>> {
    (0..row.len()).map(|idx| postgres_value_to_json(row, idx)).collect()
}

fn get<'a, T: tokio_postgres::types::FromSql<'a>>(row: &'a Row, idx: usize, what: &str) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| ReconcileError::query_failed(format!("Failed to get {what} value: {e}")))
}

fn postgres_value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value> {
    use serde_json::Value;

    let col_type = row.columns()[idx].type_().clone();

    let value = match col_type {
        Type::BOOL => get::<bool>(row, idx, "boolean")?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx, "i16")?.map(|v| Value::Number(v.into())),
        Type::INT4 => get::<i32>(row, idx, "i32")?.map(|v| Value::Number(v.into())),
        Type::INT8 => get::<i64>(row, idx, "i64")?.map(|v| Value::Number(v.into())),
        Type::OID => get::<u32>(row, idx, "oid")?.map(|v| Value::Number(v.into())),
        Type::TEXT_ARRAY | Type::NAME_ARRAY | Type::VARCHAR_ARRAY => get::<Vec<String>>(row, idx, "array")?
            .map(|items| Value::Array(items.into_iter().map(Value::String).collect())),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx, "timestamptz")?
            .map(|v| Value::String(v.to_rfc3339())),
        _ => get::<String>(row, idx, "string")?.map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}
