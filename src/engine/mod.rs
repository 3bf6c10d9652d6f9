//! Connection Seams and Transaction Coordinator
//!
//! This module defines the boundary between the reconciliation core and the
//! database driver, plus the coordinator that applies a [`Plan`].
//!
//! # Seams
//! - [`Connector`] opens a [`Session`] against a named database. A fresh
//!   connection is opened per operation; targeting a database other than the
//!   default opens a connection to that database.
//! - [`Session`] executes statements and runs parameterized catalog queries.
//!
//! # Locking
//! [`CatalogLock`] is an explicit reader/writer lock owned by the
//! [`Reconciler`] and shared by every operation that uses the same
//! connector. Reads and existence probes take the shared side, mutations the
//! exclusive side. Guards release on every exit path.
//!
//! # Transactions
//! [`apply_plan`] wraps a plan in one transaction: every statement runs in
//! order, the first failure rolls everything back, and commit is attempted
//! exactly once.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info};

use crate::capability::FeatureGate;
use crate::error::{ReconcileError, Result};
use crate::statement::Plan;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Connection configuration for the target server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,

    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Default database, also the maintenance database for role operations
    pub database: String,
}

impl ConnectionConfig {
    /// Create a new `PostgreSQL` connection config
    #[must_use]
    pub const fn postgres(
        host: String,
        port: u16,
        user: String,
        password: Option<String>,
        database: String,
    ) -> Self {
        Self { host, port, user, password, database }
    }
}

/// Facts about the connected server, probed once per [`Reconciler`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Raw `server_version` setting
    pub server_version: String,
    pub current_user: String,
    pub database: String,
    pub is_superuser: bool,
}

/// Catalog query result, one JSON value per column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    #[must_use]
    pub fn new(columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns: columns.iter().map(|c| (*c).to_string()).collect(), rows }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row, `None` when the query matched nothing
    #[must_use]
    pub fn first(&self) -> Option<Row<'_>> {
        self.rows.first().map(|values| Row { columns: &self.columns, values })
    }

    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|values| Row { columns: &self.columns, values })
    }
}

/// Borrowed view of one result row with typed accessors
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [serde_json::Value],
}

impl<'a> Row<'a> {
    fn value(&self, column: &str) -> Result<&'a serde_json::Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
            .ok_or_else(|| ReconcileError::query_failed(format!("Missing column '{column}' in catalog result")))
    }

    fn type_error(column: &str, expected: &str) -> ReconcileError {
        ReconcileError::query_failed(format!("Column '{column}' is not a {expected}"))
    }

    pub fn opt_text(&self, column: &str) -> Result<Option<String>> {
        match self.value(column)? {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(s) => Ok(Some(s.clone())),
            _ => Err(Self::type_error(column, "string")),
        }
    }

    pub fn text(&self, column: &str) -> Result<String> {
        self.opt_text(column)?
            .ok_or_else(|| ReconcileError::query_failed(format!("Column '{column}' is NULL")))
    }

    pub fn opt_boolean(&self, column: &str) -> Result<Option<bool>> {
        match self.value(column)? {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Bool(b) => Ok(Some(*b)),
            _ => Err(Self::type_error(column, "boolean")),
        }
    }

    pub fn boolean(&self, column: &str) -> Result<bool> {
        self.opt_boolean(column)?
            .ok_or_else(|| ReconcileError::query_failed(format!("Column '{column}' is NULL")))
    }

    pub fn integer(&self, column: &str) -> Result<i64> {
        self.value(column)?.as_i64().ok_or_else(|| Self::type_error(column, "integer"))
    }

    /// Text array; SQL NULL reads as empty
    pub fn text_array(&self, column: &str) -> Result<Vec<String>> {
        match self.value(column)? {
            serde_json::Value::Null => Ok(Vec::new()),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string).ok_or_else(|| Self::type_error(column, "text array")))
                .collect(),
            _ => Err(Self::type_error(column, "text array")),
        }
    }
}

/// An open connection to one database
pub trait Session: Send {
    /// Execute a statement, returning the affected row count
    fn execute(&mut self, sql: &str) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Run a catalog query with text parameters bound as `$1..$n`
    fn query(
        &mut self,
        sql: &str,
        params: &[&str],
    ) -> impl std::future::Future<Output = Result<QueryResult>> + Send;
}

/// Opens sessions against the target server
pub trait Connector: Send + Sync {
    type Session: Session;

    /// Open a session; `None` targets the configured default database
    fn open(
        &self,
        database: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Self::Session>> + Send;
}

/// Process-wide reader/writer lock over catalog mutation
#[derive(Debug, Clone, Default)]
pub struct CatalogLock {
    inner: Arc<RwLock<()>>,
}

impl CatalogLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared side, for reads and existence probes
    pub async fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read().await
    }

    /// Exclusive side, for create, update and delete
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write().await
    }
}

/// Session context shared by every lifecycle operation
///
/// Holds the connector, the catalog lock and the immutable feature gate for
/// the connected server.
#[derive(Debug)]
pub struct Reconciler<C> {
    connector: C,
    lock: CatalogLock,
    gate: FeatureGate,
    server: ServerInfo,
    readonly: bool,
}

const SERVER_PROBE: &str = "SELECT current_setting('server_version') AS server_version, \
     current_user::TEXT AS username, \
     current_database()::TEXT AS database, \
     COALESCE((SELECT rolsuper FROM pg_catalog.pg_roles WHERE rolname = current_user), false) AS is_superuser";

impl<C: Connector> Reconciler<C> {
    /// Probe the server and build the capability gate
    pub async fn connect(connector: C) -> Result<Self> {
        let mut session = connector.open(None).await?;
        let result = session.query(SERVER_PROBE, &[]).await?;
        let row = result
            .first()
            .ok_or_else(|| ReconcileError::connection_failed("Server probe returned no rows"))?;

        let server = ServerInfo {
            server_version: row.text("server_version")?,
            current_user: row.text("username")?,
            database: row.text("database")?,
            is_superuser: row.boolean("is_superuser")?,
        };
        let gate = FeatureGate::from_server_version(&server.server_version)?;
        debug!(version = %gate.version(), user = %server.current_user, "connected");

        Ok(Self::from_parts(connector, gate, server))
    }

    /// Build a context from already-known server facts
    #[must_use]
    pub fn from_parts(connector: C, gate: FeatureGate, server: ServerInfo) -> Self {
        Self { connector, lock: CatalogLock::new(), gate, server, readonly: false }
    }

    /// Share a lock with other contexts over the same server
    #[must_use]
    pub fn with_lock(mut self, lock: CatalogLock) -> Self {
        self.lock = lock;
        self
    }

    /// Reject every catalog mutation
    #[must_use]
    pub const fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    #[must_use]
    pub const fn gate(&self) -> &FeatureGate {
        &self.gate
    }

    #[must_use]
    pub const fn server(&self) -> &ServerInfo {
        &self.server
    }

    #[must_use]
    pub const fn lock(&self) -> &CatalogLock {
        &self.lock
    }

    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }

    #[must_use]
    pub fn default_database(&self) -> &str {
        &self.server.database
    }

    /// Open a session on `database`, reusing the default target when equal
    pub async fn session(&self, database: &str) -> Result<C::Session> {
        if database == self.server.database {
            self.connector.open(None).await
        } else {
            self.connector.open(Some(database)).await
        }
    }

    /// Fail before any lock or statement when the profile is read-only
    pub fn ensure_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ReconcileError::config_error(
                "Connection profile is read-only, catalog mutations are disabled",
            ));
        }
        Ok(())
    }
}

fn error_detail(err: ReconcileError) -> String {
    match err {
        ReconcileError::QueryFailed(detail)
        | ReconcileError::ConnectionFailed(detail)
        | ReconcileError::Statement { detail, .. } => detail,
        other => other.message(),
    }
}

/// Apply a plan in one transaction
///
/// An empty plan runs nothing, not even `BEGIN`. Returns the number of
/// statements applied.
pub async fn apply_plan<S: Session>(session: &mut S, plan: &Plan) -> Result<usize> {
    if plan.is_empty() {
        return Ok(0);
    }

    session
        .execute("BEGIN")
        .await
        .map_err(|e| ReconcileError::statement("opening transaction", error_detail(e)))?;

    for statement in plan.ordered() {
        debug!(phase = ?statement.phase, sql = %statement, "executing statement");
        if let Err(e) = session.execute(&statement.sql).await {
            if let Err(rollback) = session.execute("ROLLBACK").await {
                error!(error = %rollback, "rollback failed after statement error");
            }
            return Err(ReconcileError::statement(statement.operation.clone(), error_detail(e)));
        }
    }

    session.execute("COMMIT").await.map_err(|e| ReconcileError::commit(error_detail(e)))?;
    info!(statements = plan.len(), "transaction committed");
    Ok(plan.len())
}
