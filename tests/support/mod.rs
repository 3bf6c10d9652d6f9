//! Scripted connector shared by the integration tests
//!
//! Queries are answered from canned results matched by a marker substring.
//! Executed statements are buffered between `BEGIN` and `COMMIT`; answers
//! registered with [`MockConnector::after_commit`] only become visible once
//! a transaction commits, which models catalog visibility.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};

use pgconverge::capability::FeatureGate;
use pgconverge::engine::{Connector, QueryResult, Reconciler, ServerInfo, Session};
use pgconverge::error::{ReconcileError, Result};

pub const ROLE: &str = "pg_roles r WHERE";
pub const ROLE_EXISTS: &str = "pg_roles WHERE rolname";
pub const SHADOW: &str = "pg_shadow";
pub const DATABASE: &str = "pg_database";
pub const SCHEMA: &str = "pg_get_userbyid";
pub const SCHEMA_ACL: &str = "nspacl";
pub const SCHEMA_EXISTS: &str = "pg_namespace WHERE nspname";
pub const DEFAULT_ACL: &str = "pg_default_acl";
pub const EXTENSION: &str = "pg_extension e";
pub const EXTENSION_EXISTS: &str = "pg_extension WHERE";
pub const PROBE: &str = "server_version";

#[derive(Debug, Default)]
pub struct MockState {
    answers: Vec<(String, QueryResult)>,
    after_commit: Vec<(String, QueryResult)>,
    fail_on: Option<(String, String)>,
    in_transaction: bool,
    pending: Vec<String>,
    /// Every `execute` call, transaction control included
    pub executed: Vec<String>,
    /// Statements that made it through a `COMMIT`
    pub committed: Vec<String>,
    /// `(sql, params)` per catalog query
    pub queries: Vec<(String, Vec<String>)>,
    /// Database argument of every `open`
    pub opened: Vec<Option<String>>,
}

impl MockState {
    fn set(answers: &mut Vec<(String, QueryResult)>, marker: &str, result: QueryResult) {
        match answers.iter_mut().find(|(m, _)| m == marker) {
            Some(entry) => entry.1 = result,
            None => answers.push((marker.to_string(), result)),
        }
    }

    fn answer(&self, sql: &str) -> QueryResult {
        self.answers
            .iter()
            .find(|(marker, _)| sql.contains(marker.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default()
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        self.executed.push(sql.to_string());
        if let Some((marker, message)) = &self.fail_on {
            if sql.contains(marker.as_str()) {
                return Err(ReconcileError::query_failed(message.clone()));
            }
        }

        match sql {
            "BEGIN" => {
                self.in_transaction = true;
                self.pending.clear();
            }
            "COMMIT" => {
                self.in_transaction = false;
                self.committed.append(&mut self.pending);
                for (marker, result) in std::mem::take(&mut self.after_commit) {
                    Self::set(&mut self.answers, &marker, result);
                }
            }
            "ROLLBACK" => {
                self.in_transaction = false;
                self.pending.clear();
            }
            other if self.in_transaction => self.pending.push(other.to_string()),
            other => self.committed.push(other.to_string()),
        }
        Ok(0)
    }

    /// Executed statements without transaction control
    pub fn statements(&self) -> Vec<String> {
        self.executed
            .iter()
            .filter(|sql| !matches!(sql.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Answer queries containing `marker` with `result` from now on
    pub fn answer(&self, marker: &str, result: QueryResult) -> &Self {
        MockState::set(&mut self.state().answers, marker, result);
        self
    }

    /// Answer queries containing `marker` with `result` once a transaction commits
    pub fn after_commit(&self, marker: &str, result: QueryResult) -> &Self {
        self.state().after_commit.push((marker.to_string(), result));
        self
    }

    /// Fail every statement containing `marker`
    pub fn fail_on(&self, marker: &str, message: &str) -> &Self {
        self.state().fail_on = Some((marker.to_string(), message.to_string()));
        self
    }
}

pub struct MockSession {
    state: Arc<Mutex<MockState>>,
}

impl Session for MockSession {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.state.lock().unwrap().execute(sql)
    }

    async fn query(&mut self, sql: &str, params: &[&str]) -> Result<QueryResult> {
        let mut state = self.state.lock().unwrap();
        state.queries.push((sql.to_string(), params.iter().map(|p| (*p).to_string()).collect()));
        Ok(state.answer(sql))
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    async fn open(&self, database: Option<&str>) -> Result<MockSession> {
        self.state().opened.push(database.map(str::to_string));
        Ok(MockSession { state: Arc::clone(&self.state) })
    }
}

pub fn server(version: &str) -> ServerInfo {
    ServerInfo {
        server_version: version.to_string(),
        current_user: "postgres".to_string(),
        database: "app".to_string(),
        is_superuser: false,
    }
}

/// Context over `connector` for a server reporting `version`
pub fn reconciler(connector: &MockConnector, version: &str) -> Reconciler<MockConnector> {
    let gate = FeatureGate::from_server_version(version).unwrap();
    Reconciler::from_parts(connector.clone(), gate, server(version))
}

pub fn one_row() -> QueryResult {
    QueryResult::new(&["?column?"], vec![vec![json!(1)]])
}

/// `pg_roles` row with the defaults a freshly created role has
pub fn role_row(name: &str, login: bool, roles: &[&str]) -> QueryResult {
    role_row_with(name, &[("login", json!(login)), ("roles", json!(roles))])
}

/// `pg_roles` row with default attributes and the given overrides
pub fn role_row_with(name: &str, overrides: &[(&str, Value)]) -> QueryResult {
    let mut columns = vec![
        ("name", json!(name)),
        ("superuser", json!(false)),
        ("inherit", json!(true)),
        ("create_role", json!(false)),
        ("create_database", json!(false)),
        ("login", json!(false)),
        ("replication", json!(false)),
        ("connection_limit", json!(-1)),
        ("valid_until", json!("infinity")),
        ("bypass_row_level_security", json!(false)),
        ("roles", json!([])),
    ];
    for (column, value) in overrides {
        if let Some(entry) = columns.iter_mut().find(|(c, _)| c == column) {
            entry.1 = value.clone();
        }
    }
    let names: Vec<&str> = columns.iter().map(|(c, _)| *c).collect();
    QueryResult::new(&names, vec![columns.into_iter().map(|(_, v)| v).collect()])
}

pub fn schema_row(name: &str, owner: &str) -> QueryResult {
    QueryResult::new(&["name", "owner"], vec![vec![json!(name), json!(owner)]])
}

/// `aclexplode` rows: `(grantee, privilege, grantable)`
pub fn acl_rows(entries: &[(&str, &str, bool)]) -> QueryResult {
    QueryResult::new(
        &["grantee", "privilege", "grantable"],
        entries.iter().map(|(g, p, w)| vec![json!(g), json!(p), json!(w)]).collect(),
    )
}

pub fn privilege_rows(privileges: &[&str]) -> QueryResult {
    QueryResult::new(&["privilege"], privileges.iter().map(|p| vec![json!(p)]).collect())
}

pub fn extension_row(name: &str, schema: &str, version: &str, default_version: &str) -> QueryResult {
    QueryResult::new(
        &["name", "schema", "version", "default_version"],
        vec![vec![json!(name), json!(schema), json!(version), json!(default_version)]],
    )
}
