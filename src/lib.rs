//! pgconverge - Declarative PostgreSQL Access-Control Reconciliation
//!
//! pgconverge keeps roles, schema policies, default-privilege rules and
//! extensions in a PostgreSQL server equal to a declared state. Each
//! operation reads the catalog, computes the minimal change set, applies it
//! in one transaction and re-reads the result to confirm convergence.
//!
//! # Core Principles
//! - Idempotent: applying an already-converged state emits no statements
//! - All-or-nothing: a plan commits whole or not at all
//! - Version-aware: statements follow what the connected server supports
//! - Injection-free: every identifier is quoted, every literal escaped
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`output`] - JSON output envelope types
//! - [`engine`] - Connection seams, catalog lock and transaction coordinator
//! - [`capability`] - Server version feature gate
//! - [`config`] - Connection profiles and the desired-state document
//! - [`model`] - Declared and observed entity types, normalization
//! - [`catalog`] - Catalog reader
//! - [`diff`] - Diff engine
//! - [`statement`] - Statement builder
//! - [`verify`] - Convergence verifier
//! - [`resource`] - Create/Read/Update/Delete/Exists per entity kind

pub mod capability;
pub mod catalog;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod model;
pub mod output;
pub mod resource;
pub mod statement;
pub mod verify;

pub use capability::{Feature, FeatureGate};
pub use config::{resolve_connection, save_connection, ConfigLocation, DesiredState, StoredConnection};
pub use engine::{apply_plan, CatalogLock, ConnectionConfig, Connector, QueryResult, Reconciler, ServerInfo, Session};
pub use error::{ReconcileError, Result};
pub use model::{
    DefaultPrivilegeSpec, DefaultPrivilegeState, ExtensionSpec, ExtensionState, ObjectType, PolicySpec, Privilege,
    RoleDropOptions, RoleSpec, RoleState, SchemaSpec, SchemaState,
};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use resource::{
    apply_state, converge, plan_one, plan_state, AppliedChange, DefaultPrivilegesResource, ExtensionResource,
    PlannedChange, Resource, RoleResource, SchemaDropOptions, SchemaResource,
};
pub use statement::{Phase, Plan, Statement};
pub use verify::Reconciled;
