//! Lifecycle Operations
//!
//! Every entity kind exposes the same idempotent operations through
//! [`Resource`]: create, read, update, delete and an existence probe.
//!
//! # Locking
//! Mutations take the exclusive side of the [`CatalogLock`](crate::engine::CatalogLock)
//! before opening a transaction and keep it through the post-commit re-read,
//! so verification sees exactly what was committed. Reads and existence
//! probes take the shared side.
//!
//! # Identities
//! Roles are identified by name. The other kinds use composite identities
//! joined with `-` (see [`crate::model::encode_identity`]).

use serde::Serialize;
use std::future::Future;

use crate::config::DesiredState;
use crate::engine::{Connector, Reconciler};
use crate::error::{ReconcileError, Result};
use crate::statement::Plan;
use crate::verify::Reconciled;

pub mod default_privileges;
pub mod extension;
pub mod role;
pub mod schema;

pub use default_privileges::DefaultPrivilegesResource;
pub use extension::ExtensionResource;
pub use role::RoleResource;
pub use schema::{SchemaDropOptions, SchemaResource};

/// One entity kind's lifecycle
pub trait Resource {
    /// Declared state
    type Desired: Send + Sync;
    /// Observed state
    type Observed: Serialize + Send + Sync;
    /// Flags controlling deletion
    type DropOptions: Default + Send + Sync;

    /// Kind name used in logs and output
    const KIND: &'static str;

    /// Identity the desired object will have once created
    fn identity<C: Connector>(ctx: &Reconciler<C>, desired: &Self::Desired) -> Result<String>;

    /// Create the object, then re-read and verify it
    fn create<C: Connector>(
        ctx: &Reconciler<C>,
        desired: &Self::Desired,
    ) -> impl Future<Output = Result<Reconciled<Self::Observed>>> + Send;

    /// Read observed state; `Ok(None)` when absent
    ///
    /// `last_known` is the state previously applied to this object and
    /// carries values the catalog cannot report back, such as a role's
    /// cleartext password. Never pass the document being converged: its
    /// values would be mistaken for what the server holds.
    fn read<C: Connector>(
        ctx: &Reconciler<C>,
        id: &str,
        last_known: Option<&Self::Desired>,
    ) -> impl Future<Output = Result<Option<Self::Observed>>> + Send;

    /// Move `current` to `desired`, then re-read and verify
    fn update<C: Connector>(
        ctx: &Reconciler<C>,
        id: &str,
        current: &Self::Observed,
        desired: &Self::Desired,
    ) -> impl Future<Output = Result<Reconciled<Self::Observed>>> + Send;

    fn delete<C: Connector>(
        ctx: &Reconciler<C>,
        id: &str,
        options: &Self::DropOptions,
    ) -> impl Future<Output = Result<()>> + Send;

    fn exists<C: Connector>(ctx: &Reconciler<C>, id: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Statements a create (`current` absent) or update would run
    fn plan<C: Connector>(
        ctx: &Reconciler<C>,
        current: Option<&Self::Observed>,
        desired: &Self::Desired,
    ) -> Result<Plan>;
}

/// Plan for one declared object against the live catalog
///
/// Nothing is known about earlier applies here, so a declared role password
/// is always planned.
pub async fn plan_one<R: Resource, C: Connector>(ctx: &Reconciler<C>, desired: &R::Desired) -> Result<Plan> {
    let id = R::identity(ctx, desired)?;
    let current = R::read(ctx, &id, None).await?;
    R::plan(ctx, current.as_ref(), desired)
}

/// Create or update one declared object
pub async fn converge<R: Resource, C: Connector>(
    ctx: &Reconciler<C>,
    desired: &R::Desired,
) -> Result<Reconciled<R::Observed>> {
    let id = R::identity(ctx, desired)?;
    match R::read(ctx, &id, None).await? {
        Some(current) => R::update(ctx, &id, &current, desired).await,
        None => R::create(ctx, desired).await,
    }
}

/// Pending statements for one declared object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedChange {
    pub kind: &'static str,
    pub id: String,
    pub statements: Plan,
}

/// Outcome of converging one declared object, with its observed state as JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedChange {
    pub kind: &'static str,
    pub id: String,
    pub applied: usize,
    pub observed: serde_json::Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub drift: Vec<String>,
}

impl AppliedChange {
    fn from_reconciled<R: Resource>(reconciled: Reconciled<R::Observed>) -> Result<Self> {
        let observed = serde_json::to_value(&reconciled.observed)
            .map_err(|e| ReconcileError::query_failed(format!("Could not serialize {} state: {e}", R::KIND)))?;
        Ok(Self { kind: R::KIND, id: reconciled.id, applied: reconciled.applied, observed, drift: reconciled.drift })
    }
}

async fn plan_kind<R: Resource, C: Connector>(
    ctx: &Reconciler<C>,
    declared: &[R::Desired],
    out: &mut Vec<PlannedChange>,
) -> Result<()> {
    for desired in declared {
        let statements = plan_one::<R, C>(ctx, desired).await?;
        if !statements.is_empty() {
            out.push(PlannedChange { kind: R::KIND, id: R::identity(ctx, desired)?, statements });
        }
    }
    Ok(())
}

async fn apply_kind<R: Resource, C: Connector>(
    ctx: &Reconciler<C>,
    declared: &[R::Desired],
    out: &mut Vec<AppliedChange>,
) -> Result<()> {
    for desired in declared {
        out.push(AppliedChange::from_reconciled::<R>(converge::<R, C>(ctx, desired).await?)?);
    }
    Ok(())
}

/// Objects whose live state differs from `desired`, with the statements each needs
///
/// Kinds are visited in dependency order: roles, schemas, extensions, then
/// default privileges. Converged objects are left out.
pub async fn plan_state<C: Connector>(ctx: &Reconciler<C>, desired: &DesiredState) -> Result<Vec<PlannedChange>> {
    let mut out = Vec::new();
    plan_kind::<RoleResource, C>(ctx, &desired.roles, &mut out).await?;
    plan_kind::<SchemaResource, C>(ctx, &desired.schemas, &mut out).await?;
    plan_kind::<ExtensionResource, C>(ctx, &desired.extensions, &mut out).await?;
    plan_kind::<DefaultPrivilegesResource, C>(ctx, &desired.default_privileges, &mut out).await?;
    Ok(out)
}

/// Converge every declared object, one transaction per object
///
/// Stops at the first failure; objects converged before it stay committed.
pub async fn apply_state<C: Connector>(ctx: &Reconciler<C>, desired: &DesiredState) -> Result<Vec<AppliedChange>> {
    let mut out = Vec::new();
    apply_kind::<RoleResource, C>(ctx, &desired.roles, &mut out).await?;
    apply_kind::<SchemaResource, C>(ctx, &desired.schemas, &mut out).await?;
    apply_kind::<ExtensionResource, C>(ctx, &desired.extensions, &mut out).await?;
    apply_kind::<DefaultPrivilegesResource, C>(ctx, &desired.default_privileges, &mut out).await?;
    Ok(out)
}
