//! Extension lifecycle
//!
//! Identity is `database-name`. Name and database are fixed once created;
//! schema and version converge in place.

use tracing::warn;

use crate::capability::Feature;
use crate::catalog;
use crate::diff::diff_extension;
use crate::engine::{apply_plan, Connector, Reconciler};
use crate::error::{ReconcileError, Result};
use crate::model::{decode_identity, encode_identity, normalize_identifier, ExtensionSpec, ExtensionState};
use crate::resource::Resource;
use crate::statement::{self, render_extension_changes, Plan};
use crate::verify::{verify, Reconciled};

const IDENTITY_FORMAT: [&str; 2] = ["database", "extension"];

pub struct ExtensionResource;

impl ExtensionResource {
    fn parse_id(id: &str) -> Result<(String, String)> {
        let [database, name] = decode_identity(id, &IDENTITY_FORMAT)?;
        Ok((normalize_identifier(&database, "database")?, normalize_identifier(&name, "extension")?))
    }

    fn database(spec: &ExtensionSpec) -> Result<&str> {
        spec.database
            .as_deref()
            .ok_or_else(|| ReconcileError::validation("extension database is not set"))
    }

    fn create_plan(spec: &ExtensionSpec) -> Plan {
        let mut plan = Plan::new();
        plan.push(statement::create_extension(&spec.name, spec.schema.as_deref(), spec.version.as_deref()));
        plan
    }

    fn update_plan(current: &ExtensionState, spec: &ExtensionSpec) -> Result<Plan> {
        Ok(render_extension_changes(&spec.name, &diff_extension(current, spec)?))
    }

    async fn converge_in_place<C: Connector>(
        ctx: &Reconciler<C>,
        spec: &ExtensionSpec,
        plan: &Plan,
    ) -> Result<Reconciled<ExtensionState>> {
        let database = Self::database(spec)?;

        let _guard = ctx.lock().exclusive().await;
        let mut session = ctx.session(database).await?;
        let applied = apply_plan(&mut session, plan).await?;

        let observed = catalog::read_extension(&mut session, database, &spec.name).await?;
        let id = encode_identity(&[database, &spec.name]);
        verify(Self::KIND, &id, applied, observed, |o| Self::update_plan(o, spec))
    }
}

impl Resource for ExtensionResource {
    type Desired = ExtensionSpec;
    type Observed = ExtensionState;
    type DropOptions = ();

    const KIND: &'static str = "extension";

    fn identity<C: Connector>(ctx: &Reconciler<C>, desired: &ExtensionSpec) -> Result<String> {
        let spec = desired.normalize(ctx.default_database())?;
        Ok(encode_identity(&[Self::database(&spec)?, &spec.name]))
    }

    async fn create<C: Connector>(ctx: &Reconciler<C>, desired: &ExtensionSpec) -> Result<Reconciled<ExtensionState>> {
        ctx.ensure_writable()?;
        ctx.gate().require(Feature::Extension)?;
        let spec = desired.normalize(ctx.default_database())?;
        Self::converge_in_place(ctx, &spec, &Self::create_plan(&spec)).await
    }

    async fn read<C: Connector>(
        ctx: &Reconciler<C>,
        id: &str,
        _last_known: Option<&ExtensionSpec>,
    ) -> Result<Option<ExtensionState>> {
        let (database, name) = Self::parse_id(id)?;

        let _guard = ctx.lock().shared().await;
        let mut session = ctx.session(ctx.default_database()).await?;
        if !catalog::database_exists(&mut session, &database).await? {
            warn!(database = %database, extension = %name, "database not found");
            return Ok(None);
        }
        let mut session = ctx.session(&database).await?;
        let state = catalog::read_extension(&mut session, &database, &name).await?;
        if state.is_none() {
            warn!(database = %database, extension = %name, "extension not found");
        }
        Ok(state)
    }

    async fn update<C: Connector>(
        ctx: &Reconciler<C>,
        _id: &str,
        current: &ExtensionState,
        desired: &ExtensionSpec,
    ) -> Result<Reconciled<ExtensionState>> {
        ctx.ensure_writable()?;
        ctx.gate().require(Feature::Extension)?;
        let spec = desired.normalize(ctx.default_database())?;
        let plan = Self::update_plan(current, &spec)?;
        Self::converge_in_place(ctx, &spec, &plan).await
    }

    async fn delete<C: Connector>(ctx: &Reconciler<C>, id: &str, _options: &()) -> Result<()> {
        ctx.ensure_writable()?;
        ctx.gate().require(Feature::Extension)?;
        let (database, name) = Self::parse_id(id)?;
        let mut plan = Plan::new();
        plan.push(statement::drop_extension(&name));

        let _guard = ctx.lock().exclusive().await;
        let mut session = ctx.session(&database).await?;
        apply_plan(&mut session, &plan).await?;
        Ok(())
    }

    async fn exists<C: Connector>(ctx: &Reconciler<C>, id: &str) -> Result<bool> {
        let (database, name) = Self::parse_id(id)?;

        let _guard = ctx.lock().shared().await;
        let mut session = ctx.session(ctx.default_database()).await?;
        if !catalog::database_exists(&mut session, &database).await? {
            return Ok(false);
        }
        let mut session = ctx.session(&database).await?;
        catalog::extension_exists(&mut session, &name).await
    }

    fn plan<C: Connector>(ctx: &Reconciler<C>, current: Option<&ExtensionState>, desired: &ExtensionSpec) -> Result<Plan> {
        ctx.gate().require(Feature::Extension)?;
        let spec = desired.normalize(ctx.default_database())?;
        match current {
            Some(current) => Self::update_plan(current, &spec),
            None => Ok(Self::create_plan(&spec)),
        }
    }
}
