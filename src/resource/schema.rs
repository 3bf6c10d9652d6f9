//! Schema and policy lifecycle
//!
//! Identity is `database-schema`. Statements run on a session connected to
//! the schema's database.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::catalog;
use crate::diff::{diff_policies, diff_schema};
use crate::engine::{apply_plan, Connector, Reconciler};
use crate::error::Result;
use crate::model::{decode_identity, encode_identity, normalize_identifier, NormalizedSchema, SchemaSpec, SchemaState};
use crate::resource::Resource;
use crate::statement::{self, render_policy_changes, Plan};
use crate::verify::{verify, Reconciled};

const IDENTITY_FORMAT: [&str; 2] = ["database", "schema"];

/// Flags controlling schema deletion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDropOptions {
    /// `DROP SCHEMA ... CASCADE` instead of `RESTRICT`
    pub cascade: bool,
}

pub struct SchemaResource;

impl SchemaResource {
    fn create_plan<C: Connector>(ctx: &Reconciler<C>, spec: &NormalizedSchema) -> Plan {
        let owner = spec.owner.as_deref().unwrap_or(&ctx.server().current_user);
        let mut plan = Plan::new();
        plan.push(statement::create_schema(&spec.name, spec.owner.as_deref(), spec.if_not_exists, ctx.gate()));
        let grants = diff_policies(&BTreeMap::new(), &spec.policies, owner);
        plan.append(render_policy_changes(&spec.name, &grants));
        plan
    }

    fn update_plan(current: &SchemaState, spec: &NormalizedSchema) -> Result<Plan> {
        let diff = diff_schema(current, spec)?;
        let mut plan = Plan::new();
        if let Some((from, to)) = &diff.rename {
            plan.push(statement::rename_schema(from, to));
        }
        if let Some(owner) = &diff.owner {
            plan.push(statement::alter_schema_owner(&spec.name, owner));
        }
        plan.append(render_policy_changes(&spec.name, &diff.policies));
        Ok(plan)
    }

    fn parse_id(id: &str) -> Result<(String, String)> {
        let [database, schema] = decode_identity(id, &IDENTITY_FORMAT)?;
        Ok((normalize_identifier(&database, "database")?, normalize_identifier(&schema, "schema")?))
    }
}

impl Resource for SchemaResource {
    type Desired = SchemaSpec;
    type Observed = SchemaState;
    type DropOptions = SchemaDropOptions;

    const KIND: &'static str = "schema";

    fn identity<C: Connector>(ctx: &Reconciler<C>, desired: &SchemaSpec) -> Result<String> {
        let spec = desired.normalize(ctx.default_database())?;
        Ok(encode_identity(&[&spec.database, &spec.name]))
    }

    async fn create<C: Connector>(ctx: &Reconciler<C>, desired: &SchemaSpec) -> Result<Reconciled<SchemaState>> {
        ctx.ensure_writable()?;
        let spec = desired.normalize(ctx.default_database())?;
        let plan = Self::create_plan(ctx, &spec);

        let _guard = ctx.lock().exclusive().await;
        let mut session = ctx.session(&spec.database).await?;
        let applied = apply_plan(&mut session, &plan).await?;

        let observed = catalog::read_schema(&mut session, &spec.database, &spec.name).await?;
        let id = encode_identity(&[&spec.database, &spec.name]);
        verify(Self::KIND, &id, applied, observed, |o| Self::update_plan(o, &spec))
    }

    async fn read<C: Connector>(
        ctx: &Reconciler<C>,
        id: &str,
        _last_known: Option<&SchemaSpec>,
    ) -> Result<Option<SchemaState>> {
        let (database, name) = Self::parse_id(id)?;

        let _guard = ctx.lock().shared().await;
        let mut session = ctx.session(ctx.default_database()).await?;
        if !catalog::database_exists(&mut session, &database).await? {
            warn!(database = %database, schema = %name, "database not found");
            return Ok(None);
        }
        let mut session = ctx.session(&database).await?;
        let state = catalog::read_schema(&mut session, &database, &name).await?;
        if state.is_none() {
            warn!(database = %database, schema = %name, "schema not found");
        }
        Ok(state)
    }

    async fn update<C: Connector>(
        ctx: &Reconciler<C>,
        _id: &str,
        current: &SchemaState,
        desired: &SchemaSpec,
    ) -> Result<Reconciled<SchemaState>> {
        ctx.ensure_writable()?;
        let spec = desired.normalize(ctx.default_database())?;
        let plan = Self::update_plan(current, &spec)?;

        let _guard = ctx.lock().exclusive().await;
        let mut session = ctx.session(&spec.database).await?;
        let applied = apply_plan(&mut session, &plan).await?;

        let observed = catalog::read_schema(&mut session, &spec.database, &spec.name).await?;
        let id = encode_identity(&[&spec.database, &spec.name]);
        verify(Self::KIND, &id, applied, observed, |o| Self::update_plan(o, &spec))
    }

    async fn delete<C: Connector>(ctx: &Reconciler<C>, id: &str, options: &SchemaDropOptions) -> Result<()> {
        ctx.ensure_writable()?;
        let (database, name) = Self::parse_id(id)?;
        let mut plan = Plan::new();
        plan.push(statement::drop_schema(&name, options.cascade));

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
        catalog::schema_exists(&mut session, &name).await
    }

    fn plan<C: Connector>(ctx: &Reconciler<C>, current: Option<&SchemaState>, desired: &SchemaSpec) -> Result<Plan> {
        let spec = desired.normalize(ctx.default_database())?;
        match current {
            Some(current) => Self::update_plan(current, &spec),
            None => Ok(Self::create_plan(ctx, &spec)),
        }
    }
}
