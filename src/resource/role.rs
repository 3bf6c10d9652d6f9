//! Role lifecycle
//!
//! Roles are cluster-wide, so every operation runs against the default
//! database. Identity is the role name.

use tracing::{debug, warn};

use crate::capability::{Feature, FeatureGate};
use crate::catalog;
use crate::diff::diff_role;
use crate::engine::{apply_plan, Connector, Reconciler, Session};
use crate::error::{ReconcileError, Result};
use crate::model::{normalize_identifier, RoleDropOptions, RoleSpec, RoleState};
use crate::resource::Resource;
use crate::statement::{self, render_role_changes, Plan};
use crate::verify::{verify, Reconciled};

pub struct RoleResource;

impl RoleResource {
    fn create_plan(spec: &RoleSpec, gate: &FeatureGate) -> Result<Plan> {
        let mut plan = Plan::new();
        plan.push(statement::create_role(spec, gate)?);
        plan.extend(spec.roles.iter().map(|group| statement::grant_membership(group, &spec.name)));
        Ok(plan)
    }

    fn update_plan(current: &RoleState, spec: &RoleSpec, gate: &FeatureGate) -> Result<Plan> {
        render_role_changes(&diff_role(current, spec), spec, gate)
    }

    /// Read a role, filling what the catalog cannot report from `last_known`
    ///
    /// Without row-level security the bypass flag keeps its last-known
    /// value, or `false` when nothing is known since no role can bypass a
    /// feature the server lacks.
    async fn fetch<C: Connector>(
        ctx: &Reconciler<C>,
        session: &mut C::Session,
        name: &str,
        last_known: Option<&RoleSpec>,
    ) -> Result<Option<RoleState>> {
        let state = catalog::read_role(session, name, ctx.gate(), ctx.server().is_superuser).await?;
        let rls = ctx.gate().supports(Feature::RowLevelSecurity);
        Ok(state.map(|mut state| {
            state.password = last_known.and_then(|spec| spec.password.clone());
            if !rls {
                state.bypass_row_level_security =
                    Some(last_known.and_then(|spec| spec.bypass_row_level_security).unwrap_or(false));
            }
            state
        }))
    }

    /// Statements a delete would run with `options`
    #[must_use]
    pub fn delete_plan(name: &str, options: &RoleDropOptions, current_user: &str, gate: &FeatureGate) -> Plan {
        let mut plan = Plan::new();
        if !options.skip_reassign_owned {
            plan.push(statement::reassign_owned(name, current_user, gate));
            plan.push(statement::drop_owned(name));
        }
        if !options.skip_drop_role {
            plan.push(statement::drop_role(name));
        }
        plan
    }
}

impl Resource for RoleResource {
    type Desired = RoleSpec;
    type Observed = RoleState;
    type DropOptions = RoleDropOptions;

    const KIND: &'static str = "role";

    fn identity<C: Connector>(_ctx: &Reconciler<C>, desired: &RoleSpec) -> Result<String> {
        normalize_identifier(&desired.name, "role")
    }

    async fn create<C: Connector>(ctx: &Reconciler<C>, desired: &RoleSpec) -> Result<Reconciled<RoleState>> {
        ctx.ensure_writable()?;
        let spec = desired.normalize()?;
        let plan = Self::create_plan(&spec, ctx.gate())?;

        let _guard = ctx.lock().exclusive().await;
        let mut session = ctx.session(ctx.default_database()).await?;
        let applied = apply_plan(&mut session, &plan).await?;

        let observed = Self::fetch(ctx, &mut session, &spec.name, Some(&spec)).await?;
        verify(Self::KIND, &spec.name, applied, observed, |o| Self::update_plan(o, &spec, ctx.gate()))
    }

    async fn read<C: Connector>(
        ctx: &Reconciler<C>,
        id: &str,
        last_known: Option<&RoleSpec>,
    ) -> Result<Option<RoleState>> {
        let name = normalize_identifier(id, "role")?;

        let _guard = ctx.lock().shared().await;
        let mut session = ctx.session(ctx.default_database()).await?;
        let state = Self::fetch(ctx, &mut session, &name, last_known).await?;
        if state.is_none() {
            warn!(role = %name, "role not found");
        }
        Ok(state)
    }

    async fn update<C: Connector>(
        ctx: &Reconciler<C>,
        id: &str,
        current: &RoleState,
        desired: &RoleSpec,
    ) -> Result<Reconciled<RoleState>> {
        ctx.ensure_writable()?;
        let name = normalize_identifier(id, "role")?;
        if name != current.name {
            return Err(ReconcileError::validation(format!(
                "Observed state is for role \"{}\", not \"{name}\"",
                current.name
            )));
        }
        let spec = desired.normalize()?;
        debug!(role = %name, target = %spec.name, "updating role");
        let plan = Self::update_plan(current, &spec, ctx.gate())?;

        let _guard = ctx.lock().exclusive().await;
        let mut session = ctx.session(ctx.default_database()).await?;
        let applied = apply_plan(&mut session, &plan).await?;

        let observed = Self::fetch(ctx, &mut session, &spec.name, Some(&spec)).await?;
        verify(Self::KIND, &spec.name, applied, observed, |o| Self::update_plan(o, &spec, ctx.gate()))
    }

    async fn delete<C: Connector>(ctx: &Reconciler<C>, id: &str, options: &RoleDropOptions) -> Result<()> {
        ctx.ensure_writable()?;
        let name = normalize_identifier(id, "role")?;
        let plan = Self::delete_plan(&name, options, &ctx.server().current_user, ctx.gate());
        if plan.is_empty() {
            debug!(role = %name, "role deletion skipped by flags");
            return Ok(());
        }

        let _guard = ctx.lock().exclusive().await;
        let mut session = ctx.session(ctx.default_database()).await?;
        apply_plan(&mut session, &plan).await?;
        Ok(())
    }

    async fn exists<C: Connector>(ctx: &Reconciler<C>, id: &str) -> Result<bool> {
        let name = normalize_identifier(id, "role")?;

        let _guard = ctx.lock().shared().await;
        let mut session = ctx.session(ctx.default_database()).await?;
        catalog::role_exists(&mut session, &name).await
    }

    fn plan<C: Connector>(ctx: &Reconciler<C>, current: Option<&RoleState>, desired: &RoleSpec) -> Result<Plan> {
        let spec = desired.normalize()?;
        match current {
            Some(current) => Self::update_plan(current, &spec, ctx.gate()),
            None => Self::create_plan(&spec, ctx.gate()),
        }
    }
}
