//! Default-privilege rule lifecycle
//!
//! Identity is `database-schema-owner-role-object_type`. A rule only affects
//! objects `owner` creates after it exists; nothing is granted on existing
//! objects.

use std::collections::BTreeSet;
use tracing::warn;

use crate::capability::Feature;
use crate::catalog;
use crate::diff::diff_sets;
use crate::engine::{apply_plan, Connector, Reconciler};
use crate::error::{ReconcileError, Result};
use crate::model::{
    decode_identity, normalize_identifier, DefaultPrivilegeSpec, DefaultPrivilegeState, NormalizedDefaultPrivileges,
    ObjectType,
};
use crate::resource::Resource;
use crate::statement::{self, Plan};
use crate::verify::{verify, Reconciled};

const IDENTITY_FORMAT: [&str; 5] = ["database", "schema", "owner", "role", "object_type"];

/// Parsed rule identity
#[derive(Debug, Clone, PartialEq, Eq)]
struct RuleKey {
    database: String,
    schema: String,
    owner: String,
    role: String,
    object_type: ObjectType,
}

impl RuleKey {
    fn parse(id: &str) -> Result<Self> {
        let [database, schema, owner, role, object_type] = decode_identity(id, &IDENTITY_FORMAT)?;
        Ok(Self {
            database: normalize_identifier(&database, "database")?,
            schema: normalize_identifier(&schema, "schema")?,
            owner: normalize_identifier(&owner, "owner")?,
            role: normalize_identifier(&role, "role")?,
            object_type: ObjectType::parse(&object_type)?,
        })
    }

    fn of_spec(spec: &NormalizedDefaultPrivileges) -> Self {
        Self {
            database: spec.database.clone(),
            schema: spec.schema.clone(),
            owner: spec.owner.clone(),
            role: spec.role.clone(),
            object_type: spec.object_type,
        }
    }

    fn of_state(state: &DefaultPrivilegeState) -> Self {
        Self {
            database: state.database.clone(),
            schema: state.schema.clone(),
            owner: state.owner.clone(),
            role: state.role.clone(),
            object_type: state.object_type,
        }
    }
}

pub struct DefaultPrivilegesResource;

impl DefaultPrivilegesResource {
    /// Revoke what is no longer wanted, then grant what is missing
    ///
    /// A changed schema, owner, grantee or object type moves the rule: the
    /// old rule is fully revoked and the new one granted in the same
    /// transaction. A changed database requires replacement.
    fn converge_plan(current: Option<&DefaultPrivilegeState>, spec: &NormalizedDefaultPrivileges) -> Result<Plan> {
        let empty = BTreeSet::new();
        let mut plan = Plan::new();

        let held = match current {
            Some(state) if RuleKey::of_state(state) != RuleKey::of_spec(spec) => {
                if state.database != spec.database {
                    return Err(ReconcileError::validation(format!(
                        "moving default privileges from database '{}' to '{}' requires replacement",
                        state.database, spec.database
                    )));
                }
                plan.push(statement::revoke_default_privileges(
                    &state.owner,
                    &state.schema,
                    state.object_type,
                    None,
                    &state.role,
                ));
                &empty
            }
            Some(state) => &state.privileges,
            None => &empty,
        };

        let diff = diff_sets(held, &spec.privileges);
        if !diff.to_revoke.is_empty() {
            plan.push(statement::revoke_default_privileges(
                &spec.owner,
                &spec.schema,
                spec.object_type,
                Some(diff.to_revoke.as_slice()),
                &spec.role,
            ));
        }
        if !diff.to_grant.is_empty() {
            plan.push(statement::grant_default_privileges(
                &spec.owner,
                &spec.schema,
                spec.object_type,
                &diff.to_grant,
                &spec.role,
            ));
        }
        Ok(plan)
    }

    fn remaining_plan(observed: &DefaultPrivilegeState, spec: &NormalizedDefaultPrivileges) -> Result<Plan> {
        Self::converge_plan(Some(observed), spec)
    }

    async fn fetch<C: Connector>(
        session: &mut C::Session,
        key: &RuleKey,
    ) -> Result<Option<DefaultPrivilegeState>> {
        catalog::read_default_privileges(session, &key.database, &key.schema, &key.owner, &key.role, key.object_type)
            .await
    }

    async fn apply<C: Connector>(
        ctx: &Reconciler<C>,
        current: Option<&DefaultPrivilegeState>,
        desired: &DefaultPrivilegeSpec,
    ) -> Result<Reconciled<DefaultPrivilegeState>> {
        ctx.ensure_writable()?;
        ctx.gate().require(Feature::DefaultPrivileges)?;
        let spec = desired.normalize(ctx.default_database())?;
        let key = RuleKey::of_spec(&spec);

        let _guard = ctx.lock().exclusive().await;
        let mut session = ctx.session(&spec.database).await?;
        let observed_before = match current {
            Some(state) => Some(state.clone()),
            None => Self::fetch::<C>(&mut session, &key).await?,
        };
        let plan = Self::converge_plan(observed_before.as_ref(), &spec)?;
        let applied = apply_plan(&mut session, &plan).await?;

        let observed = Self::fetch::<C>(&mut session, &key).await?;
        verify(Self::KIND, &spec.identity(), applied, observed, |o| Self::remaining_plan(o, &spec))
    }
}

impl Resource for DefaultPrivilegesResource {
    type Desired = DefaultPrivilegeSpec;
    type Observed = DefaultPrivilegeState;
    type DropOptions = ();

    const KIND: &'static str = "default_privileges";

    fn identity<C: Connector>(ctx: &Reconciler<C>, desired: &DefaultPrivilegeSpec) -> Result<String> {
        Ok(desired.normalize(ctx.default_database())?.identity())
    }

    /// Creating over an existing rule converges it instead of failing
    async fn create<C: Connector>(
        ctx: &Reconciler<C>,
        desired: &DefaultPrivilegeSpec,
    ) -> Result<Reconciled<DefaultPrivilegeState>> {
        Self::apply(ctx, None, desired).await
    }

    async fn read<C: Connector>(
        ctx: &Reconciler<C>,
        id: &str,
        _last_known: Option<&DefaultPrivilegeSpec>,
    ) -> Result<Option<DefaultPrivilegeState>> {
        let key = RuleKey::parse(id)?;

        let _guard = ctx.lock().shared().await;
        let mut session = ctx.session(&key.database).await?;
        let state = Self::fetch::<C>(&mut session, &key).await?;
        if state.is_none() {
            warn!(id, "default privileges not found");
        }
        Ok(state)
    }

    async fn update<C: Connector>(
        ctx: &Reconciler<C>,
        _id: &str,
        current: &DefaultPrivilegeState,
        desired: &DefaultPrivilegeSpec,
    ) -> Result<Reconciled<DefaultPrivilegeState>> {
        Self::apply(ctx, Some(current), desired).await
    }

    async fn delete<C: Connector>(ctx: &Reconciler<C>, id: &str, _options: &()) -> Result<()> {
        ctx.ensure_writable()?;
        ctx.gate().require(Feature::DefaultPrivileges)?;
        let key = RuleKey::parse(id)?;
        let mut plan = Plan::new();
        plan.push(statement::revoke_default_privileges(&key.owner, &key.schema, key.object_type, None, &key.role));

        let _guard = ctx.lock().exclusive().await;
        let mut session = ctx.session(&key.database).await?;
        apply_plan(&mut session, &plan).await?;
        Ok(())
    }

    async fn exists<C: Connector>(ctx: &Reconciler<C>, id: &str) -> Result<bool> {
        let key = RuleKey::parse(id)?;

        let _guard = ctx.lock().shared().await;
        let mut session = ctx.session(&key.database).await?;
        Ok(Self::fetch::<C>(&mut session, &key).await?.is_some())
    }

    fn plan<C: Connector>(
        ctx: &Reconciler<C>,
        current: Option<&DefaultPrivilegeState>,
        desired: &DefaultPrivilegeSpec,
    ) -> Result<Plan> {
        ctx.gate().require(Feature::DefaultPrivileges)?;
        let spec = desired.normalize(ctx.default_database())?;
        Self::converge_plan(current, &spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Privilege;
    use pretty_assertions::assert_eq;

    fn spec(privileges: &[&str]) -> NormalizedDefaultPrivileges {
        DefaultPrivilegeSpec {
            database: Some("app".into()),
            schema: "public".into(),
            owner: "owner".into(),
            role: "reader".into(),
            object_type: "table".into(),
            privileges: privileges.iter().map(|p| (*p).to_string()).collect(),
        }
        .normalize("app")
        .unwrap()
    }

    fn state(privileges: &[Privilege]) -> DefaultPrivilegeState {
        DefaultPrivilegeState {
            database: "app".into(),
            schema: "public".into(),
            owner: "owner".into(),
            role: "reader".into(),
            object_type: ObjectType::Table,
            privileges: privileges.iter().copied().collect(),
        }
    }

    #[test]
    fn test_create_grants_everything() {
        let plan = DefaultPrivilegesResource::converge_plan(None, &spec(&["SELECT", "INSERT"])).unwrap();
        assert_eq!(
            plan.redacted(),
            vec![
                "ALTER DEFAULT PRIVILEGES FOR ROLE \"owner\" IN SCHEMA \"public\" GRANT SELECT,INSERT ON TABLES TO \"reader\""
            ]
        );
    }

    #[test]
    fn test_update_revokes_then_grants_difference() {
        let current = state(&[Privilege::Select, Privilege::Delete]);
        let plan = DefaultPrivilegesResource::converge_plan(Some(&current), &spec(&["SELECT", "UPDATE"])).unwrap();
        assert_eq!(
            plan.redacted(),
            vec![
                "ALTER DEFAULT PRIVILEGES FOR ROLE \"owner\" IN SCHEMA \"public\" REVOKE DELETE ON TABLES FROM \"reader\"",
                "ALTER DEFAULT PRIVILEGES FOR ROLE \"owner\" IN SCHEMA \"public\" GRANT UPDATE ON TABLES TO \"reader\"",
            ]
        );
    }

    #[test]
    fn test_all_expansion_converges_against_catalog_rows() {
        let everything = ObjectType::Table.allowed().to_vec();
        let current = state(&everything);
        assert!(DefaultPrivilegesResource::converge_plan(Some(&current), &spec(&["ALL"])).unwrap().is_empty());
    }

    #[test]
    fn test_moving_rule_revokes_old_grantee() {
        let mut current = state(&[Privilege::Select]);
        current.role = "old_reader".into();
        let plan = DefaultPrivilegesResource::converge_plan(Some(&current), &spec(&["SELECT"])).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.redacted()[0].contains("REVOKE ALL ON TABLES FROM \"old_reader\""));
        assert!(plan.redacted()[1].contains("GRANT SELECT ON TABLES TO \"reader\""));
    }

    #[test]
    fn test_changed_database_requires_replacement() {
        let mut current = state(&[Privilege::Select]);
        current.database = "other".into();
        let err = DefaultPrivilegesResource::converge_plan(Some(&current), &spec(&["SELECT"])).unwrap_err();
        assert!(err.message().contains("requires replacement"));
    }

    #[test]
    fn test_rule_key_parse() {
        let key = RuleKey::parse("app-public-owner-reader-sequence").unwrap();
        assert_eq!(key.object_type, ObjectType::Sequence);
        assert!(RuleKey::parse("app-public-owner-reader-view").is_err());
        assert!(RuleKey::parse("app-public-owner-reader").is_err());
    }
}
