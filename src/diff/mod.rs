//! Diff Engine
//!
//! Computes typed change operations between observed and desired state.
//! Both sides are treated as sets: `to_revoke = current - desired` and
//! `to_grant = desired - current`. Scalar attributes produce a change only on
//! inequality, so diffing a state against itself is always empty.
//!
//! Nothing here touches the database or renders SQL; see
//! [`crate::statement`] for rendering.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ReconcileError, Result};
use crate::model::{
    valid_until_matches, ExtensionSpec, ExtensionState, NormalizedSchema, PolicyBit, PolicyBits,
    RoleSpec, RoleState, SchemaPrivilege, SchemaState,
};

/// Set difference in both directions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<T> {
    pub to_revoke: Vec<T>,
    pub to_grant: Vec<T>,
}

impl<T: Ord + Clone> SetDiff<T> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_revoke.is_empty() && self.to_grant.is_empty()
    }

    /// Apply revokes then grants to `current`
    #[must_use]
    pub fn apply(&self, current: &BTreeSet<T>) -> BTreeSet<T> {
        let mut result = current.clone();
        for item in &self.to_revoke {
            result.remove(item);
        }
        result.extend(self.to_grant.iter().cloned());
        result
    }
}

/// Diff two sets, output ordered
#[must_use]
pub fn diff_sets<T: Ord + Clone>(current: &BTreeSet<T>, desired: &BTreeSet<T>) -> SetDiff<T> {
    SetDiff {
        to_revoke: current.difference(desired).cloned().collect(),
        to_grant: desired.difference(current).cloned().collect(),
    }
}

// ============================================================================
// Roles
// ============================================================================

/// A scalar role attribute change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleAttribute {
    Superuser(bool),
    CreateDatabase(bool),
    CreateRole(bool),
    Inherit(bool),
    Login(bool),
    Replication(bool),
    BypassRowLevelSecurity(bool),
    ConnectionLimit(i32),
}

/// One role change operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleChange {
    Rename { from: String, to: String },
    Attribute(RoleAttribute),
    /// Set the declared password (value held by the desired state)
    Password,
    ValidUntil(String),
    RevokeMembership(String),
    GrantMembership(String),
}

/// Diff an observed role against a normalized spec
///
/// Memberships of the renamed role are compared by group name, so a rename
/// alone never produces membership churn.
#[must_use]
pub fn diff_role(current: &RoleState, desired: &RoleSpec) -> Vec<RoleChange> {
    let mut changes = Vec::new();

    if current.name != desired.name {
        changes.push(RoleChange::Rename { from: current.name.clone(), to: desired.name.clone() });
    }

    let scalar: [(bool, bool, fn(bool) -> RoleAttribute); 6] = [
        (current.superuser, desired.superuser, RoleAttribute::Superuser),
        (current.create_database, desired.create_database, RoleAttribute::CreateDatabase),
        (current.create_role, desired.create_role, RoleAttribute::CreateRole),
        (current.inherit, desired.inherit, RoleAttribute::Inherit),
        (current.login, desired.login, RoleAttribute::Login),
        (current.replication, desired.replication, RoleAttribute::Replication),
    ];
    for (observed, declared, attribute) in scalar {
        if observed != declared {
            changes.push(RoleChange::Attribute(attribute(declared)));
        }
    }

    if let Some(bypass) = desired.bypass_row_level_security {
        if current.bypass_row_level_security != Some(bypass) {
            changes.push(RoleChange::Attribute(RoleAttribute::BypassRowLevelSecurity(bypass)));
        }
    }

    if current.connection_limit != desired.connection_limit {
        changes.push(RoleChange::Attribute(RoleAttribute::ConnectionLimit(desired.connection_limit)));
    }

    if desired.password.is_some() && desired.password != current.password {
        changes.push(RoleChange::Password);
    }

    if !valid_until_matches(&current.valid_until, &desired.valid_until) {
        changes.push(RoleChange::ValidUntil(desired.valid_until.clone()));
    }

    let memberships = diff_sets(&current.roles, &desired.roles);
    changes.extend(memberships.to_revoke.into_iter().map(RoleChange::RevokeMembership));
    changes.extend(memberships.to_grant.into_iter().map(RoleChange::GrantMembership));

    changes
}

// ============================================================================
// Schema policies
// ============================================================================

/// One schema policy change operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyChange {
    /// Every bit the grantee held, grant options included
    RevokeAll { role: String },
    /// One privilege, including its grant option
    Revoke { role: String, privilege: SchemaPrivilege },
    Grant { role: String, privilege: SchemaPrivilege, with_grant_option: bool },
}

impl PolicyChange {
    #[must_use]
    pub fn role(&self) -> &str {
        match self {
            Self::RevokeAll { role } | Self::Revoke { role, .. } | Self::Grant { role, .. } => role,
        }
    }

    #[must_use]
    pub const fn is_revoke(&self) -> bool {
        matches!(self, Self::RevokeAll { .. } | Self::Revoke { .. })
    }
}

/// Per-privilege transition for one grantee
fn diff_privilege(
    role: &str,
    privilege: SchemaPrivilege,
    current: &PolicyBits,
    desired: &PolicyBits,
    changes: &mut Vec<PolicyChange>,
) {
    let had = current.contains(&PolicyBit::base(privilege));
    let had_grant = current.contains(&PolicyBit::with_grant(privilege));
    let wants = desired.contains(&PolicyBit::base(privilege));
    let wants_grant = desired.contains(&PolicyBit::with_grant(privilege));

    let revoke = || PolicyChange::Revoke { role: role.to_string(), privilege };
    let grant = |with_grant_option| PolicyChange::Grant { role: role.to_string(), privilege, with_grant_option };

    if had && !wants {
        changes.push(revoke());
    } else if had_grant && !wants_grant {
        // Narrowing cannot be expressed in one statement: drop, then re-grant the base bit
        changes.push(revoke());
        changes.push(grant(false));
    } else if wants_grant && !had_grant {
        changes.push(grant(true));
    } else if wants && !had {
        changes.push(grant(false));
    }
}

/// Diff per-grantee policy bits
///
/// Entries for `owner` are skipped on both sides. A grantee absent from
/// `desired` gets a full revoke.
#[must_use]
pub fn diff_policies(
    current: &BTreeMap<String, PolicyBits>,
    desired: &BTreeMap<String, PolicyBits>,
    owner: &str,
) -> Vec<PolicyChange> {
    let empty = PolicyBits::new();
    let grantees: BTreeSet<&String> = current.keys().chain(desired.keys()).collect();

    let mut changes = Vec::new();
    for role in grantees {
        if role == owner {
            continue;
        }
        let have = current.get(role).unwrap_or(&empty);
        let want = desired.get(role).unwrap_or(&empty);
        if have == want {
            continue;
        }
        if want.is_empty() {
            changes.push(PolicyChange::RevokeAll { role: role.clone() });
            continue;
        }
        for privilege in [SchemaPrivilege::Create, SchemaPrivilege::Usage] {
            diff_privilege(role, privilege, have, want, &mut changes);
        }
    }
    changes
}

/// Full schema diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    pub rename: Option<(String, String)>,
    pub owner: Option<String>,
    pub policies: Vec<PolicyChange>,
}

impl SchemaDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rename.is_none() && self.owner.is_none() && self.policies.is_empty()
    }
}

/// Diff an observed schema against a normalized spec
pub fn diff_schema(current: &SchemaState, desired: &NormalizedSchema) -> Result<SchemaDiff> {
    if current.database != desired.database {
        return Err(ReconcileError::validation(format!(
            "moving schema '{}' from database '{}' to '{}' requires replacement",
            current.name, current.database, desired.database
        )));
    }

    let rename = (current.name != desired.name).then(|| (current.name.clone(), desired.name.clone()));
    let owner = desired.owner.as_ref().filter(|o| **o != current.owner).cloned();
    let effective_owner = desired.owner.as_deref().unwrap_or(&current.owner);

    Ok(SchemaDiff {
        rename,
        owner,
        policies: diff_policies(&current.policies, &desired.policies, effective_owner),
    })
}

// ============================================================================
// Extensions
// ============================================================================

/// One extension change operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionChange {
    SetSchema(String),
    UpdateVersion(String),
}

/// Diff an observed extension against a normalized spec
///
/// An unset version converges to the server's default version.
pub fn diff_extension(current: &ExtensionState, desired: &ExtensionSpec) -> Result<Vec<ExtensionChange>> {
    if current.name != desired.name {
        return Err(ReconcileError::validation(format!(
            "renaming extension '{}' to '{}' requires replacement",
            current.name, desired.name
        )));
    }
    if let Some(database) = desired.database.as_deref().filter(|d| *d != current.database) {
        return Err(ReconcileError::validation(format!(
            "moving extension '{}' from database '{}' to '{database}' requires replacement",
            current.name, current.database
        )));
    }

    let mut changes = Vec::new();
    if let Some(schema) = desired.schema.as_ref().filter(|s| **s != current.schema) {
        changes.push(ExtensionChange::SetSchema(schema.clone()));
    }
    let target = desired.version.as_ref().or(current.default_version.as_ref());
    if let Some(version) = target.filter(|v| **v != current.version) {
        changes.push(ExtensionChange::UpdateVersion(version.clone()));
    }
    Ok(changes)
}
