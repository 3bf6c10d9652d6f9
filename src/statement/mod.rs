//! Statement Builder
//!
//! Renders DDL from typed diff operations. Every identifier goes through
//! [`quote_identifier`] and every string value through [`quote_literal`];
//! nothing user-supplied is ever concatenated raw.
//!
//! A [`Plan`] is an ordered list of [`Statement`]s. Statements are ordered by
//! [`Phase`] and keep insertion order within a phase, so for example every
//! membership revoke precedes every membership grant.

use serde::Serialize;
use std::fmt;

use crate::capability::{Feature, FeatureGate};
use crate::diff::{ExtensionChange, PolicyChange, RoleAttribute, RoleChange};
use crate::error::Result;
use crate::model::{ObjectType, Privilege, RoleSpec, SchemaPrivilege};

/// Quote an identifier, doubling embedded double quotes
///
/// Identifiers are always quoted, which preserves case exactly.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal
///
/// Single quotes and backslashes are doubled. When a backslash is present
/// the literal is emitted as an escape string (`E'...'`) so the result is
/// independent of `standard_conforming_strings`.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "''");
    if value.contains('\\') {
        format!("E'{escaped}'")
    } else {
        format!("'{escaped}'")
    }
}

/// Ordering bucket for statements in a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Create,
    Rename,
    Ownership,
    Attribute,
    Revoke,
    Grant,
    Reassign,
    DropOwned,
    Drop,
}

/// One rendered DDL statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub phase: Phase,
    /// Logical operation, used in error messages
    pub operation: String,
    pub sql: String,
    /// Carries a password and must never be logged verbatim
    pub sensitive: bool,
}

impl Serialize for Statement {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Statement", 3)?;
        state.serialize_field("phase", &self.phase)?;
        state.serialize_field("operation", &self.operation)?;
        state.serialize_field("sql", &self.redacted())?;
        state.end()
    }
}

impl Statement {
    pub fn new(phase: Phase, operation: impl Into<String>, sql: impl Into<String>) -> Self {
        Self { phase, operation: operation.into(), sql: sql.into(), sensitive: false }
    }

    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// SQL safe to log or print
    #[must_use]
    pub fn redacted(&self) -> String {
        if self.sensitive {
            format!("-- {} (statement redacted, contains a password)", self.operation)
        } else {
            self.sql.clone()
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Ordered statement list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    statements: Vec<Statement>,
}

impl Plan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn extend(&mut self, statements: impl IntoIterator<Item = Statement>) {
        self.statements.extend(statements);
    }

    /// Append another plan
    pub fn append(&mut self, other: Plan) {
        self.statements.extend(other.statements);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Statements in execution order (stable by phase)
    #[must_use]
    pub fn ordered(&self) -> Vec<&Statement> {
        let mut ordered: Vec<&Statement> = self.statements.iter().collect();
        ordered.sort_by_key(|s| s.phase);
        ordered
    }

    /// Redacted SQL in execution order
    #[must_use]
    pub fn redacted(&self) -> Vec<String> {
        self.ordered().into_iter().map(Statement::redacted).collect()
    }
}

impl Serialize for Plan {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.ordered().serialize(serializer)
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Role attribute keyword pairs, rendered as `KEYWORD` / `NOKEYWORD`
fn flag(enabled: bool, keyword: &str) -> String {
    if enabled {
        keyword.to_string()
    } else {
        format!("NO{keyword}")
    }
}

/// Password clause, `None` when no password is managed
pub fn password_clause(spec: &RoleSpec, gate: &FeatureGate) -> Result<Option<String>> {
    let Some(password) = spec.password.as_deref() else {
        return Ok(None);
    };
    if spec.clears_password() {
        return Ok(Some("PASSWORD NULL".to_string()));
    }
    let prefix = if spec.encrypted_password {
        "ENCRYPTED "
    } else {
        gate.require(Feature::UnencryptedPassword)?;
        "UNENCRYPTED "
    };
    Ok(Some(format!("{prefix}PASSWORD {}", quote_literal(password))))
}

/// `BYPASSRLS` clause, gated on row-level security support
pub fn bypass_rls_clause(bypass: Option<bool>, gate: &FeatureGate) -> Result<Option<String>> {
    match bypass {
        None => Ok(None),
        Some(bypass) => {
            gate.require(Feature::RowLevelSecurity)?;
            Ok(Some(flag(bypass, "BYPASSRLS")))
        }
    }
}

/// `CREATE ROLE` with every managed attribute
pub fn create_role(spec: &RoleSpec, gate: &FeatureGate) -> Result<Statement> {
    let mut options = vec![
        flag(spec.superuser, "SUPERUSER"),
        flag(spec.create_database, "CREATEDB"),
        flag(spec.create_role, "CREATEROLE"),
        flag(spec.inherit, "INHERIT"),
        flag(spec.login, "LOGIN"),
        flag(spec.replication, "REPLICATION"),
        format!("CONNECTION LIMIT {}", spec.connection_limit),
    ];
    if let Some(clause) = bypass_rls_clause(spec.bypass_row_level_security, gate)? {
        options.push(clause);
    }
    if !spec.valid_until.is_empty() {
        options.push(format!("VALID UNTIL {}", quote_literal(&spec.valid_until)));
    }
    let password = password_clause(spec, gate)?;
    let sensitive = password.is_some();
    if let Some(clause) = password {
        options.push(clause);
    }

    let with = if gate.supports(Feature::CreateRoleWith) { " WITH" } else { "" };
    let statement = Statement::new(
        Phase::Create,
        format!("creating role {}", quote_identifier(&spec.name)),
        format!("CREATE ROLE {}{with} {}", quote_identifier(&spec.name), options.join(" ")),
    );
    Ok(if sensitive { statement.sensitive() } else { statement })
}

pub fn rename_role(from: &str, to: &str) -> Statement {
    Statement::new(
        Phase::Rename,
        format!("renaming role {} to {}", quote_identifier(from), quote_identifier(to)),
        format!("ALTER ROLE {} RENAME TO {}", quote_identifier(from), quote_identifier(to)),
    )
}

/// `ALTER ROLE name WITH <option>` for a single attribute
pub fn alter_role_option(role: &str, what: &str, option: &str, sensitive: bool) -> Statement {
    let statement = Statement::new(
        Phase::Attribute,
        format!("updating {what} of role {}", quote_identifier(role)),
        format!("ALTER ROLE {} WITH {option}", quote_identifier(role)),
    );
    if sensitive {
        statement.sensitive()
    } else {
        statement
    }
}

pub fn alter_role_flag(role: &str, keyword: &str, enabled: bool) -> Statement {
    alter_role_option(role, &keyword.to_ascii_lowercase(), &flag(enabled, keyword), false)
}

pub fn grant_membership(group: &str, role: &str) -> Statement {
    Statement::new(
        Phase::Grant,
        format!("granting role {} to {}", quote_identifier(group), quote_identifier(role)),
        format!("GRANT {} TO {}", quote_identifier(group), quote_identifier(role)),
    )
}

pub fn revoke_membership(group: &str, role: &str) -> Statement {
    Statement::new(
        Phase::Revoke,
        format!("revoking role {} from {}", quote_identifier(group), quote_identifier(role)),
        format!("REVOKE {} FROM {}", quote_identifier(group), quote_identifier(role)),
    )
}

/// `REASSIGN OWNED BY role TO <current user>`
///
/// Servers without `CURRENT_USER` support get the connecting user's name.
pub fn reassign_owned(role: &str, current_user: &str, gate: &FeatureGate) -> Statement {
    let target = if gate.supports(Feature::ReassignOwnedCurrentUser) {
        "CURRENT_USER".to_string()
    } else {
        quote_identifier(current_user)
    };
    Statement::new(
        Phase::Reassign,
        format!("reassigning objects owned by {}", quote_identifier(role)),
        format!("REASSIGN OWNED BY {} TO {target}", quote_identifier(role)),
    )
}

pub fn drop_owned(role: &str) -> Statement {
    Statement::new(
        Phase::DropOwned,
        format!("dropping objects owned by {}", quote_identifier(role)),
        format!("DROP OWNED BY {}", quote_identifier(role)),
    )
}

pub fn drop_role(role: &str) -> Statement {
    Statement::new(
        Phase::Drop,
        format!("dropping role {}", quote_identifier(role)),
        format!("DROP ROLE {}", quote_identifier(role)),
    )
}

// ============================================================================
// Schemas
// ============================================================================

pub fn create_schema(name: &str, owner: Option<&str>, if_not_exists: bool, gate: &FeatureGate) -> Statement {
    let mut sql = String::from("CREATE SCHEMA ");
    if if_not_exists && gate.supports(Feature::CreateSchemaIfNotExists) {
        sql.push_str("IF NOT EXISTS ");
    }
    sql.push_str(&quote_identifier(name));
    if let Some(owner) = owner {
        sql.push_str(" AUTHORIZATION ");
        sql.push_str(&quote_identifier(owner));
    }
    Statement::new(Phase::Create, format!("creating schema {}", quote_identifier(name)), sql)
}

pub fn rename_schema(from: &str, to: &str) -> Statement {
    Statement::new(
        Phase::Rename,
        format!("renaming schema {} to {}", quote_identifier(from), quote_identifier(to)),
        format!("ALTER SCHEMA {} RENAME TO {}", quote_identifier(from), quote_identifier(to)),
    )
}

pub fn alter_schema_owner(schema: &str, owner: &str) -> Statement {
    Statement::new(
        Phase::Ownership,
        format!("changing owner of schema {}", quote_identifier(schema)),
        format!("ALTER SCHEMA {} OWNER TO {}", quote_identifier(schema), quote_identifier(owner)),
    )
}

pub fn grant_schema(schema: &str, role: &str, privilege: SchemaPrivilege, with_grant_option: bool) -> Statement {
    let suffix = if with_grant_option { " WITH GRANT OPTION" } else { "" };
    Statement::new(
        Phase::Grant,
        format!("granting {} on schema {} to {}", privilege.as_sql(), quote_identifier(schema), quote_identifier(role)),
        format!(
            "GRANT {} ON SCHEMA {} TO {}{suffix}",
            privilege.as_sql(),
            quote_identifier(schema),
            quote_identifier(role)
        ),
    )
}

pub fn revoke_schema(schema: &str, role: &str, privilege: SchemaPrivilege) -> Statement {
    Statement::new(
        Phase::Revoke,
        format!(
            "revoking {} on schema {} from {}",
            privilege.as_sql(),
            quote_identifier(schema),
            quote_identifier(role)
        ),
        format!("REVOKE {} ON SCHEMA {} FROM {}", privilege.as_sql(), quote_identifier(schema), quote_identifier(role)),
    )
}

pub fn revoke_all_schema(schema: &str, role: &str) -> Statement {
    Statement::new(
        Phase::Revoke,
        format!("revoking all on schema {} from {}", quote_identifier(schema), quote_identifier(role)),
        format!("REVOKE ALL ON SCHEMA {} FROM {}", quote_identifier(schema), quote_identifier(role)),
    )
}

pub fn drop_schema(name: &str, cascade: bool) -> Statement {
    let behavior = if cascade { "CASCADE" } else { "RESTRICT" };
    Statement::new(
        Phase::Drop,
        format!("dropping schema {}", quote_identifier(name)),
        format!("DROP SCHEMA {} {behavior}", quote_identifier(name)),
    )
}

// ============================================================================
// Default privileges
// ============================================================================

fn privilege_list(privileges: &[Privilege]) -> String {
    privileges.iter().map(Privilege::as_sql).collect::<Vec<_>>().join(",")
}

pub fn grant_default_privileges(
    owner: &str,
    schema: &str,
    object_type: ObjectType,
    privileges: &[Privilege],
    role: &str,
) -> Statement {
    Statement::new(
        Phase::Grant,
        format!(
            "granting default privileges on {} in schema {} to {}",
            object_type.plural_keyword().to_ascii_lowercase(),
            quote_identifier(schema),
            quote_identifier(role)
        ),
        format!(
            "ALTER DEFAULT PRIVILEGES FOR ROLE {} IN SCHEMA {} GRANT {} ON {} TO {}",
            quote_identifier(owner),
            quote_identifier(schema),
            privilege_list(privileges),
            object_type.plural_keyword(),
            quote_identifier(role)
        ),
    )
}

pub fn revoke_default_privileges(
    owner: &str,
    schema: &str,
    object_type: ObjectType,
    privileges: Option<&[Privilege]>,
    role: &str,
) -> Statement {
    let list = privileges.map_or_else(|| "ALL".to_string(), privilege_list);
    Statement::new(
        Phase::Revoke,
        format!(
            "revoking default privileges on {} in schema {} from {}",
            object_type.plural_keyword().to_ascii_lowercase(),
            quote_identifier(schema),
            quote_identifier(role)
        ),
        format!(
            "ALTER DEFAULT PRIVILEGES FOR ROLE {} IN SCHEMA {} REVOKE {list} ON {} FROM {}",
            quote_identifier(owner),
            quote_identifier(schema),
            object_type.plural_keyword(),
            quote_identifier(role)
        ),
    )
}

// ============================================================================
// Extensions
// ============================================================================

pub fn create_extension(name: &str, schema: Option<&str>, version: Option<&str>) -> Statement {
    let mut sql = format!("CREATE EXTENSION {}", quote_identifier(name));
    if let Some(schema) = schema {
        sql.push_str(" SCHEMA ");
        sql.push_str(&quote_identifier(schema));
    }
    if let Some(version) = version {
        sql.push_str(" VERSION ");
        sql.push_str(&quote_literal(version));
    }
    Statement::new(Phase::Create, format!("creating extension {}", quote_identifier(name)), sql)
}

pub fn alter_extension_schema(name: &str, schema: &str) -> Statement {
    Statement::new(
        Phase::Attribute,
        format!("moving extension {} to schema {}", quote_identifier(name), quote_identifier(schema)),
        format!("ALTER EXTENSION {} SET SCHEMA {}", quote_identifier(name), quote_identifier(schema)),
    )
}

pub fn update_extension(name: &str, version: &str) -> Statement {
    Statement::new(
        Phase::Attribute,
        format!("updating extension {} to version {version}", quote_identifier(name)),
        format!("ALTER EXTENSION {} UPDATE TO {}", quote_identifier(name), quote_literal(version)),
    )
}

pub fn drop_extension(name: &str) -> Statement {
    Statement::new(
        Phase::Drop,
        format!("dropping extension {}", quote_identifier(name)),
        format!("DROP EXTENSION {}", quote_identifier(name)),
    )
}

// ============================================================================
// Rendering diffs
// ============================================================================

/// Render role changes; statements target the post-rename name
pub fn render_role_changes(changes: &[RoleChange], spec: &RoleSpec, gate: &FeatureGate) -> Result<Plan> {
    let name = spec.name.as_str();
    let mut plan = Plan::new();
    for change in changes {
        let statement = match change {
            RoleChange::Rename { from, to } => rename_role(from, to),
            RoleChange::Attribute(attribute) => match *attribute {
                RoleAttribute::Superuser(on) => alter_role_flag(name, "SUPERUSER", on),
                RoleAttribute::CreateDatabase(on) => alter_role_flag(name, "CREATEDB", on),
                RoleAttribute::CreateRole(on) => alter_role_flag(name, "CREATEROLE", on),
                RoleAttribute::Inherit(on) => alter_role_flag(name, "INHERIT", on),
                RoleAttribute::Login(on) => alter_role_flag(name, "LOGIN", on),
                RoleAttribute::Replication(on) => alter_role_flag(name, "REPLICATION", on),
                RoleAttribute::BypassRowLevelSecurity(on) => {
                    gate.require(Feature::RowLevelSecurity)?;
                    alter_role_flag(name, "BYPASSRLS", on)
                }
                RoleAttribute::ConnectionLimit(limit) => {
                    alter_role_option(name, "connection limit", &format!("CONNECTION LIMIT {limit}"), false)
                }
            },
            RoleChange::Password => match password_clause(spec, gate)? {
                Some(clause) => alter_role_option(name, "password", &clause, true),
                None => continue,
            },
            RoleChange::ValidUntil(until) => alter_role_option(
                name,
                "password expiry",
                &format!("VALID UNTIL {}", quote_literal(until)),
                false,
            ),
            RoleChange::RevokeMembership(group) => revoke_membership(group, name),
            RoleChange::GrantMembership(group) => grant_membership(group, name),
        };
        plan.push(statement);
    }
    Ok(plan)
}

/// Render schema policy changes
#[must_use]
pub fn render_policy_changes(schema: &str, changes: &[PolicyChange]) -> Plan {
    let mut plan = Plan::new();
    plan.extend(changes.iter().map(|change| match change {
        PolicyChange::RevokeAll { role } => revoke_all_schema(schema, role),
        PolicyChange::Revoke { role, privilege } => revoke_schema(schema, role, *privilege),
        PolicyChange::Grant { role, privilege, with_grant_option } => {
            grant_schema(schema, role, *privilege, *with_grant_option)
        }
    }));
    plan
}

/// Render extension changes
#[must_use]
pub fn render_extension_changes(name: &str, changes: &[ExtensionChange]) -> Plan {
    let mut plan = Plan::new();
    plan.extend(changes.iter().map(|change| match change {
        ExtensionChange::SetSchema(schema) => alter_extension_schema(name, schema),
        ExtensionChange::UpdateVersion(version) => update_extension(name, version),
    }));
    plan
}
