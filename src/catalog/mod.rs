//! Catalog Reader
//!
//! Read-only queries against the system catalogs that materialize observed
//! state. "No rows" is a legitimate answer and comes back as `Ok(None)` or an
//! empty set; only query execution failures are errors.
//!
//! Reads that depend on optional server features consult the
//! [`FeatureGate`] and skip the column when unsupported.

use std::collections::{BTreeMap, BTreeSet};

use crate::capability::{Feature, FeatureGate};
use crate::engine::Session;
use crate::error::{ReconcileError, Result};
use crate::model::{
    DefaultPrivilegeState, ExtensionState, ObjectType, PolicyBit, PolicyBits, Privilege, RoleState,
    SchemaPrivilege, SchemaState, VALID_UNTIL_INFINITY,
};

async fn any_rows<S: Session>(session: &mut S, sql: &str, params: &[&str]) -> Result<bool> {
    Ok(!session.query(sql, params).await?.is_empty())
}

// ============================================================================
// Roles
// ============================================================================

pub async fn role_exists<S: Session>(session: &mut S, name: &str) -> Result<bool> {
    any_rows(session, "SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = $1", &[name]).await
}

fn role_query(gate: &FeatureGate) -> String {
    let bypass = if gate.supports(Feature::RowLevelSecurity) { "r.rolbypassrls" } else { "NULL::BOOL" };
    format!(
        "SELECT r.rolname::TEXT AS name, \
         r.rolsuper AS superuser, \
         r.rolinherit AS inherit, \
         r.rolcreaterole AS create_role, \
         r.rolcreatedb AS create_database, \
         r.rolcanlogin AS login, \
         r.rolreplication AS replication, \
         r.rolconnlimit AS connection_limit, \
         COALESCE(r.rolvaliduntil::TEXT, '{VALID_UNTIL_INFINITY}') AS valid_until, \
         {bypass} AS bypass_row_level_security, \
         ARRAY(SELECT g.rolname::TEXT FROM pg_catalog.pg_auth_members m \
               JOIN pg_catalog.pg_roles g ON g.oid = m.roleid \
               WHERE m.member = r.oid ORDER BY 1) AS roles \
         FROM pg_catalog.pg_roles r WHERE r.rolname = $1"
    )
}

/// Read a role's attributes and direct memberships
///
/// The stored password hash is only read when `include_password_hash` is
/// set, since `pg_shadow` is restricted to superusers.
pub async fn read_role<S: Session>(
    session: &mut S,
    name: &str,
    gate: &FeatureGate,
    include_password_hash: bool,
) -> Result<Option<RoleState>> {
    let result = session.query(&role_query(gate), &[name]).await?;
    let Some(row) = result.first() else {
        return Ok(None);
    };

    let connection_limit = i32::try_from(row.integer("connection_limit")?)
        .map_err(|e| ReconcileError::query_failed(format!("Invalid connection limit: {e}")))?;

    let mut state = RoleState {
        name: row.text("name")?,
        superuser: row.boolean("superuser")?,
        create_database: row.boolean("create_database")?,
        create_role: row.boolean("create_role")?,
        inherit: row.boolean("inherit")?,
        login: row.boolean("login")?,
        replication: row.boolean("replication")?,
        connection_limit,
        valid_until: row.text("valid_until")?,
        bypass_row_level_security: row.opt_boolean("bypass_row_level_security")?,
        roles: row.text_array("roles")?.into_iter().collect(),
        password: None,
        password_hash: None,
    };

    if include_password_hash {
        let shadow = session
            .query("SELECT passwd::TEXT AS passwd FROM pg_catalog.pg_shadow WHERE usename = $1", &[name])
            .await?;
        state.password_hash = match shadow.first() {
            Some(row) => row.opt_text("passwd")?,
            None => None,
        };
    }

    Ok(Some(state))
}

// ============================================================================
// Databases and schemas
// ============================================================================

pub async fn database_exists<S: Session>(session: &mut S, name: &str) -> Result<bool> {
    any_rows(session, "SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1", &[name]).await
}

pub async fn schema_exists<S: Session>(session: &mut S, name: &str) -> Result<bool> {
    any_rows(session, "SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1", &[name]).await
}

const SCHEMA_QUERY: &str = "SELECT n.nspname::TEXT AS name, \
     pg_catalog.pg_get_userbyid(n.nspowner)::TEXT AS owner \
     FROM pg_catalog.pg_namespace n WHERE n.nspname = $1";

// PUBLIC (grantee 0) has no pg_roles row and drops out of the join
const SCHEMA_POLICY_QUERY: &str = "SELECT g.rolname::TEXT AS grantee, \
     a.privilege_type::TEXT AS privilege, \
     a.is_grantable AS grantable \
     FROM (SELECT n.nspowner, (pg_catalog.aclexplode(n.nspacl)).* \
           FROM pg_catalog.pg_namespace n WHERE n.nspname = $1) a \
     JOIN pg_catalog.pg_roles g ON g.oid = a.grantee \
     WHERE a.grantee <> a.nspowner \
     ORDER BY 1, 2";

/// Read a schema's owner and per-grantee policy bits
///
/// `session` must be connected to `database`.
pub async fn read_schema<S: Session>(session: &mut S, database: &str, name: &str) -> Result<Option<SchemaState>> {
    let result = session.query(SCHEMA_QUERY, &[name]).await?;
    let Some(row) = result.first() else {
        return Ok(None);
    };
    let schema_name = row.text("name")?;
    let owner = row.text("owner")?;

    let acl = session.query(SCHEMA_POLICY_QUERY, &[name]).await?;
    let mut policies: BTreeMap<String, PolicyBits> = BTreeMap::new();
    for row in acl.iter() {
        let Some(privilege) = SchemaPrivilege::parse(&row.text("privilege")?) else {
            continue;
        };
        let bits = policies.entry(row.text("grantee")?).or_default();
        bits.insert(PolicyBit::base(privilege));
        if row.boolean("grantable")? {
            bits.insert(PolicyBit::with_grant(privilege));
        }
    }

    Ok(Some(SchemaState { name: schema_name, database: database.to_string(), owner, policies }))
}

// ============================================================================
// Default privileges
// ============================================================================

const DEFAULT_PRIVILEGES_QUERY: &str = "SELECT a.privilege_type::TEXT AS privilege \
     FROM (SELECT (pg_catalog.aclexplode(d.defaclacl)).* \
           FROM pg_catalog.pg_default_acl d \
           JOIN pg_catalog.pg_namespace n ON n.oid = d.defaclnamespace \
           JOIN pg_catalog.pg_roles o ON o.oid = d.defaclrole \
           WHERE n.nspname = $1 AND o.rolname = $2 AND d.defaclobjtype::TEXT = $3) a \
     JOIN pg_catalog.pg_roles g ON g.oid = a.grantee \
     WHERE g.rolname = $4 \
     ORDER BY 1";

/// Read the default privileges `owner` grants to `role` on future objects
///
/// `None` when no rule row exists for the tuple.
pub async fn read_default_privileges<S: Session>(
    session: &mut S,
    database: &str,
    schema: &str,
    owner: &str,
    role: &str,
    object_type: ObjectType,
) -> Result<Option<DefaultPrivilegeState>> {
    let result = session
        .query(DEFAULT_PRIVILEGES_QUERY, &[schema, owner, object_type.catalog_code(), role])
        .await?;
    if result.is_empty() {
        return Ok(None);
    }

    let mut privileges = BTreeSet::new();
    for row in result.iter() {
        let raw = row.text("privilege")?;
        let privilege = Privilege::parse(&raw)
            .ok_or_else(|| ReconcileError::query_failed(format!("Unknown privilege '{raw}' in pg_default_acl")))?;
        privileges.insert(privilege);
    }

    Ok(Some(DefaultPrivilegeState {
        database: database.to_string(),
        schema: schema.to_string(),
        owner: owner.to_string(),
        role: role.to_string(),
        object_type,
        privileges,
    }))
}

// ============================================================================
// Extensions
// ============================================================================

pub async fn extension_exists<S: Session>(session: &mut S, name: &str) -> Result<bool> {
    any_rows(session, "SELECT 1 FROM pg_catalog.pg_extension WHERE extname = $1", &[name]).await
}

const EXTENSION_QUERY: &str = "SELECT e.extname::TEXT AS name, \
     n.nspname::TEXT AS schema, \
     e.extversion::TEXT AS version, \
     a.default_version::TEXT AS default_version \
     FROM pg_catalog.pg_extension e \
     JOIN pg_catalog.pg_namespace n ON n.oid = e.extnamespace \
     LEFT JOIN pg_catalog.pg_available_extensions a ON a.name = e.extname \
     WHERE e.extname = $1";

pub async fn read_extension<S: Session>(
    session: &mut S,
    database: &str,
    name: &str,
) -> Result<Option<ExtensionState>> {
    let result = session.query(EXTENSION_QUERY, &[name]).await?;
    let Some(row) = result.first() else {
        return Ok(None);
    };

    Ok(Some(ExtensionState {
        name: row.text("name")?,
        database: database.to_string(),
        schema: row.text("schema")?,
        version: row.text("version")?,
        default_version: row.opt_text("default_version")?,
    }))
}
