//! Desired and Observed State Types
//!
//! One explicit record type per entity kind: roles, schemas (with their
//! access policies), default-privilege rules and extensions. The `*Spec`
//! types are the declared desired state as deserialized from configuration;
//! the `*State` types are what the catalog reader observes.
//!
//! # Normalization
//! Specs are normalized before diffing so that both sides compare as sets of
//! canonical values:
//! - identifiers are unquoted (`"Foo"` becomes `Foo`) and then always
//!   re-quoted on output, so case is preserved exactly
//! - privilege names are upper-cased and checked against the allow-list of
//!   their object type, `ALL` expands to the whole list
//! - duplicate schema policies for one grantee merge by union

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{ReconcileError, Result};

/// Longest identifier the server keeps without truncation (NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Sentinel meaning "password never expires"
pub const VALID_UNTIL_INFINITY: &str = "infinity";

// ============================================================================
// Identifiers
// ============================================================================

/// Canonicalize a declared identifier
///
/// Surrounding double quotes are stripped and embedded `""` unescaped, so
/// `"My Role"` and `My Role` name the same role. Empty names and names the
/// server would truncate are rejected.
pub fn normalize_identifier(raw: &str, what: &str) -> Result<String> {
    let trimmed = raw.trim();
    let name = match trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) if trimmed.len() >= 2 => inner.replace("\"\"", "\""),
        _ => trimmed.to_string(),
    };

    if name.is_empty() {
        return Err(ReconcileError::validation(format!("{what} name cannot be empty")));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(ReconcileError::validation(format!(
            "{what} name '{name}' exceeds {MAX_IDENTIFIER_LEN} bytes and would be truncated by the server"
        )));
    }
    if name.contains('\0') {
        return Err(ReconcileError::validation(format!("{what} name contains a NUL byte")));
    }

    Ok(name)
}

/// Encode a composite identity as `<part>-<part>...`
#[must_use]
pub fn encode_identity(parts: &[&str]) -> String {
    parts.join("-")
}

/// Decode a composite identity with exactly `N` segments
///
/// A wrong segment count is a hard input error, never "not found".
pub fn decode_identity<const N: usize>(id: &str, expected: &[&str; N]) -> Result<[String; N]> {
    let invalid = || {
        ReconcileError::validation(format!(
            "identity '{id}' has not the expected format '{}'",
            expected.join("-")
        ))
    };
    let parts: Vec<String> = id.split('-').map(str::to_string).collect();
    if parts.iter().any(String::is_empty) {
        return Err(invalid());
    }
    parts.try_into().map_err(|_| invalid())
}

// ============================================================================
// Privileges and allow-lists
// ============================================================================

/// Object types that default-privilege rules can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Table,
    Sequence,
}

impl ObjectType {
    /// Parse a configured object type name
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "sequence" => Ok(Self::Sequence),
            other => Err(ReconcileError::validation(format!("unknown object type {other}"))),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Sequence => "sequence",
        }
    }

    /// Plural keyword used by `ALTER DEFAULT PRIVILEGES ... ON <kind>`
    #[must_use]
    pub const fn plural_keyword(&self) -> &'static str {
        match self {
            Self::Table => "TABLES",
            Self::Sequence => "SEQUENCES",
        }
    }

    /// `pg_default_acl.defaclobjtype` code
    #[must_use]
    pub const fn catalog_code(&self) -> &'static str {
        match self {
            Self::Table => "r",
            Self::Sequence => "S",
        }
    }

    /// Privileges `ALL` stands for on this object type
    #[must_use]
    pub const fn allowed(&self) -> &'static [Privilege] {
        match self {
            Self::Table => &[
                Privilege::Select,
                Privilege::Insert,
                Privilege::Update,
                Privilege::Delete,
                Privilege::Truncate,
                Privilege::References,
                Privilege::Trigger,
            ],
            Self::Sequence => &[Privilege::Usage, Privilege::Select, Privilege::Update],
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named privilege bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    Truncate,
    References,
    Trigger,
    Usage,
}

impl Privilege {
    /// Parse a privilege keyword (case-insensitive)
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let privilege = match raw.trim().to_ascii_uppercase().as_str() {
            "SELECT" => Self::Select,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "TRUNCATE" => Self::Truncate,
            "REFERENCES" => Self::References,
            "TRIGGER" => Self::Trigger,
            "USAGE" => Self::Usage,
            _ => return None,
        };
        Some(privilege)
    }

    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::References => "REFERENCES",
            Self::Trigger => "TRIGGER",
            Self::Usage => "USAGE",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Check privileges against the allow-list of an object type
///
/// Returns the canonical privilege set, with `ALL` expanded.
pub fn validate_privileges<S: AsRef<str>>(
    object_type: &str,
    privileges: &[S],
) -> Result<(ObjectType, BTreeSet<Privilege>)> {
    let object_type = ObjectType::parse(object_type)?;
    let allowed = object_type.allowed();

    let mut set = BTreeSet::new();
    for raw in privileges {
        let raw = raw.as_ref();
        if raw.trim().eq_ignore_ascii_case("ALL") {
            set.extend(allowed.iter().copied());
            continue;
        }
        match Privilege::parse(raw) {
            Some(privilege) if allowed.contains(&privilege) => {
                set.insert(privilege);
            }
            _ => {
                return Err(ReconcileError::validation(format!(
                    "{raw} is not an allowed privilege for object type {object_type}"
                )))
            }
        }
    }

    Ok((object_type, set))
}

// ============================================================================
// Roles
// ============================================================================

/// Declared role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RoleSpec {
    /// Role name, the natural identity once created
    pub name: String,

    /// Password to set. `"NULL"` removes the password.
    /// WARNING: Sensitive data, never logged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Store the password encrypted (`ENCRYPTED PASSWORD`)
    pub encrypted_password: bool,

    /// Password expiry timestamp, `infinity` for never, empty to leave unmanaged
    pub valid_until: String,

    /// Concurrent connection limit, `-1` for unlimited
    pub connection_limit: i32,

    pub superuser: bool,
    pub create_database: bool,
    pub create_role: bool,
    pub inherit: bool,
    pub login: bool,
    pub replication: bool,

    /// Bypass row-level security. Unset means "not managed", which lets the
    /// same document apply to servers without row-level security.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass_row_level_security: Option<bool>,

    /// Roles this role is a member of
    pub roles: BTreeSet<String>,

    /// Skip `DROP ROLE` when deleting
    pub skip_drop_role: bool,

    /// Skip `REASSIGN OWNED` and `DROP OWNED` when deleting
    pub skip_reassign_owned: bool,
}

impl Default for RoleSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            password: None,
            encrypted_password: true,
            valid_until: VALID_UNTIL_INFINITY.to_string(),
            connection_limit: -1,
            superuser: false,
            create_database: false,
            create_role: false,
            inherit: true,
            login: false,
            replication: false,
            bypass_row_level_security: None,
            roles: BTreeSet::new(),
            skip_drop_role: false,
            skip_reassign_owned: false,
        }
    }
}

impl RoleSpec {
    /// Create a spec with default attributes
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Validate and canonicalize
    pub fn normalize(&self) -> Result<Self> {
        if self.connection_limit < -1 {
            return Err(ReconcileError::validation("connection_limit can not be less than -1"));
        }

        let roles = self
            .roles
            .iter()
            .map(|r| normalize_identifier(r, "granted role"))
            .collect::<Result<BTreeSet<_>>>()?;

        let valid_until = if self.valid_until.trim().eq_ignore_ascii_case(VALID_UNTIL_INFINITY) {
            VALID_UNTIL_INFINITY.to_string()
        } else {
            self.valid_until.trim().to_string()
        };

        Ok(Self {
            name: normalize_identifier(&self.name, "role")?,
            roles,
            valid_until,
            ..self.clone()
        })
    }

    /// Deletion flags
    #[must_use]
    pub const fn drop_options(&self) -> RoleDropOptions {
        RoleDropOptions {
            skip_reassign_owned: self.skip_reassign_owned,
            skip_drop_role: self.skip_drop_role,
        }
    }

    /// Whether `password` asks for `PASSWORD NULL`
    #[must_use]
    pub fn clears_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| p.eq_ignore_ascii_case("NULL"))
    }
}

/// Flags controlling role deletion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDropOptions {
    pub skip_reassign_owned: bool,
    pub skip_drop_role: bool,
}

/// Observed role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleState {
    pub name: String,
    pub superuser: bool,
    pub create_database: bool,
    pub create_role: bool,
    pub inherit: bool,
    pub login: bool,
    pub replication: bool,
    pub connection_limit: i32,
    pub valid_until: String,

    /// `None` when the server cannot report it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass_row_level_security: Option<bool>,

    /// Direct memberships, ordered by name
    pub roles: BTreeSet<String>,

    /// Password last applied, carried from the caller's state
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Stored password hash, only visible to superusers
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
}

// ============================================================================
// Schemas and policies
// ============================================================================

/// Schema-level privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaPrivilege {
    Create,
    Usage,
}

impl SchemaPrivilege {
    /// Parse an `aclexplode` privilege type
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Some(Self::Create),
            "USAGE" => Some(Self::Usage),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Usage => "USAGE",
        }
    }
}

/// One policy bit: a privilege, or the grant option on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyBit {
    pub privilege: SchemaPrivilege,
    pub grant_option: bool,
}

impl PolicyBit {
    #[must_use]
    pub const fn base(privilege: SchemaPrivilege) -> Self {
        Self { privilege, grant_option: false }
    }

    #[must_use]
    pub const fn with_grant(privilege: SchemaPrivilege) -> Self {
        Self { privilege, grant_option: true }
    }
}

/// Privilege bits held by one grantee on one schema
pub type PolicyBits = BTreeSet<PolicyBit>;

/// Declared grantee policy on a schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PolicySpec {
    /// Grantee role
    pub role: String,
    pub create: bool,
    pub create_with_grant: bool,
    pub usage: bool,
    pub usage_with_grant: bool,
}

impl PolicySpec {
    /// Canonical bit set; a `*_with_grant` flag implies its base privilege
    #[must_use]
    pub fn bits(&self) -> PolicyBits {
        let mut bits = PolicyBits::new();
        for (privilege, base, grant) in [
            (SchemaPrivilege::Create, self.create, self.create_with_grant),
            (SchemaPrivilege::Usage, self.usage, self.usage_with_grant),
        ] {
            if base || grant {
                bits.insert(PolicyBit::base(privilege));
            }
            if grant {
                bits.insert(PolicyBit::with_grant(privilege));
            }
        }
        bits
    }

    /// Rebuild the declarative flags from a bit set
    #[must_use]
    pub fn from_bits(role: impl Into<String>, bits: &PolicyBits) -> Self {
        let has = |bit: PolicyBit| bits.contains(&bit);
        let create_with_grant = has(PolicyBit::with_grant(SchemaPrivilege::Create));
        let usage_with_grant = has(PolicyBit::with_grant(SchemaPrivilege::Usage));
        Self {
            role: role.into(),
            create: has(PolicyBit::base(SchemaPrivilege::Create)) && !create_with_grant,
            create_with_grant,
            usage: has(PolicyBit::base(SchemaPrivilege::Usage)) && !usage_with_grant,
            usage_with_grant,
        }
    }
}

/// Declared schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SchemaSpec {
    pub name: String,

    /// Target database, the connection's database when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Owning role, the connecting user when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Use `CREATE SCHEMA IF NOT EXISTS`
    pub if_not_exists: bool,

    #[serde(rename = "policy")]
    pub policies: Vec<PolicySpec>,
}

impl Default for SchemaSpec {
    fn default() -> Self {
        Self { name: String::new(), database: None, owner: None, if_not_exists: true, policies: Vec::new() }
    }
}

impl SchemaSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Validate and canonicalize, merging duplicate grantees by union
    pub fn normalize(&self, default_database: &str) -> Result<NormalizedSchema> {
        let mut policies: BTreeMap<String, PolicyBits> = BTreeMap::new();
        for policy in &self.policies {
            let role = normalize_identifier(&policy.role, "policy role")?;
            let bits = policy.bits();
            if bits.is_empty() {
                continue;
            }
            policies.entry(role).or_default().extend(bits);
        }

        Ok(NormalizedSchema {
            name: normalize_identifier(&self.name, "schema")?,
            database: normalize_identifier(
                self.database.as_deref().unwrap_or(default_database),
                "database",
            )?,
            owner: self.owner.as_deref().map(|o| normalize_identifier(o, "owner")).transpose()?,
            if_not_exists: self.if_not_exists,
            policies,
        })
    }
}

/// Schema spec after normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSchema {
    pub name: String,
    pub database: String,
    pub owner: Option<String>,
    pub if_not_exists: bool,
    pub policies: BTreeMap<String, PolicyBits>,
}

/// Observed schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaState {
    pub name: String,
    pub database: String,
    pub owner: String,
    /// Grantee → bits, excluding PUBLIC and the owner
    #[serde(serialize_with = "serialize_policies", skip_deserializing)]
    pub policies: BTreeMap<String, PolicyBits>,
}

fn serialize_policies<S: serde::Serializer>(
    policies: &BTreeMap<String, PolicyBits>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let specs: Vec<PolicySpec> =
        policies.iter().map(|(role, bits)| PolicySpec::from_bits(role.clone(), bits)).collect();
    specs.serialize(serializer)
}

// ============================================================================
// Default privileges
// ============================================================================

/// Declared default-privilege rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DefaultPrivilegeSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub schema: String,
    /// Role whose future objects are affected
    pub owner: String,
    /// Grantee
    pub role: String,
    pub object_type: String,
    pub privileges: Vec<String>,
}

impl DefaultPrivilegeSpec {
    /// Validate against the allow-list and canonicalize
    pub fn normalize(&self, default_database: &str) -> Result<NormalizedDefaultPrivileges> {
        let (object_type, privileges) = validate_privileges(&self.object_type, &self.privileges)?;
        if privileges.is_empty() {
            return Err(ReconcileError::validation("privileges cannot be empty"));
        }

        Ok(NormalizedDefaultPrivileges {
            database: normalize_identifier(
                self.database.as_deref().unwrap_or(default_database),
                "database",
            )?,
            schema: normalize_identifier(&self.schema, "schema")?,
            owner: normalize_identifier(&self.owner, "owner")?,
            role: normalize_identifier(&self.role, "role")?,
            object_type,
            privileges,
        })
    }
}

/// Default-privilege rule after normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDefaultPrivileges {
    pub database: String,
    pub schema: String,
    pub owner: String,
    pub role: String,
    pub object_type: ObjectType,
    pub privileges: BTreeSet<Privilege>,
}

impl NormalizedDefaultPrivileges {
    /// `database-schema-owner-role-object_type`
    #[must_use]
    pub fn identity(&self) -> String {
        encode_identity(&[
            &self.database,
            &self.schema,
            &self.owner,
            &self.role,
            self.object_type.as_str(),
        ])
    }
}

/// Observed default-privilege rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPrivilegeState {
    pub database: String,
    pub schema: String,
    pub owner: String,
    pub role: String,
    pub object_type: ObjectType,
    pub privileges: BTreeSet<Privilege>,
}

// ============================================================================
// Extensions
// ============================================================================

/// Declared extension
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExtensionSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Installation schema, server default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Version, latest available when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ExtensionSpec {
    pub fn normalize(&self, default_database: &str) -> Result<Self> {
        let version = self.version.as_deref().map(str::trim).filter(|v| !v.is_empty());
        Ok(Self {
            name: normalize_identifier(&self.name, "extension")?,
            database: Some(normalize_identifier(
                self.database.as_deref().unwrap_or(default_database),
                "database",
            )?),
            schema: self.schema.as_deref().map(|s| normalize_identifier(s, "schema")).transpose()?,
            version: version.map(str::to_string),
        })
    }
}

/// Observed extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionState {
    pub name: String,
    pub database: String,
    pub schema: String,
    pub version: String,
    /// Version `CREATE EXTENSION` would install today
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_version: Option<String>,
}

// ============================================================================
// VALID UNTIL comparison
// ============================================================================

enum Expiry {
    Infinity,
    Zoned(DateTime<FixedOffset>),
    Local(NaiveDateTime),
    Raw(String),
}

fn parse_expiry(raw: &str) -> Expiry {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case(VALID_UNTIL_INFINITY) {
        return Expiry::Infinity;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Expiry::Zoned(ts);
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Expiry::Zoned(ts);
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Expiry::Local(ts);
        }
    }
    if let Some(midnight) =
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Expiry::Local(midnight);
    }
    Expiry::Raw(raw.to_string())
}

/// Compare a catalog `VALID UNTIL` value with a declared one
///
/// Zoned timestamps compare as instants. When either side has no zone the
/// wall-clock values are compared. An empty declaration is unmanaged and
/// always matches.
#[must_use]
pub fn valid_until_matches(observed: &str, declared: &str) -> bool {
    if declared.trim().is_empty() {
        return true;
    }
    match (parse_expiry(observed), parse_expiry(declared)) {
        (Expiry::Infinity, Expiry::Infinity) => true,
        (Expiry::Zoned(a), Expiry::Zoned(b)) => a == b,
        (Expiry::Zoned(a), Expiry::Local(b)) | (Expiry::Local(b), Expiry::Zoned(a)) => {
            a.naive_local() == b
        }
        (Expiry::Local(a), Expiry::Local(b)) => a == b,
        (Expiry::Raw(a), Expiry::Raw(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_validate_table_privileges() {
        let (object_type, privileges) = validate_privileges("table", &["SELECT", "TRUNCATE"]).unwrap();
        assert_eq!(object_type, ObjectType::Table);
        assert_eq!(privileges, BTreeSet::from([Privilege::Select, Privilege::Truncate]));
    }

    #[test]
    fn test_validate_sequence_rejects_truncate() {
        let err = validate_privileges("sequence", &["TRUNCATE"]).unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
        assert!(err.message().contains("TRUNCATE is not an allowed privilege for object type sequence"));
    }

    #[test]
    fn test_validate_unknown_object_type() {
        let err = validate_privileges("view", &["SELECT"]).unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
        assert!(err.message().contains("unknown object type view"));
    }

    #[test]
    fn test_validate_all_expands() {
        let (_, privileges) = validate_privileges("sequence", &["all"]).unwrap();
        assert_eq!(
            privileges,
            BTreeSet::from([Privilege::Usage, Privilege::Select, Privilege::Update])
        );
        let (_, privileges) = validate_privileges("table", &["ALL", "SELECT"]).unwrap();
        assert_eq!(privileges.len(), 7);
    }

    #[test]
    fn test_validate_is_case_insensitive() {
        let (_, privileges) = validate_privileges("TABLE", &["select", " Insert "]).unwrap();
        assert_eq!(privileges, BTreeSet::from([Privilege::Select, Privilege::Insert]));
    }

    #[test]
    fn test_normalize_identifier_strips_quotes() {
        assert_eq!(normalize_identifier("\"My Role\"", "role").unwrap(), "My Role");
        assert_eq!(normalize_identifier("\"a\"\"b\"", "role").unwrap(), "a\"b");
        assert_eq!(normalize_identifier("  plain  ", "role").unwrap(), "plain");
        assert_eq!(normalize_identifier("MixedCase", "role").unwrap(), "MixedCase");
    }

    #[test]
    fn test_normalize_identifier_rejects_empty_and_long() {
        assert!(normalize_identifier("", "role").unwrap_err().message().contains("cannot be empty"));
        assert!(normalize_identifier("\"\"", "role").is_err());
        let long = "x".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(normalize_identifier(&long, "role").unwrap_err().message().contains("truncated"));
    }

    #[test]
    fn test_decode_identity_segment_count() {
        assert_eq!(decode_identity("db-ext", &["database", "extension"]).unwrap(), ["db", "ext"]);

        let err = decode_identity("db-my-ext", &["database", "extension"]).unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
        assert!(err.message().contains("'database-extension'"));

        assert!(decode_identity("dbext", &["database", "extension"]).is_err());
        assert!(decode_identity("db-", &["database", "extension"]).is_err());
    }

    #[test]
    fn test_role_spec_defaults_from_empty_document() {
        let spec: RoleSpec = serde_json::from_str(r#"{"name": "app"}"#).unwrap();
        assert_eq!(spec.connection_limit, -1);
        assert!(spec.inherit);
        assert!(spec.encrypted_password);
        assert_eq!(spec.valid_until, "infinity");
        assert!(spec.bypass_row_level_security.is_none());
    }

    #[test]
    fn test_role_normalize_rejects_bad_conn_limit() {
        let spec = RoleSpec { connection_limit: -2, ..RoleSpec::named("app") };
        let err = spec.normalize().unwrap_err();
        assert!(err.message().contains("can not be less than -1"));
    }

    #[test]
    fn test_role_normalize_canonicalizes() {
        let spec = RoleSpec {
            valid_until: "INFINITY".to_string(),
            roles: BTreeSet::from(["\"Readers\"".to_string(), "writers".to_string()]),
            ..RoleSpec::named("\"App\"")
        };
        let normalized = spec.normalize().unwrap();
        assert_eq!(normalized.name, "App");
        assert_eq!(normalized.valid_until, "infinity");
        assert_eq!(
            normalized.roles,
            BTreeSet::from(["Readers".to_string(), "writers".to_string()])
        );
    }

    #[test]
    fn test_clears_password() {
        let spec = RoleSpec { password: Some("null".to_string()), ..RoleSpec::named("a") };
        assert!(spec.clears_password());
        let spec = RoleSpec { password: Some("secret".to_string()), ..RoleSpec::named("a") };
        assert!(!spec.clears_password());
    }

    #[test]
    fn test_policy_with_grant_implies_base() {
        let policy = PolicySpec { role: "r".into(), create_with_grant: true, ..PolicySpec::default() };
        assert_eq!(
            policy.bits(),
            BTreeSet::from([
                PolicyBit::base(SchemaPrivilege::Create),
                PolicyBit::with_grant(SchemaPrivilege::Create),
            ])
        );
    }

    #[test]
    fn test_policy_bits_roundtrip_flags() {
        let policy = PolicySpec { role: "r".into(), create: true, usage_with_grant: true, ..PolicySpec::default() };
        assert_eq!(PolicySpec::from_bits("r", &policy.bits()), policy);
    }

    #[test]
    fn test_schema_normalize_merges_duplicate_grantees() {
        let spec = SchemaSpec {
            policies: vec![
                PolicySpec { role: "compose".into(), create: true, usage: true, ..PolicySpec::default() },
                PolicySpec {
                    role: "\"compose\"".into(),
                    create_with_grant: true,
                    usage_with_grant: true,
                    ..PolicySpec::default()
                },
                PolicySpec { role: "nothing".into(), ..PolicySpec::default() },
            ],
            ..SchemaSpec::named("test4")
        };
        let normalized = spec.normalize("app").unwrap();
        assert_eq!(normalized.database, "app");
        assert_eq!(normalized.policies.len(), 1);
        assert_eq!(normalized.policies["compose"].len(), 4);
    }

    #[test]
    fn test_default_privileges_normalize() {
        let spec = DefaultPrivilegeSpec {
            database: None,
            schema: "public".into(),
            owner: "owner".into(),
            role: "reader".into(),
            object_type: "table".into(),
            privileges: vec!["select".into()],
        };
        let normalized = spec.normalize("app").unwrap();
        assert_eq!(normalized.identity(), "app-public-owner-reader-table");
        assert_eq!(normalized.privileges, BTreeSet::from([Privilege::Select]));

        let empty = DefaultPrivilegeSpec { privileges: vec![], ..spec };
        assert!(empty.normalize("app").unwrap_err().message().contains("cannot be empty"));
    }

    #[test]
    fn test_extension_normalize_blank_version_means_latest() {
        let spec = ExtensionSpec { name: "hstore".into(), version: Some("  ".into()), ..ExtensionSpec::default() };
        let normalized = spec.normalize("app").unwrap();
        assert_eq!(normalized.version, None);
        assert_eq!(normalized.database.as_deref(), Some("app"));
    }

    #[test]
    fn test_valid_until_matching() {
        assert!(valid_until_matches("infinity", "Infinity"));
        assert!(valid_until_matches("2030-01-01 00:00:00+00", "2030-01-01T00:00:00Z"));
        assert!(valid_until_matches("2030-01-01 02:00:00+02", "2030-01-01 00:00:00+00"));
        assert!(valid_until_matches("2030-01-01 00:00:00+00", "2030-01-01"));
        assert!(!valid_until_matches("infinity", "2030-01-01"));
        assert!(!valid_until_matches("2030-01-02 00:00:00+00", "2030-01-01"));
        assert!(valid_until_matches("infinity", ""));
    }

    #[test]
    fn test_schema_state_serializes_policies_as_flags() {
        let state = SchemaState {
            name: "s".into(),
            database: "d".into(),
            owner: "o".into(),
            policies: BTreeMap::from([(
                "r".to_string(),
                BTreeSet::from([PolicyBit::base(SchemaPrivilege::Usage)]),
            )]),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["policies"][0]["role"], "r");
        assert_eq!(json["policies"][0]["usage"], true);
        assert_eq!(json["policies"][0]["create"], false);
    }
}
