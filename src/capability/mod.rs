//! Server Capability Gate
//!
//! Maps the connected server's version to the set of statement shapes it
//! accepts. Capabilities gate statement shape, never business logic: the
//! diff is computed the same way on every server, and the gate decides how
//! (or whether) the resulting operation can be expressed.
//!
//! # Version Parsing
//! `SHOW server_version` output is not strict semver (`15.3`, `16beta1`,
//! `9.6.24`, `15.3 (Debian 15.3-1.pgdg120+1)`), so it is normalized to
//! `major.minor.patch` before being handed to `semver`.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{ReconcileError, Result};

/// A server capability that changes how statements are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// `CREATE ROLE name WITH option...` (absent in very old forks)
    CreateRoleWith,
    /// `ALTER DEFAULT PRIVILEGES`
    DefaultPrivileges,
    /// `CREATE EXTENSION` and friends
    Extension,
    /// `CREATE SCHEMA IF NOT EXISTS`
    CreateSchemaIfNotExists,
    /// `BYPASSRLS` role attribute
    RowLevelSecurity,
    /// `REASSIGN OWNED BY x TO CURRENT_USER`
    ReassignOwnedCurrentUser,
    /// `UNENCRYPTED PASSWORD` (removed in 10)
    UnencryptedPassword,
}

impl Feature {
    /// All known features, in declaration order
    pub const ALL: [Self; 7] = [
        Self::CreateRoleWith,
        Self::DefaultPrivileges,
        Self::Extension,
        Self::CreateSchemaIfNotExists,
        Self::RowLevelSecurity,
        Self::ReassignOwnedCurrentUser,
        Self::UnencryptedPassword,
    ];

    /// Human-readable name used in error messages
    #[must_use]
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::CreateRoleWith => "CREATE ROLE ... WITH",
            Self::DefaultPrivileges => "ALTER DEFAULT PRIVILEGES",
            Self::Extension => "extensions",
            Self::CreateSchemaIfNotExists => "CREATE SCHEMA IF NOT EXISTS",
            Self::RowLevelSecurity => "row-level security (BYPASSRLS)",
            Self::ReassignOwnedCurrentUser => "REASSIGN OWNED ... TO CURRENT_USER",
            Self::UnencryptedPassword => "UNENCRYPTED PASSWORD",
        }
    }

    fn supported_by(self, version: &Version) -> bool {
        let at_least = |major: u64, minor: u64| (version.major, version.minor) >= (major, minor);
        match self {
            Self::CreateRoleWith => at_least(8, 1),
            Self::DefaultPrivileges => at_least(9, 0),
            Self::Extension => at_least(9, 1),
            Self::CreateSchemaIfNotExists => at_least(9, 3),
            Self::RowLevelSecurity | Self::ReassignOwnedCurrentUser => at_least(9, 5),
            Self::UnencryptedPassword => !at_least(10, 0),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Parse a `server_version` string tolerantly
///
/// Missing components default to zero and any pre-release or distribution
/// suffix is dropped: `16beta1` parses as `16.0.0`.
pub fn parse_server_version(raw: &str) -> Result<Version> {
    let token = raw.split_whitespace().next().unwrap_or_default();

    let mut parts = [0_u64; 3];
    let mut seen = 0;
    for (slot, piece) in parts.iter_mut().zip(token.split('.')) {
        let digits: String = piece.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            break;
        }
        *slot = digits.parse().map_err(|e| {
            ReconcileError::validation(format!("Invalid server version '{raw}': {e}"))
        })?;
        seen += 1;
        if digits.len() != piece.len() {
            break;
        }
    }

    if seen == 0 {
        return Err(ReconcileError::validation(format!("Invalid server version '{raw}'")));
    }

    Ok(Version::new(parts[0], parts[1], parts[2]))
}

/// Immutable capability table for one connected server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGate {
    version: Version,
    enabled: BTreeSet<Feature>,
}

impl FeatureGate {
    /// Build the capability table for a parsed server version
    #[must_use]
    pub fn for_version(version: Version) -> Self {
        let enabled = Feature::ALL.into_iter().filter(|f| f.supported_by(&version)).collect();
        Self { version, enabled }
    }

    /// Build the capability table from a raw `server_version` string
    pub fn from_server_version(raw: &str) -> Result<Self> {
        parse_server_version(raw).map(Self::for_version)
    }

    /// The server version this gate was built for
    #[must_use]
    pub const fn version(&self) -> &Version {
        &self.version
    }

    /// Check whether a feature is available
    #[must_use]
    pub fn supports(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }

    /// Fail fast with `UnsupportedFeature` when a feature is missing
    pub fn require(&self, feature: Feature) -> Result<()> {
        if self.supports(feature) {
            Ok(())
        } else {
            Err(ReconcileError::unsupported(feature.describe(), self.version.to_string()))
        }
    }

    /// Enabled features, ordered
    pub fn features(&self) -> impl Iterator<Item = Feature> + '_ {
        self.enabled.iter().copied()
    }
}
