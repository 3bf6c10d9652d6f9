//! Configuration Management
//!
//! Connection profiles and the desired-state document.
//!
//! # Profile Locations
//! - Local: `.pgconverge/connections.json` (per project, team-shareable)
//! - Global: `<config_dir>/pgconverge/connections.json` (per user, keyed by project path)
//!
//! # Resolution Precedence
//! 1. Local profiles (highest priority)
//! 2. Global profiles for the current project path
//!
//! Passwords are never required on disk: a profile may name an environment
//! variable with `password_env`, and `PGPASSWORD` is consulted last.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::ConnectionConfig;
use crate::error::{ReconcileError, Result};
use crate::model::{DefaultPrivilegeSpec, ExtensionSpec, RoleSpec, SchemaSpec};

const LOCAL_DIR: &str = ".pgconverge";
const PROFILE_FILE: &str = "connections.json";
const FALLBACK_PASSWORD_ENV: &str = "PGPASSWORD";

/// Named profiles for one project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectProfiles {
    pub connections: BTreeMap<String, StoredConnection>,

    /// Profile used when none is named; must exist in `connections`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ProjectProfiles {
    /// Overlay `local` on top of `self`; local entries and default win
    pub fn merge(&mut self, local: Self) {
        self.connections.extend(local.connections);
        if local.default.is_some() {
            self.default = local.default;
        }
    }

    /// Look up a profile by name, or the default when `name` is `None`
    pub fn get(&self, name: Option<&str>) -> Result<(&str, &StoredConnection)> {
        let name = match name {
            Some(name) => name,
            None => self.default.as_deref().ok_or_else(|| {
                ReconcileError::config_error(format!(
                    "No default connection profile. Available profiles: {:?}",
                    self.connections.keys().collect::<Vec<_>>()
                ))
            })?,
        };

        self.connections.get_key_value(name).map(|(k, v)| (k.as_str(), v)).ok_or_else(|| {
            ReconcileError::config_error(format!(
                "Connection profile '{name}' not found. Available profiles: {:?}",
                self.connections.keys().collect::<Vec<_>>()
            ))
        })
    }

    /// Insert or replace a profile; the first profile becomes the default
    pub fn insert(&mut self, name: impl Into<String>, stored: StoredConnection) {
        let name = name.into();
        if self.connections.is_empty() {
            self.default = Some(name.clone());
        }
        self.connections.insert(name, stored);
    }
}

/// Global profile registry, keyed by canonical project path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRegistry {
    pub projects: BTreeMap<String, ProjectProfiles>,
}

/// Stored connection profile
///
/// Like [`ConnectionConfig`], but the password can come from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConnection {
    #[serde(flatten)]
    pub config: ConnectionConfig,

    /// Environment variable holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Reject every catalog mutation through this profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
}

impl StoredConnection {
    #[must_use]
    pub const fn new(config: ConnectionConfig) -> Self {
        Self { config, password_env: None, readonly: None }
    }

    /// Resolve the password and return `(config, is_readonly)`
    ///
    /// Order: `password_env`, a password stored inline, then `PGPASSWORD`.
    pub fn resolve(&self) -> Result<(ConnectionConfig, bool)> {
        let mut config = self.config.clone();

        if let Some(var) = &self.password_env {
            let password = std::env::var(var).map_err(|_| {
                ReconcileError::config_error(format!("Environment variable {var} not found for password"))
            })?;
            config.password = Some(password);
        } else if config.password.is_none() {
            config.password = std::env::var(FALLBACK_PASSWORD_ENV).ok();
        }

        Ok((config, self.readonly.unwrap_or(false)))
    }
}

/// Where a profile is saved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    Local,
    Global,
}

/// `.pgconverge/connections.json` under `project_dir`
#[must_use]
pub fn local_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(LOCAL_DIR).join(PROFILE_FILE)
}

pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ReconcileError::config_error("Could not determine user config directory"))?;
    Ok(config_dir.join("pgconverge").join(PROFILE_FILE))
}

/// Canonical current directory, the key into the global registry
pub fn current_project_dir() -> Result<PathBuf> {
    std::env::current_dir()
        .and_then(|dir| dir.canonicalize())
        .map_err(|e| ReconcileError::config_error(format!("Could not determine current directory: {e}")))
}

fn project_key(project_dir: &Path) -> Result<String> {
    project_dir
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| ReconcileError::config_error("Project path contains invalid UTF-8"))
}

fn read_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| ReconcileError::config_error(format!("Could not read {}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| ReconcileError::config_error(format!("Invalid config file {}: {e}", path.display())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ReconcileError::config_error(format!("Could not create config directory: {e}")))?;
    }
    let contents = serde_json::to_string_pretty(value)
        .map_err(|e| ReconcileError::config_error(format!("Could not serialize config: {e}")))?;
    fs::write(path, contents)
        .map_err(|e| ReconcileError::config_error(format!("Could not write {}: {e}", path.display())))
}

pub fn load_local(path: &Path) -> Result<ProjectProfiles> {
    read_json(path)
}

pub fn load_global(path: &Path) -> Result<GlobalRegistry> {
    read_json(path)
}

/// Profiles visible from `project_dir`, local entries overriding global ones
pub fn load_profiles(project_dir: &Path, global_path: &Path) -> Result<ProjectProfiles> {
    let mut global = load_global(global_path)?;
    let mut merged = global.projects.remove(&project_key(project_dir)?).unwrap_or_default();
    merged.merge(load_local(&local_config_path(project_dir))?);
    Ok(merged)
}

/// Resolve a profile for the current project
///
/// Returns `(config, is_readonly)`.
pub fn resolve_connection(name: Option<&str>) -> Result<(ConnectionConfig, bool)> {
    let profiles = load_profiles(&current_project_dir()?, &global_config_path()?)?;
    let (_, stored) = profiles.get(name)?;
    stored.resolve()
}

/// Save a profile for `project_dir`
pub fn save_connection_to(
    project_dir: &Path,
    global_path: &Path,
    name: &str,
    stored: StoredConnection,
    location: ConfigLocation,
) -> Result<PathBuf> {
    match location {
        ConfigLocation::Local => {
            let path = local_config_path(project_dir);
            let mut profiles = load_local(&path)?;
            profiles.insert(name, stored);
            write_json(&path, &profiles)?;
            Ok(path)
        }
        ConfigLocation::Global => {
            let mut registry = load_global(global_path)?;
            registry.projects.entry(project_key(project_dir)?).or_default().insert(name, stored);
            write_json(global_path, &registry)?;
            Ok(global_path.to_path_buf())
        }
    }
}

/// Save a profile for the current project
pub fn save_connection(name: &str, stored: StoredConnection, location: ConfigLocation) -> Result<PathBuf> {
    save_connection_to(&current_project_dir()?, &global_config_path()?, name, stored, location)
}

/// Declared state for one server
///
/// Every section is optional; missing sections are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct DesiredState {
    pub roles: Vec<RoleSpec>,
    pub schemas: Vec<SchemaSpec>,
    pub default_privileges: Vec<DefaultPrivilegeSpec>,
    pub extensions: Vec<ExtensionSpec>,
}

impl DesiredState {
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| ReconcileError::config_error(format!("Invalid desired-state document: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ReconcileError::config_error(format!("Could not read {}: {e}", path.display())))?;
        Self::from_json(&contents)
    }

    /// JSON Schema of the document
    #[must_use]
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(DesiredState)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
            && self.schemas.is_empty()
            && self.default_privileges.is_empty()
            && self.extensions.is_empty()
    }
}
