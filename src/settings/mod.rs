//! Scope chain resolution of the "scan for debug settings" switch.
//!
//! A repository inherits from its project, a project from the global scope.
//! Each scope stores a raw string (`"true"`, `"false"` or `"INHERIT"`); a
//! missing value is the same as `"INHERIT"`. When nothing in the chain
//! resolves, the configured default applies.

pub mod store;

pub use store::{FileStore, MemoryStore, SettingsStore};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Raw marker for "use the next broader scope".
pub const INHERIT: &str = "INHERIT";

/// One level of the settings hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Repository(String),
    Project(String),
    Global,
}

impl Scope {
    /// Build a scope from its administrative path segments, e.g.
    /// `("repository", "42")` or `("global", "")`.
    pub fn parse(scope_type: &str, key: &str) -> Result<Self> {
        let key = key.trim();
        match scope_type {
            "repository" | "repo" if !key.is_empty() => Ok(Scope::Repository(key.to_string())),
            "project" if !key.is_empty() => Ok(Scope::Project(key.to_string())),
            "global" => Ok(Scope::Global),
            "repository" | "repo" | "project" => {
                Err(Error::InvalidScope(format!("{scope_type} scope needs a key")))
            }
            other => Err(Error::InvalidScope(format!("unknown scope type '{other}'"))),
        }
    }

    /// Opaque key under which the store keeps this scope's value.
    pub fn store_key(&self) -> String {
        match self {
            Scope::Repository(id) => format!("repository:{id}"),
            Scope::Project(key) => format!("project:{key}"),
            Scope::Global => "global".into(),
        }
    }

    pub fn level(&self) -> &'static str {
        match self {
            Scope::Repository(_) => "repository",
            Scope::Project(_) => "project",
            Scope::Global => "global",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Repository(id) => write!(f, "repository {id}"),
            Scope::Project(key) => write!(f, "project {key}"),
            Scope::Global => write!(f, "global"),
        }
    }
}

/// The repository a merge targets, with the project it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepositoryRef {
    pub id: String,
    pub project: String,
}

impl RepositoryRef {
    pub fn new(id: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project: project.into(),
        }
    }

    /// Repository → Project → Global.
    pub fn chain(&self) -> [Scope; 3] {
        [
            Scope::Repository(self.id.clone()),
            Scope::Project(self.project.clone()),
            Scope::Global,
        ]
    }
}

/// Parsed form of a stored raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingValue {
    Enabled,
    Disabled,
    Inherit,
}

impl SettingValue {
    /// Strict parse used for writes: exactly `true`, `false` or `INHERIT`.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "true" => Ok(SettingValue::Enabled),
            "false" => Ok(SettingValue::Disabled),
            INHERIT => Ok(SettingValue::Inherit),
            other => Err(Error::InvalidSettingValue(other.to_string())),
        }
    }

    /// Lenient interpretation of whatever is already stored: `INHERIT` defers,
    /// anything else is a boolean that is true only for a case-insensitive `true`.
    pub fn from_stored(raw: &str) -> Self {
        if raw == INHERIT {
            SettingValue::Inherit
        } else if raw.trim().eq_ignore_ascii_case("true") {
            SettingValue::Enabled
        } else {
            SettingValue::Disabled
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SettingValue::Enabled => "true",
            SettingValue::Disabled => "false",
            SettingValue::Inherit => INHERIT,
        }
    }
}

/// Outcome of walking the scope chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub enabled: bool,
    /// The scope that decided, or `None` when the default applied.
    pub source: Option<Scope>,
}

/// Reads and writes scope settings through a [`SettingsStore`].
///
/// Nothing is cached: every call goes to the store, so an administrative change
/// applies to the very next merge check.
#[derive(Clone)]
pub struct SettingsResolver {
    store: Arc<dyn SettingsStore>,
    default_enabled: bool,
}

impl SettingsResolver {
    pub fn new(store: Arc<dyn SettingsStore>, default_enabled: bool) -> Self {
        Self {
            store,
            default_enabled,
        }
    }

    /// Stored raw value for one scope, if any.
    pub fn get_raw(&self, scope: &Scope) -> Result<Option<String>> {
        self.store.get(&scope.store_key())
    }

    /// Validate and persist a raw value. Invalid values leave the store untouched.
    pub fn set_raw(&self, scope: &Scope, value: &str) -> Result<()> {
        let parsed = SettingValue::parse(value)?;
        self.store.put(&scope.store_key(), parsed.as_str())?;
        log::info!("{} scan setting set to {}", scope, parsed.as_str());
        Ok(())
    }

    /// Value shown to a settings page: the raw value, or `INHERIT` when unset.
    pub fn display_value(&self, scope: &Scope) -> Result<String> {
        Ok(self.get_raw(scope)?.unwrap_or_else(|| INHERIT.to_string()))
    }

    /// Walk the chain and report which scope decided.
    pub fn resolve(&self, repository: &RepositoryRef) -> Result<Resolution> {
        for scope in repository.chain() {
            let Some(raw) = self.get_raw(&scope)? else {
                continue;
            };
            match SettingValue::from_stored(&raw) {
                SettingValue::Inherit => continue,
                value => {
                    return Ok(Resolution {
                        enabled: value == SettingValue::Enabled,
                        source: Some(scope),
                    });
                }
            }
        }
        Ok(Resolution {
            enabled: self.default_enabled,
            source: None,
        })
    }

    pub fn is_enabled(&self, repository: &RepositoryRef) -> Result<bool> {
        self.resolve(repository).map(|r| r.enabled)
    }
}
