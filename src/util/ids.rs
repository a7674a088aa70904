//! Identifier and value types shared by every component.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::RuntimeError;

/// Opaque value passed to and returned from resource methods.
pub type Value = serde_json::Value;

/// Attributes handed to the loader when a resource is created.
pub type Attributes = serde_json::Map<String, Value>;

/// Opaque, immutable identifier of one live resource.
///
/// Used both as the lock key and as the owner of task tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(Uuid);

impl ResourceKey {
    /// Generate a fresh random key.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ResourceKey {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| RuntimeError::InvalidKey(format!("{s}: {e}")))
    }
}

/// Namespace under which ephemeral handler resources are created.
pub const TEMPORARY_ROOT: &str = "tmp";

/// Hierarchical, human-readable resource name such as `game/lobby/3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath {
    components: Vec<String>,
}

impl ResourcePath {
    /// Parse a `/`-separated path. Empty components are ignored; a path
    /// with no components at all is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidPath`] for empty paths, and for empty,
    /// wildcard or slash-bearing components.
    pub fn parse(input: &str) -> Result<Self, RuntimeError> {
        Self::from_components(input.split('/').filter(|c| !c.is_empty()))
    }

    /// Build a path from already-split components.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidPath`] for empty paths, and for empty,
    /// wildcard or slash-bearing components.
    pub fn from_components<I, S>(components: I) -> Result<Self, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> = components.into_iter().map(Into::into).collect();
        if components.is_empty() {
            return Err(RuntimeError::InvalidPath("path has no components".into()));
        }
        if let Some(bad) = components
            .iter()
            .find(|c| c.is_empty() || c.contains('*') || c.contains('/'))
        {
            return Err(RuntimeError::InvalidPath(format!("illegal component `{bad}`")));
        }
        Ok(Self { components })
    }

    /// A fresh, unique path in the disposable namespace.
    #[must_use]
    pub fn temporary() -> Self {
        Self {
            components: vec![
                TEMPORARY_ROOT.to_owned(),
                "handler".to_owned(),
                Uuid::new_v4().to_string(),
            ],
        }
    }

    /// Whether this path lives in the disposable namespace.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.components.first().is_some_and(|c| c == TEMPORARY_ROOT)
    }

    /// Path components in order.
    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Append one component.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidPath`] if `name` is empty or illegal.
    pub fn child(&self, name: &str) -> Result<Self, RuntimeError> {
        let mut components = self.components.clone();
        components.push(name.to_owned());
        Self::from_components(components)
    }

    /// Whether `self` is `other` or one of its ancestors.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.components.starts_with(&self.components)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}

impl FromStr for ResourcePath {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = RuntimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.to_string()
    }
}

/// Correlation id for one outstanding continuation owned by one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskToken {
    owner: ResourceKey,
    serial: u64,
}

impl TaskToken {
    /// Token number `serial` belonging to `owner`.
    #[must_use]
    pub const fn new(owner: ResourceKey, serial: u64) -> Self {
        Self { owner, serial }
    }

    /// Resource that owns the continuation.
    #[must_use]
    pub const fn owner(&self) -> ResourceKey {
        self.owner
    }

    /// Per-owner serial number.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.owner, self.serial)
    }
}
