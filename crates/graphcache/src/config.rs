//! Declarative cache configuration, usually loaded from TOML.
//!
//! ```toml
//! [types.Media]
//! key = { kind = "composite", children = "handles", identity = "uri", prefix = "scannarr:" }
//! relations.handles = { type = "Media", kind = "children", connection = true }
//! resolvers.uri = "parent_identity"
//! ```

use indexmap::IndexMap;

use crate::{error::ConfigError, key::KeyOrdering};

#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub types: IndexMap<String, TypeConfig>,
}

impl CacheConfig {
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }
}

#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypeConfig {
    /// May be left out when a key function is registered on the builder instead.
    pub key: Option<KeyConfig>,
    pub relations: IndexMap<String, RelationConfig>,
    pub derived: Vec<DerivedConfig>,
    pub resolvers: IndexMap<String, ResolverConfig>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyConfig {
    Field {
        field: String,
    },
    Composite {
        children: String,
        identity: String,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        ordering: KeyOrdering,
    },
    Embedded,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationConfig {
    #[serde(rename = "type")]
    pub target: String,
    pub kind: RelationKind,
    /// Read children back as `{ edges: [{ node }] }` and accept that shape on write.
    #[serde(default)]
    pub connection: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Link,
    Children,
}

/// A shadow relation kept in sync with a children relation.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivedConfig {
    /// The children relation being mirrored.
    pub source: String,
    /// The link relation holding the derived record.
    pub target: String,
    /// The children relation on the derived record that receives the projection.
    pub target_children: String,
    /// The link relation on each source child that is projected.
    pub project: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverConfig {
    /// Records with a composite key report that key's identity for this field.
    ParentIdentity,
}
