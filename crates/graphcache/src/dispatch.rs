//! The fixed dispatch table the cache runs on, resolved once from configuration and host
//! callbacks by [`CacheBuilder`].

use std::{collections::HashMap, fmt, sync::Arc};

use indexmap::IndexMap;

use crate::{
    cache::Cache,
    config::{CacheConfig, DerivedConfig, KeyConfig, RelationConfig, RelationKind, ResolverConfig},
    derived::DerivedRelation,
    error::{CacheError, ConfigError},
    key::{CacheKey, CompositeKey, KeyFn, KeyPolicy, RecordView},
    record::Record,
    store::RecordStore,
};

pub type UpdateFn = Arc<dyn Fn(&mut UpdateContext<'_>) + Send + Sync>;
pub type ResolverFn = Arc<dyn Fn(&ResolveInfo<'_>) -> Option<serde_json::Value> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub target: String,
    pub kind: RelationKind,
    pub connection: bool,
}

#[derive(Clone)]
pub(crate) enum UpdateHandler {
    Derive(DerivedRelation),
    Custom(UpdateFn),
}

#[derive(Clone)]
pub(crate) enum Resolver {
    ParentIdentity,
    Custom(ResolverFn),
}

pub(crate) struct TypeEntry {
    pub key: KeyPolicy,
    pub relations: IndexMap<String, Relation>,
    pub updates: HashMap<String, Vec<UpdateHandler>>,
    pub resolvers: HashMap<String, Resolver>,
}

impl TypeEntry {
    pub(crate) fn relation(&self, field: &str) -> Option<&Relation> {
        self.relations.get(field)
    }

    pub(crate) fn updates(&self, field: &str) -> &[UpdateHandler] {
        self.updates.get(field).map(Vec::as_slice).unwrap_or_default()
    }
}

#[derive(Default)]
pub(crate) struct DispatchTable {
    types: HashMap<String, TypeEntry>,
}

impl DispatchTable {
    pub(crate) fn get(&self, typename: &str) -> Option<&TypeEntry> {
        self.types.get(typename)
    }

    pub(crate) fn type_entry(&self, typename: &str) -> Result<&TypeEntry, CacheError> {
        self.types
            .get(typename)
            .ok_or_else(|| CacheError::UnknownType(typename.to_owned()))
    }

    pub(crate) fn children_relation(&self, typename: &str, field: &str) -> Result<&Relation, CacheError> {
        match self.type_entry(typename)?.relation(field) {
            Some(relation) if relation.kind == RelationKind::Children => Ok(relation),
            _ => Err(CacheError::NotAList {
                typename: typename.to_owned(),
                field: field.to_owned(),
            }),
        }
    }
}

/// Handed to custom update functions after a child list changed.
pub struct UpdateContext<'a> {
    pub(crate) store: &'a mut RecordStore,
    pub(crate) parent: &'a CacheKey,
    pub(crate) field: &'a str,
}

impl UpdateContext<'_> {
    /// The record whose list field was written.
    pub fn parent(&self) -> &CacheKey {
        self.parent
    }

    pub fn field(&self) -> &str {
        self.field
    }

    pub fn record(&self, key: &CacheKey) -> Option<&Record> {
        self.store.get(key)
    }

    pub fn view(&self, key: &CacheKey) -> Option<RecordView<'_>> {
        self.store.get(key).map(|record| RecordView::new(record, &*self.store))
    }

    pub fn put(&mut self, key: &CacheKey, partial: Record) -> Vec<String> {
        self.store.put(key, partial)
    }
}

/// Handed to custom resolvers when a field is read.
pub struct ResolveInfo<'a> {
    pub key: &'a CacheKey,
    pub record: &'a Record,
    pub field: &'a str,
    /// Whether the record currently sits under a key derived from its children.
    pub composite: bool,
}

/// Registration interface for the cache: configuration plus host callbacks, validated and
/// resolved into a fixed dispatch table by [`CacheBuilder::build`].
#[derive(Default)]
pub struct CacheBuilder {
    config: CacheConfig,
    key_fns: Vec<(String, KeyFn)>,
    updates: Vec<(String, String, UpdateFn)>,
    resolvers: Vec<(String, String, ResolverFn)>,
}

impl fmt::Debug for CacheBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("types", &self.config.types.len())
            .field("key_fns", &self.key_fns.len())
            .field("updates", &self.updates.len())
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

impl CacheBuilder {
    pub fn from_config(config: CacheConfig) -> Self {
        CacheBuilder {
            config,
            ..Default::default()
        }
    }

    /// Registers a key function for a type, overriding any configured key.
    pub fn key_fn<F>(mut self, typename: impl Into<String>, key_fn: F) -> Self
    where
        F: Fn(&RecordView<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.key_fns.push((typename.into(), Arc::new(key_fn)));
        self
    }

    /// Registers a function to run after `typename.field` is written. Runs after any derived
    /// relation configured over the same field.
    pub fn update<F>(mut self, typename: impl Into<String>, field: impl Into<String>, update: F) -> Self
    where
        F: Fn(&mut UpdateContext<'_>) + Send + Sync + 'static,
    {
        self.updates.push((typename.into(), field.into(), Arc::new(update)));
        self
    }

    /// Registers a read-time resolver for `typename.field`, overriding any configured one.
    /// Returning `None` falls back to the stored value.
    pub fn resolver<F>(mut self, typename: impl Into<String>, field: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(&ResolveInfo<'_>) -> Option<serde_json::Value> + Send + Sync + 'static,
    {
        self.resolvers.push((typename.into(), field.into(), Arc::new(resolver)));
        self
    }

    pub fn build(self) -> Result<Cache, ConfigError> {
        let CacheBuilder {
            mut config,
            key_fns,
            updates,
            resolvers,
        } = self;

        let mut custom_keys = HashMap::new();
        for (typename, key_fn) in key_fns {
            config.types.entry(typename.clone()).or_default();
            custom_keys.insert(typename, key_fn);
        }

        let mut types = HashMap::with_capacity(config.types.len());

        for (typename, type_config) in &config.types {
            let key = match (custom_keys.remove(typename), &type_config.key) {
                (Some(key_fn), _) => KeyPolicy::Custom(key_fn),
                (None, Some(key)) => key_policy(key),
                (None, None) => return Err(ConfigError::MissingKey(typename.clone())),
            };

            let relations = type_config
                .relations
                .iter()
                .map(|(field, relation)| {
                    validate_relation(&config, typename, field, relation)?;

                    Ok((
                        field.clone(),
                        Relation {
                            target: relation.target.clone(),
                            kind: relation.kind,
                            connection: relation.connection,
                        },
                    ))
                })
                .collect::<Result<IndexMap<_, _>, ConfigError>>()?;

            if let KeyPolicy::Composite(composite) = &key {
                let is_list = relations
                    .get(&composite.children)
                    .is_some_and(|relation| relation.kind == RelationKind::Children);

                if !is_list {
                    return Err(ConfigError::CompositeOverNonList {
                        typename: typename.clone(),
                        field: composite.children.clone(),
                    });
                }
            }

            let mut update_handlers = HashMap::<String, Vec<UpdateHandler>>::new();
            for derived in &type_config.derived {
                let relation = derived_relation(&config, typename, derived)?;
                update_handlers
                    .entry(derived.source.clone())
                    .or_default()
                    .push(UpdateHandler::Derive(relation));
            }

            let resolvers = type_config
                .resolvers
                .iter()
                .map(|(field, resolver)| {
                    let resolver = match resolver {
                        ResolverConfig::ParentIdentity => Resolver::ParentIdentity,
                    };
                    (field.clone(), resolver)
                })
                .collect();

            types.insert(
                typename.clone(),
                TypeEntry {
                    key,
                    relations,
                    updates: update_handlers,
                    resolvers,
                },
            );
        }

        for (typename, field, update) in updates {
            let entry = types.get_mut(&typename).ok_or(ConfigError::UnknownType(typename))?;
            entry
                .updates
                .entry(field)
                .or_default()
                .push(UpdateHandler::Custom(update));
        }

        for (typename, field, resolver) in resolvers {
            let entry = types.get_mut(&typename).ok_or(ConfigError::UnknownType(typename))?;
            entry.resolvers.insert(field, Resolver::Custom(resolver));
        }

        tracing::debug!("Built cache dispatch table for {} types", types.len());

        Ok(Cache::new(DispatchTable { types }))
    }
}

fn key_policy(config: &KeyConfig) -> KeyPolicy {
    match config {
        KeyConfig::Field { field } => KeyPolicy::Field(field.clone()),
        KeyConfig::Composite {
            children,
            identity,
            prefix,
            ordering,
        } => KeyPolicy::Composite(
            CompositeKey::new(children.clone(), identity.clone())
                .with_prefix(prefix.clone())
                .with_ordering(*ordering),
        ),
        KeyConfig::Embedded => KeyPolicy::Embedded,
    }
}

fn validate_relation(
    config: &CacheConfig,
    typename: &str,
    field: &str,
    relation: &RelationConfig,
) -> Result<(), ConfigError> {
    if config.types.contains_key(&relation.target) {
        return Ok(());
    }

    Err(ConfigError::UnknownRelationTarget {
        typename: typename.to_owned(),
        field: field.to_owned(),
        target: relation.target.clone(),
    })
}

fn derived_relation(config: &CacheConfig, typename: &str, derived: &DerivedConfig) -> Result<DerivedRelation, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidDerived {
        typename: typename.to_owned(),
        target: derived.target.clone(),
        reason,
    };

    let relations = &config.types[typename].relations;

    let source = relations
        .get(&derived.source)
        .filter(|relation| relation.kind == RelationKind::Children)
        .ok_or_else(|| invalid(format!("{} is not a children relation", derived.source)))?;

    let target = relations
        .get(&derived.target)
        .filter(|relation| relation.kind == RelationKind::Link)
        .ok_or_else(|| invalid(format!("{} is not a link relation", derived.target)))?;

    let target_children = config
        .types
        .get(&target.target)
        .and_then(|target_type| target_type.relations.get(&derived.target_children))
        .filter(|relation| relation.kind == RelationKind::Children)
        .ok_or_else(|| {
            invalid(format!(
                "{}.{} is not a children relation",
                target.target, derived.target_children
            ))
        })?;

    let projected = config
        .types
        .get(&source.target)
        .and_then(|child_type| child_type.relations.get(&derived.project))
        .filter(|relation| relation.kind == RelationKind::Link)
        .ok_or_else(|| invalid(format!("{}.{} is not a link relation", source.target, derived.project)))?;

    if projected.target != target_children.target {
        return Err(invalid(format!(
            "{}.{} points at {} but {}.{} holds {}",
            source.target,
            derived.project,
            projected.target,
            target.target,
            derived.target_children,
            target_children.target
        )));
    }

    Ok(DerivedRelation {
        source: derived.source.clone(),
        target: derived.target.clone(),
        target_type: target.target.clone(),
        target_children: derived.target_children.clone(),
        project: derived.project.clone(),
    })
}
