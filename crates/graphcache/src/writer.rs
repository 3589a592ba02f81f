//! Normalizing writes. Everything that mutates the store during a single cache operation goes
//! through a [`Writer`], which borrows the pieces of the cache it needs.

use std::fmt;

use serde_json::{Map, Value};

use crate::{
    config::RelationKind,
    dispatch::{DispatchTable, Relation, UpdateContext, UpdateHandler},
    error::{json_kind, CacheError, CacheWarning, Result},
    key::{CacheKey, Derived, KeyPolicy, RecordView},
    merge::Streams,
    record::{FieldValue, Record},
    store::{RecordStore, RekeyOutcome},
};

const MAX_REKEY_DEPTH: usize = 32;

pub(crate) struct Writer<'a> {
    pub(crate) dispatch: &'a DispatchTable,
    pub(crate) store: &'a mut RecordStore,
    pub(crate) streams: &'a mut Streams,
    pub(crate) warnings: &'a mut Vec<CacheWarning>,
}

/// Where an object being normalized sits, used for embedded and placeholder keys.
#[derive(Clone, Copy)]
pub(crate) enum Location<'a> {
    Root,
    Field {
        parent: &'a CacheKey,
        field: &'a str,
        index: Option<usize>,
    },
}

impl Location<'_> {
    fn key(&self, typename: &str) -> CacheKey {
        match self {
            Location::Root => CacheKey::root(typename),
            Location::Field { .. } => CacheKey::new(typename, self.to_string()),
        }
    }
}

impl fmt::Display for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Root => f.write_str("the root"),
            Location::Field {
                parent,
                field,
                index: None,
            } => write!(f, "{parent}.{field}"),
            Location::Field {
                parent,
                field,
                index: Some(index),
            } => write!(f, "{parent}.{field}.{index}"),
        }
    }
}

impl Writer<'_> {
    pub(crate) fn warn(&mut self, warning: CacheWarning) {
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Normalizes `object` and everything nested in it, children first, and returns the key
    /// the object ended up under.
    pub(crate) fn write_object(
        &mut self,
        typename: &str,
        object: Map<String, Value>,
        location: Location<'_>,
    ) -> Result<CacheKey> {
        let typename = match object.get("__typename") {
            Some(Value::String(typename)) => typename.clone(),
            _ => typename.to_owned(),
        };

        let dispatch = self.dispatch;
        let entry = dispatch.type_entry(&typename)?;

        // Nested objects without an identity of their own hang off this key.
        let base = entry
            .key
            .identity_field()
            .and_then(|field| match object.get(field) {
                Some(Value::String(identity)) => Some(identity.clone()),
                Some(Value::Number(identity)) => Some(identity.to_string()),
                _ => None,
            })
            .map(|identity| CacheKey::new(typename.as_str(), identity))
            .unwrap_or_else(|| location.key(&typename));

        let mut record = Record::new(typename.as_str());

        for (field, value) in object {
            if field == "__typename" {
                continue;
            }

            let value = match entry.relation(&field) {
                None => FieldValue::Scalar(value),
                Some(relation) => self.write_relation(&base, &field, relation, value)?,
            };

            record.set(field, value);
        }

        let key = match entry.key.derive(&RecordView::new(&record, &*self.store)) {
            Derived::Identity(identity) => CacheKey::new(typename.as_str(), identity),
            Derived::Embedded => location.key(&typename),
            Derived::Missing => {
                let placeholder = location.key(&typename);
                self.warn(CacheWarning::MissingIdentity {
                    typename: typename.clone(),
                    location: location.to_string(),
                    placeholder: placeholder.clone(),
                });
                placeholder
            }
        };

        let fields = record.fields().map(|(name, _)| name.to_owned()).collect::<Vec<_>>();

        self.store.put(&key, record);

        let key = self.rederive(&key)?;
        for field in &fields {
            self.run_updates(&key, field)?;
        }

        Ok(key)
    }

    /// A single field resolved by the execution layer on an existing parent.
    pub(crate) fn write_field(&mut self, parent: &CacheKey, field: &str, value: Value) -> Result<CacheKey> {
        let dispatch = self.dispatch;
        let entry = dispatch.type_entry(parent.typename())?;

        match entry.relation(field) {
            Some(relation) if relation.kind == RelationKind::Children => {
                let children = self.write_children(parent, field, relation, value)?;
                self.merge_children(parent, field, children)
            }
            relation => {
                let value = match relation {
                    Some(relation) => self.write_relation(parent, field, relation, value)?,
                    None => FieldValue::Scalar(value),
                };

                let mut record = Record::new(parent.typename());
                record.set(field, value);
                self.store.put(parent, record);

                let parent = self.rederive(parent)?;
                self.run_updates(&parent, field)?;

                Ok(parent)
            }
        }
    }

    fn write_relation(&mut self, base: &CacheKey, field: &str, relation: &Relation, value: Value) -> Result<FieldValue> {
        match relation.kind {
            RelationKind::Link => {
                let link = match value {
                    Value::Null => None,
                    Value::Object(object) => Some(self.write_object(
                        &relation.target,
                        object,
                        Location::Field {
                            parent: base,
                            field,
                            index: None,
                        },
                    )?),
                    other => return Err(invalid_value(base, field, "an object", &other)),
                };

                Ok(FieldValue::Link(link))
            }
            RelationKind::Children => Ok(FieldValue::Children(self.write_children(base, field, relation, value)?)),
        }
    }

    fn write_children(&mut self, base: &CacheKey, field: &str, relation: &Relation, value: Value) -> Result<Vec<CacheKey>> {
        let items = list_items(base, field, relation, value)?;
        let mut children = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            match item {
                Value::Object(object) => {
                    let location = Location::Field {
                        parent: base,
                        field,
                        index: Some(index),
                    };
                    let child = self.write_object(&relation.target, object, location)?;
                    if !children.contains(&child) {
                        children.push(child);
                    }
                }
                Value::Null => {}
                other => return Err(invalid_value(base, field, "an object", &other)),
            }
        }

        Ok(children)
    }

    /// Appends children to `parent.field`, re-derives the parent's key and runs the updates
    /// registered for the field. Returns the parent's key afterwards.
    pub(crate) fn merge_children(&mut self, parent: &CacheKey, field: &str, children: Vec<CacheKey>) -> Result<CacheKey> {
        self.dispatch.children_relation(parent.typename(), field)?;

        self.store
            .put(parent, Record::new(parent.typename()).with_children(field, children));

        let parent = self.rederive(parent)?;
        self.run_updates(&parent, field)?;

        Ok(parent)
    }

    /// Recomputes the key of a stored record and moves it if the key changed. Records whose key
    /// is built from the moved record are re-derived in turn.
    pub(crate) fn rederive(&mut self, key: &CacheKey) -> Result<CacheKey> {
        self.rederive_at(key, 0)
    }

    fn rederive_at(&mut self, key: &CacheKey, depth: usize) -> Result<CacheKey> {
        let Some(derived) = self.derive(key)? else {
            return Ok(key.clone());
        };

        if derived != *key {
            self.rekey_at(key, &derived, depth)?;
        }

        Ok(derived)
    }

    pub(crate) fn derive(&self, key: &CacheKey) -> Result<Option<CacheKey>> {
        derive_stored(self.dispatch, &*self.store, key)
    }

    pub(crate) fn rekey(&mut self, from: &CacheKey, to: &CacheKey) -> Result<()> {
        self.rekey_at(from, to, 0)
    }

    fn rekey_at(&mut self, from: &CacheKey, to: &CacheKey, depth: usize) -> Result<()> {
        match self.store.rekey(from, to) {
            RekeyOutcome::Unchanged => return Ok(()),
            RekeyOutcome::Merged => self.warn(CacheWarning::RekeyConflict {
                from: from.clone(),
                to: to.clone(),
            }),
            RekeyOutcome::Moved | RekeyOutcome::Missing => {}
        }

        tracing::debug!("Rekeyed {from} to {to}");
        self.streams.rekeyed(from, to);

        // Cyclic child lists would otherwise grow their keys forever.
        if depth >= MAX_REKEY_DEPTH {
            tracing::warn!("Stopped re-deriving the records built from {to} after {depth} levels");
            return Ok(());
        }

        for dependent in self.dependents(to) {
            // An earlier dependent may have been merged into this one.
            if !self.store.contains(&dependent) {
                continue;
            }
            self.rederive_at(&dependent, depth + 1)?;
        }

        Ok(())
    }

    /// Records whose key may be built from `child`: composite keys listing it among their
    /// children, and key functions over any record pointing at it.
    fn dependents(&self, child: &CacheKey) -> Vec<CacheKey> {
        self.store
            .iter()
            .filter(|(key, record)| {
                *key != child
                    && match self.dispatch.get(record.typename()).map(|entry| &entry.key) {
                        Some(KeyPolicy::Composite(composite)) => record.children(&composite.children).contains(child),
                        Some(KeyPolicy::Custom(_)) => record.fields().any(|(_, value)| match value {
                            FieldValue::Link(Some(link)) => link == child,
                            FieldValue::Children(children) => children.contains(child),
                            _ => false,
                        }),
                        _ => false,
                    }
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub(crate) fn run_updates(&mut self, key: &CacheKey, field: &str) -> Result<()> {
        let dispatch = self.dispatch;
        let entry = dispatch.type_entry(key.typename())?;

        for handler in entry.updates(field) {
            match handler {
                UpdateHandler::Derive(relation) => {
                    self.sync_derived(key, relation)?;
                }
                UpdateHandler::Custom(update) => update(&mut UpdateContext {
                    store: &mut *self.store,
                    parent: key,
                    field,
                }),
            }
        }

        Ok(())
    }
}

/// The key a stored record would get if it were derived now. `None` when the record has no
/// identity of its own.
pub(crate) fn derive_stored(dispatch: &DispatchTable, store: &RecordStore, key: &CacheKey) -> Result<Option<CacheKey>> {
    let record = store.get(key).ok_or_else(|| CacheError::MissingRecord(key.clone()))?;
    let entry = dispatch.type_entry(record.typename())?;

    match entry.key.derive(&RecordView::new(record, store)) {
        Derived::Identity(identity) => Ok(Some(CacheKey::new(record.typename(), identity))),
        Derived::Embedded | Derived::Missing => Ok(None),
    }
}

fn list_items(parent: &CacheKey, field: &str, relation: &Relation, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        Value::Object(mut connection) if relation.connection => match connection.remove("edges") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(edges)) => Ok(edges
                .into_iter()
                .map(|edge| match edge {
                    Value::Object(mut edge) => edge.remove("node").unwrap_or(Value::Null),
                    other => other,
                })
                .collect()),
            Some(other) => Err(invalid_value(parent, field, "a list of edges", &other)),
        },
        other => Err(invalid_value(parent, field, "a list", &other)),
    }
}

fn invalid_value(parent: &CacheKey, field: &str, expected: &'static str, found: &Value) -> CacheError {
    CacheError::InvalidValue {
        typename: parent.typename().to_owned(),
        field: field.to_owned(),
        expected,
        found: json_kind(found),
    }
}
