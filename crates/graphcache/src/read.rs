//! Denormalized reads over the store.

use serde_json::{Map, Value};

use crate::{
    cache::Cache,
    dispatch::{DispatchTable, ResolveInfo, Resolver, TypeEntry},
    key::CacheKey,
    record::{FieldValue, Record},
    store::RecordStore,
};

/// The fields to read from a record, with sub-selections for relations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    fields: Vec<(String, Option<Selection>)>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push((name.into(), None));
        self
    }

    /// Selects a relation and the fields to read from the records it points at.
    pub fn object(mut self, name: impl Into<String>, selection: Selection) -> Self {
        self.fields.push((name.into(), Some(selection)));
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&Selection>)> + '_ {
        self.fields
            .iter()
            .map(|(name, selection)| (name.as_str(), selection.as_ref()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub data: Value,
    /// Some selected field was never written. An explicit null does not count.
    pub partial: bool,
}

impl Cache {
    pub fn read(&self, key: &CacheKey, selection: &Selection) -> ReadResult {
        let mut reader = Reader {
            dispatch: self.dispatch(),
            store: self.store(),
            partial: false,
        };

        let data = reader.read_record(key, selection);

        ReadResult {
            data,
            partial: reader.partial,
        }
    }
}

struct Reader<'a> {
    dispatch: &'a DispatchTable,
    store: &'a RecordStore,
    partial: bool,
}

impl Reader<'_> {
    fn read_record(&mut self, key: &CacheKey, selection: &Selection) -> Value {
        let (store, dispatch) = (self.store, self.dispatch);

        let Some(record) = store.get(key) else {
            tracing::debug!("Cache miss on {key}");
            self.partial = true;
            return Value::Null;
        };

        let entry = dispatch.get(record.typename());
        let mut object = Map::new();

        for (name, selection) in selection.fields() {
            if name == "__typename" {
                object.insert(name.to_owned(), Value::String(record.typename().to_owned()));
                continue;
            }

            if let Some(value) = entry.and_then(|entry| resolve(entry, key, record, name)) {
                object.insert(name.to_owned(), value);
                continue;
            }

            let value = match record.field(name) {
                None => {
                    tracing::debug!("Cache miss on {key}.{name}");
                    self.partial = true;
                    Value::Null
                }
                Some(FieldValue::Scalar(value)) => value.clone(),
                Some(FieldValue::Link(None)) => Value::Null,
                Some(FieldValue::Link(Some(link))) => self.read_link(link, selection),
                Some(FieldValue::Children(children)) => {
                    let mut nodes = Vec::with_capacity(children.len());
                    for child in children {
                        nodes.push(self.read_link(child, selection));
                    }

                    let connection = entry
                        .and_then(|entry| entry.relation(name))
                        .is_some_and(|relation| relation.connection);

                    if connection {
                        let edges = nodes.into_iter().map(|node| serde_json::json!({ "node": node }));
                        serde_json::json!({ "edges": edges.collect::<Vec<_>>() })
                    } else {
                        Value::Array(nodes)
                    }
                }
            };

            object.insert(name.to_owned(), value);
        }

        Value::Object(object)
    }

    fn read_link(&mut self, key: &CacheKey, selection: Option<&Selection>) -> Value {
        match selection {
            Some(selection) => self.read_record(key, selection),
            None => Value::String(key.to_string()),
        }
    }
}

fn resolve(entry: &TypeEntry, key: &CacheKey, record: &Record, field: &str) -> Option<Value> {
    let composite = entry.key.is_composite_for(record);

    match entry.resolvers.get(field)? {
        Resolver::ParentIdentity => composite.then(|| Value::String(key.identity().to_owned())),
        Resolver::Custom(resolver) => resolver(&ResolveInfo {
            key,
            record,
            field,
            composite,
        }),
    }
}
