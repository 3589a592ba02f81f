use std::fmt;

use futures::channel::mpsc;

use crate::{
    dispatch::{CacheBuilder, DispatchTable, UpdateHandler},
    error::{json_kind, CacheError, CacheWarning, ConfigError, Result},
    events::{CacheEvent, Notifier},
    key::CacheKey,
    merge::Streams,
    record::Record,
    store::RecordStore,
    writer::{derive_stored, Location, Writer},
    CacheConfig,
};

/// A normalized cache instance. Owns its store; there is no shared global cache.
///
/// All writes are applied synchronously and publish their change notifications, in mutation
/// order, before they return.
pub struct Cache {
    dispatch: DispatchTable,
    store: RecordStore,
    pub(crate) streams: Streams,
    warnings: Vec<CacheWarning>,
    notifier: Notifier,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("records", &self.store.len())
            .field("warnings", &self.warnings.len())
            .finish_non_exhaustive()
    }
}

impl Cache {
    pub(crate) fn new(dispatch: DispatchTable) -> Self {
        Cache {
            dispatch,
            store: RecordStore::default(),
            streams: Streams::default(),
            warnings: Vec::new(),
            notifier: Notifier::default(),
        }
    }

    pub fn builder(config: CacheConfig) -> CacheBuilder {
        CacheBuilder::from_config(config)
    }

    /// Builds a cache straight from a TOML configuration, without host callbacks.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        CacheBuilder::from_config(CacheConfig::from_toml(source)?).build()
    }

    pub(crate) fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub(crate) fn writer(&mut self) -> Writer<'_> {
        Writer {
            dispatch: &self.dispatch,
            store: &mut self.store,
            streams: &mut self.streams,
            warnings: &mut self.warnings,
        }
    }

    pub(crate) fn flush(&mut self) {
        let events = self.store.drain_journal();
        self.notifier.publish(events);
    }

    /// Runs one cache operation. On success its events are published; on error the store, the
    /// streams and the warnings go back to how they were and nothing is published.
    pub(crate) fn transaction<T>(&mut self, op: impl FnOnce(&mut Writer<'_>) -> Result<T>) -> Result<T> {
        let store = self.store.clone();
        let streams = self.streams.clone();
        let warnings = self.warnings.len();

        let result = op(&mut self.writer());

        match result {
            Ok(value) => {
                self.flush();
                Ok(value)
            }
            Err(error) => {
                tracing::debug!("Rolled back a failed write: {error}");
                self.store = store;
                self.streams = streams;
                self.warnings.truncate(warnings);
                Err(error)
            }
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn get(&self, key: &CacheKey) -> Option<&Record> {
        self.store.get(key)
    }

    /// The key the record under `key` derives to right now, or `None` if the record has no
    /// identity of its own.
    pub fn derive_key(&self, key: &CacheKey) -> Result<Option<CacheKey>> {
        derive_stored(&self.dispatch, &self.store, key)
    }

    /// Merges `partial` into the record under `key`, then re-derives its key and runs the
    /// updates registered for every written field. Returns where the record lives afterwards.
    pub fn put(&mut self, key: &CacheKey, partial: Record) -> Result<CacheKey> {
        self.dispatch.type_entry(key.typename())?;

        let fields = partial.fields().map(|(name, _)| name.to_owned()).collect::<Vec<_>>();

        self.transaction(|writer| {
            writer.store.put(key, partial);
            let key = writer.rederive(key)?;
            for field in &fields {
                writer.run_updates(&key, field)?;
            }

            Ok(key)
        })
    }

    /// Moves a record to a new key, merging with any record already there, and points every
    /// reference at the new key. Records whose key is built from the moved one are re-derived.
    pub fn rekey(&mut self, from: &CacheKey, to: &CacheKey) -> Result<()> {
        self.transaction(|writer| writer.rekey(from, to))
    }

    /// Normalizes the result of a whole operation. Embedded root types such as `Query` end up
    /// under their bare typename.
    pub fn write_root(&mut self, typename: &str, data: serde_json::Value) -> Result<CacheKey> {
        self.write_entity(typename, data)
    }

    /// Normalizes a single object and everything nested in it. Returns the key it was stored
    /// under.
    pub fn write_entity(&mut self, typename: &str, data: serde_json::Value) -> Result<CacheKey> {
        let object = match data {
            serde_json::Value::Object(object) => object,
            other => {
                return Err(CacheError::NotAnObject {
                    typename: typename.to_owned(),
                    found: json_kind(&other),
                })
            }
        };

        self.transaction(|writer| writer.write_object(typename, object, Location::Root))
    }

    /// Called by the execution layer for every resolved field.
    pub fn on_field_resolved(&mut self, parent: &CacheKey, field: &str, value: serde_json::Value) -> Result<CacheKey> {
        self.transaction(|writer| writer.write_field(parent, field, value))
    }

    /// Re-projects the derived relation `target` registered over `source` on the record under
    /// `parent`. Returns the derived record's key, if there is one.
    pub fn sync(&mut self, parent: &CacheKey, source: &str, target: &str) -> Result<Option<CacheKey>> {
        let relation = self
            .dispatch
            .type_entry(parent.typename())?
            .updates(source)
            .iter()
            .find_map(|handler| match handler {
                UpdateHandler::Derive(relation) if relation.target == target => Some(relation.clone()),
                _ => None,
            })
            .ok_or_else(|| CacheError::UnknownDerived {
                typename: parent.typename().to_owned(),
                source_field: source.to_owned(),
                target: target.to_owned(),
            })?;

        self.transaction(|writer| writer.sync_derived(parent, &relation))
    }

    pub fn warnings(&self) -> &[CacheWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<CacheWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Receives every subsequent store mutation, in the order it was applied.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<CacheEvent> {
        self.notifier.subscribe()
    }

    /// The whole normalized store as JSON.
    pub fn snapshot(&self) -> serde_json::Value {
        self.store.to_json()
    }
}
