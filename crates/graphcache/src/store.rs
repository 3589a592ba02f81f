use indexmap::IndexMap;

use crate::{
    events::CacheEvent,
    key::CacheKey,
    record::{FieldValue, Record},
};

/// The in-memory mapping from cache key to normalized record.
///
/// Every mutation is appended to a journal that the owning cache drains and publishes
/// once the surrounding operation is complete.
#[derive(Clone, Default)]
pub struct RecordStore {
    records: IndexMap<CacheKey, Record>,
    journal: Vec<CacheEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyOutcome {
    /// `from` and `to` were the same key.
    Unchanged,
    /// Nothing was stored under `from`; only references were rewritten.
    Missing,
    Moved,
    /// A record already existed under `to` and the moved record was merged into it.
    Merged,
}

impl RecordStore {
    pub fn get(&self, key: &CacheKey) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&CacheKey, &Record)> + '_ {
        self.records.iter()
    }

    /// Merges a partial record into the one stored under `key`, creating it if needed.
    ///
    /// Returns the fields that changed. Writing data the store already holds is a no-op and
    /// produces no event.
    pub fn put(&mut self, key: &CacheKey, partial: Record) -> Vec<String> {
        let created = !self.records.contains_key(key);
        let record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| Record::new(partial.typename()));

        let changed = record.merge(partial);

        if created || !changed.is_empty() {
            self.journal.push(CacheEvent::Written {
                key: key.clone(),
                fields: changed.clone(),
            });
        }

        changed
    }

    /// Replaces a child list outright instead of unioning it.
    pub fn replace_children(&mut self, key: &CacheKey, field: &str, children: Vec<CacheKey>) -> bool {
        let changed = match self.records.get_mut(key) {
            Some(record) => record.replace_children(field, children),
            None => {
                let record = Record::new(key.typename()).with_children(field, children);
                self.records.insert(key.clone(), record);
                true
            }
        };

        if changed {
            self.journal.push(CacheEvent::Written {
                key: key.clone(),
                fields: vec![field.to_owned()],
            });
        }

        changed
    }

    /// Moves the record under `from` to `to` and points every reference at the new key.
    ///
    /// The record keeps its position in the store. If `to` is already taken the two records
    /// are merged with the `put` rules, the moved record being the incoming side.
    pub fn rekey(&mut self, from: &CacheKey, to: &CacheKey) -> RekeyOutcome {
        if from == to {
            return RekeyOutcome::Unchanged;
        }

        let outcome = match self.records.shift_remove_full(from) {
            None => RekeyOutcome::Missing,
            Some((index, _, moved)) => match self.records.get_mut(to) {
                Some(existing) => {
                    let changed = existing.merge(moved);
                    if !changed.is_empty() {
                        self.journal.push(CacheEvent::Written {
                            key: to.clone(),
                            fields: changed,
                        });
                    }
                    RekeyOutcome::Merged
                }
                None => {
                    self.records.shift_insert(index, to.clone(), moved);
                    RekeyOutcome::Moved
                }
            },
        };

        if outcome != RekeyOutcome::Missing {
            self.journal.push(CacheEvent::Rekeyed {
                from: from.clone(),
                to: to.clone(),
            });
        }

        for (key, record) in &mut self.records {
            let fields = record.rewrite_references(from, to);
            if !fields.is_empty() {
                self.journal.push(CacheEvent::Written {
                    key: key.clone(),
                    fields,
                });
            }
        }

        outcome
    }

    pub(crate) fn drain_journal(&mut self) -> Vec<CacheEvent> {
        std::mem::take(&mut self.journal)
    }

    /// The whole store as JSON, records in insertion order and references as key strings.
    pub fn to_json(&self) -> serde_json::Value {
        let records = self
            .records
            .iter()
            .map(|(key, record)| {
                let fields = record
                    .fields()
                    .map(|(name, value)| {
                        let value = match value {
                            FieldValue::Scalar(value) => value.clone(),
                            FieldValue::Link(None) => serde_json::Value::Null,
                            FieldValue::Link(Some(key)) => serde_json::Value::String(key.to_string()),
                            FieldValue::Children(children) => children
                                .iter()
                                .map(|key| serde_json::Value::String(key.to_string()))
                                .collect(),
                        };
                        (name.to_owned(), value)
                    })
                    .collect::<serde_json::Map<_, _>>();

                (key.to_string(), serde_json::Value::Object(fields))
            })
            .collect::<serde_json::Map<_, _>>();

        serde_json::Value::Object(records)
    }
}
