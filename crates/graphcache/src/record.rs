use indexmap::IndexMap;

use crate::key::CacheKey;

/// The value of a single field on a normalized record.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Scalar(serde_json::Value),
    /// A pointer to another record. `None` is an explicit null.
    Link(Option<CacheKey>),
    /// An ordered list of pointers to child records, in arrival order.
    Children(Vec<CacheKey>),
}

/// A normalized record: a typename and its fields, in the order they were first written.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    typename: String,
    fields: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn new(typename: impl Into<String>) -> Self {
        Record {
            typename: typename.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn typename(&self) -> &str {
        &self.typename
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl ExactSizeIterator<Item = (&str, &FieldValue)> + '_ {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn scalar(&self, name: &str) -> Option<&serde_json::Value> {
        match self.fields.get(name)? {
            FieldValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn link(&self, name: &str) -> Option<&CacheKey> {
        match self.fields.get(name)? {
            FieldValue::Link(key) => key.as_ref(),
            _ => None,
        }
    }

    /// The children of a list field. Absent and non-list fields read as empty.
    pub fn children(&self, name: &str) -> &[CacheKey] {
        match self.fields.get(name) {
            Some(FieldValue::Children(children)) => children,
            _ => &[],
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn with_scalar(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.set(name, FieldValue::Scalar(value));
        self
    }

    pub fn with_link(mut self, name: impl Into<String>, key: Option<CacheKey>) -> Self {
        self.set(name, FieldValue::Link(key));
        self
    }

    pub fn with_children(mut self, name: impl Into<String>, children: Vec<CacheKey>) -> Self {
        self.set(name, FieldValue::Children(children));
        self
    }

    /// Merges `incoming` into this record and returns the names of the fields that changed.
    ///
    /// Scalars and links are last-write-wins. Child lists are unioned by key, keeping the
    /// position of children already present and appending new ones in incoming order.
    pub(crate) fn merge(&mut self, incoming: Record) -> Vec<String> {
        let mut changed = Vec::new();

        for (name, value) in incoming.fields {
            if self.merge_field(&name, value) {
                changed.push(name);
            }
        }

        changed
    }

    pub(crate) fn merge_field(&mut self, name: &str, incoming: FieldValue) -> bool {
        let Some(existing) = self.fields.get_mut(name) else {
            self.fields.insert(name.to_owned(), incoming);
            return true;
        };

        match (existing, incoming) {
            (FieldValue::Children(existing), FieldValue::Children(incoming)) => {
                let before = existing.len();
                for child in incoming {
                    if !existing.contains(&child) {
                        existing.push(child);
                    }
                }
                existing.len() != before
            }
            (existing, incoming) if *existing == incoming => false,
            (existing, incoming) => {
                *existing = incoming;
                true
            }
        }
    }

    /// Overwrites a child list wholesale. Returns whether anything changed.
    pub(crate) fn replace_children(&mut self, name: &str, children: Vec<CacheKey>) -> bool {
        let incoming = FieldValue::Children(children);

        if self.fields.get(name) == Some(&incoming) {
            return false;
        }

        self.fields.insert(name.to_owned(), incoming);
        true
    }

    /// Points every reference to `from` at `to`, de-duplicating child lists the rewrite
    /// made repetitive. Returns the names of the rewritten fields.
    pub(crate) fn rewrite_references(&mut self, from: &CacheKey, to: &CacheKey) -> Vec<String> {
        let mut changed = Vec::new();

        for (name, value) in &mut self.fields {
            match value {
                FieldValue::Link(Some(key)) if key == from => {
                    *key = to.clone();
                    changed.push(name.clone());
                }
                FieldValue::Children(children) if children.contains(from) => {
                    let mut rewritten = Vec::with_capacity(children.len());
                    for key in children.drain(..) {
                        let key = if key == *from { to.clone() } else { key };
                        if !rewritten.contains(&key) {
                            rewritten.push(key);
                        }
                    }
                    *children = rewritten;
                    changed.push(name.clone());
                }
                _ => {}
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key(identity: &str) -> CacheKey {
        CacheKey::new("Episode", identity)
    }

    #[test]
    fn scalars_are_last_write_wins() {
        let mut record = Record::new("Foo").with_scalar("bar", json!("a"));

        let changed = record.merge(Record::new("Foo").with_scalar("bar", json!("b")));

        assert_eq!(changed, vec!["bar"]);
        assert_eq!(record.scalar("bar"), Some(&json!("b")));
    }

    #[test]
    fn identical_writes_change_nothing() {
        let mut record = Record::new("Foo").with_scalar("bar", json!("a"));

        assert!(record.merge(Record::new("Foo").with_scalar("bar", json!("a"))).is_empty());
    }

    #[test]
    fn children_are_unioned_in_arrival_order() {
        let mut record = Record::new("Episode").with_children("handles", vec![key("2")]);

        let changed = record.merge(Record::new("Episode").with_children("handles", vec![key("2"), key("3")]));

        assert_eq!(changed, vec!["handles"]);
        assert_eq!(record.children("handles"), &[key("2"), key("3")]);
    }

    #[test]
    fn rewriting_deduplicates_children() {
        let mut record = Record::new("Episode")
            .with_children("handles", vec![key("2"), key("3")])
            .with_link("media", Some(key("2")));

        let changed = record.rewrite_references(&key("2"), &key("3"));

        assert_eq!(changed, vec!["handles", "media"]);
        assert_eq!(record.children("handles"), &[key("3")]);
        assert_eq!(record.link("media"), Some(&key("3")));
    }
}
