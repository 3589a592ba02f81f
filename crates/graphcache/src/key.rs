//! Cache keys and the policies that derive them from records.

use std::{fmt, sync::Arc};

use crate::{record::Record, store::RecordStore};

/// The address of a normalized record: its typename and an opaque identity.
///
/// Root records (`Query`) have an empty identity and display as the bare typename,
/// everything else displays as `Typename:identity`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    typename: String,
    identity: String,
}

impl CacheKey {
    pub fn new(typename: impl Into<String>, identity: impl Into<String>) -> Self {
        CacheKey {
            typename: typename.into(),
            identity: identity.into(),
        }
    }

    pub fn root(typename: impl Into<String>) -> Self {
        CacheKey::new(typename, String::new())
    }

    pub fn typename(&self) -> &str {
        &self.typename
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_root(&self) -> bool {
        self.identity.is_empty()
    }

    /// The same identity under another typename.
    pub fn retag(&self, typename: impl Into<String>) -> CacheKey {
        CacheKey::new(typename, self.identity.clone())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identity.is_empty() {
            f.write_str(&self.typename)
        } else {
            write!(f, "{}:{}", self.typename, self.identity)
        }
    }
}

impl serde::Serialize for CacheKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// How the child identities of a composite key are ordered before joining.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrdering {
    /// Identities are sorted, so the same child set always yields the same key.
    #[default]
    Sorted,
    /// Identities keep the order the children arrived in.
    Arrival,
}

/// A key built from the identities of the records in a child list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeKey {
    /// The children relation the key is built from.
    pub children: String,
    /// The scalar field used as identity while the children list is empty.
    pub identity_field: String,
    pub prefix: String,
    pub ordering: KeyOrdering,
}

impl CompositeKey {
    pub fn new(children: impl Into<String>, identity_field: impl Into<String>) -> Self {
        CompositeKey {
            children: children.into(),
            identity_field: identity_field.into(),
            prefix: String::new(),
            ordering: KeyOrdering::default(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ordering(mut self, ordering: KeyOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn join<'a>(&self, identities: impl IntoIterator<Item = &'a str>) -> String {
        let mut identities = identities.into_iter().collect::<Vec<_>>();

        if self.ordering == KeyOrdering::Sorted {
            identities.sort_unstable();
        }

        format!("{}({})", self.prefix, identities.join(","))
    }
}

pub type KeyFn = Arc<dyn Fn(&RecordView<'_>) -> Option<String> + Send + Sync>;

/// The rule a type uses to compute the identity part of its cache key.
#[derive(Clone)]
pub enum KeyPolicy {
    /// Identity taken from a single scalar field.
    Field(String),
    Composite(CompositeKey),
    /// No identity of its own, the record lives under its parent's path.
    Embedded,
    /// A host function. Returning `None` makes the record embedded.
    Custom(KeyFn),
}

impl fmt::Debug for KeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPolicy::Field(field) => f.debug_tuple("Field").field(field).finish(),
            KeyPolicy::Composite(composite) => f.debug_tuple("Composite").field(composite).finish(),
            KeyPolicy::Embedded => f.write_str("Embedded"),
            KeyPolicy::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Derived {
    Identity(String),
    Embedded,
    Missing,
}

impl KeyPolicy {
    pub(crate) fn derive(&self, view: &RecordView<'_>) -> Derived {
        match self {
            KeyPolicy::Field(field) => view.identity(field).map(Derived::Identity).unwrap_or(Derived::Missing),
            KeyPolicy::Composite(composite) => {
                let children = view.child_keys(&composite.children);

                if children.is_empty() {
                    return view
                        .identity(&composite.identity_field)
                        .map(Derived::Identity)
                        .unwrap_or(Derived::Missing);
                }

                Derived::Identity(composite.join(children.iter().map(CacheKey::identity)))
            }
            KeyPolicy::Embedded => Derived::Embedded,
            KeyPolicy::Custom(key_fn) => key_fn(view).map(Derived::Identity).unwrap_or(Derived::Embedded),
        }
    }

    /// The scalar field holding a record's own identity, if the policy has one.
    pub(crate) fn identity_field(&self) -> Option<&str> {
        match self {
            KeyPolicy::Field(field) => Some(field),
            KeyPolicy::Composite(composite) => Some(&composite.identity_field),
            KeyPolicy::Embedded | KeyPolicy::Custom(_) => None,
        }
    }

    /// Whether the record currently has a key derived from its children.
    pub(crate) fn is_composite_for(&self, record: &Record) -> bool {
        match self {
            KeyPolicy::Composite(composite) => !record.children(&composite.children).is_empty(),
            _ => false,
        }
    }
}

/// Read-only access to a record and the records it points at, handed to key functions.
#[derive(Clone, Copy)]
pub struct RecordView<'a> {
    record: &'a Record,
    store: &'a RecordStore,
}

impl<'a> RecordView<'a> {
    pub(crate) fn new(record: &'a Record, store: &'a RecordStore) -> Self {
        RecordView { record, store }
    }

    pub fn typename(&self) -> &'a str {
        self.record.typename()
    }

    pub fn scalar(&self, field: &str) -> Option<&'a serde_json::Value> {
        self.record.scalar(field)
    }

    /// A scalar field rendered as an identity string. Only strings and numbers qualify.
    pub fn identity(&self, field: &str) -> Option<String> {
        match self.scalar(field)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn child_keys(&self, field: &str) -> &'a [CacheKey] {
        self.record.children(field)
    }

    /// The stored children of a list field. Children that were never written are skipped.
    pub fn children(&self, field: &str) -> impl Iterator<Item = RecordView<'a>> + 'a {
        let store = self.store;

        self.record
            .children(field)
            .iter()
            .filter_map(move |key| store.get(key))
            .map(move |record| RecordView { record, store })
    }

    pub fn link(&self, field: &str) -> Option<RecordView<'a>> {
        let record = self.store.get(self.record.link(field)?)?;

        Some(RecordView {
            record,
            store: self.store,
        })
    }
}
