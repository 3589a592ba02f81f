//! A normalized GraphQL result cache with composite keys and streamed list merging.
//!
//! Records are stored under a `(typename, identity)` key. A type's identity can come from one
//! of its own fields or be derived from the identities of the records in one of its child
//! lists, e.g. an `Episode` that groups the episodes `2` and `3` lives under
//! `Episode:scannarr:(2,3)`. Because such keys change as children arrive, the cache has to:
//!
//! 1. Re-derive a parent's key after every child written into it, and move the record (and
//!    everything pointing at it) when the key changed.
//! 2. Merge streamed (`@stream`) children one increment at a time, each one a complete and
//!    observable write.
//! 3. Keep derived relations, such as `Episode.media` mirroring `Episode.handles[].media`,
//!    re-projected after every merge.
//!
//! The execution engine, transport and query parsing are not part of this crate, it only
//! consumes resolved field values and streamed increments.

mod cache;
mod config;
mod derived;
mod dispatch;
mod error;
mod events;
mod key;
mod merge;
mod read;
mod record;
mod store;
mod writer;

pub use self::{
    cache::Cache,
    config::{CacheConfig, DerivedConfig, KeyConfig, RelationConfig, RelationKind, ResolverConfig, TypeConfig},
    derived::DerivedRelation,
    dispatch::{CacheBuilder, Relation, ResolveInfo, ResolverFn, UpdateContext, UpdateFn},
    error::{CacheError, CacheWarning, ConfigError, Result},
    events::CacheEvent,
    key::{CacheKey, CompositeKey, KeyFn, KeyOrdering, KeyPolicy, RecordView},
    merge::{CloseReason, IncrementOutcome, StreamHandle, StreamState, StreamSummary},
    read::{ReadResult, Selection},
    record::{FieldValue, Record},
    store::{RecordStore, RekeyOutcome},
};
