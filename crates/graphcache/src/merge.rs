//! Incremental merging of streamed child lists.
//!
//! Each `(parent, field)` stream moves `Empty -> Accumulating -> Closed`. Increments are applied
//! one at a time in arrival order, and every increment is a complete, externally observable
//! cache write: subscribers are notified before the next increment is looked at.

use std::fmt;

use futures::{Stream, StreamExt};

use crate::{
    cache::Cache,
    error::{json_kind, CacheError, CacheWarning, Result},
    key::CacheKey,
    writer::Location,
};

/// Identifies an open stream. Stays valid when the parent record is rekeyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Empty,
    Accumulating { received: usize },
    Closed(CloseReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The child was merged. `children` is the length of the parent's list afterwards.
    Applied { parent: CacheKey, children: usize },
    /// The stream was already closed.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StreamSummary {
    pub parent: CacheKey,
    pub applied: usize,
    pub dropped: usize,
    pub closed: CloseReason,
}

#[derive(Clone)]
struct StreamEntry {
    parent: CacheKey,
    field: String,
    state: StreamState,
}

#[derive(Clone, Default)]
pub(crate) struct Streams {
    entries: Vec<StreamEntry>,
}

impl Streams {
    fn get(&self, handle: StreamHandle) -> Result<&StreamEntry> {
        self.entries.get(handle.0).ok_or(CacheError::UnknownStream(handle.0))
    }

    fn get_mut(&mut self, handle: StreamHandle) -> Result<&mut StreamEntry> {
        self.entries.get_mut(handle.0).ok_or(CacheError::UnknownStream(handle.0))
    }

    /// Streams follow their parent record when it moves.
    pub(crate) fn rekeyed(&mut self, from: &CacheKey, to: &CacheKey) {
        for entry in &mut self.entries {
            if entry.parent == *from {
                entry.parent = to.clone();
            }
        }
    }
}

impl Cache {
    /// Starts accepting increments for the children relation `parent.field`.
    pub fn open_stream(&mut self, parent: &CacheKey, field: &str) -> Result<StreamHandle> {
        self.dispatch().children_relation(parent.typename(), field)?;

        let handle = StreamHandle(self.streams.entries.len());
        self.streams.entries.push(StreamEntry {
            parent: parent.clone(),
            field: field.to_owned(),
            state: StreamState::Empty,
        });

        tracing::debug!("Opened stream {} for {parent}.{field}", handle.0);

        Ok(handle)
    }

    pub fn stream_state(&self, handle: StreamHandle) -> Result<StreamState> {
        Ok(self.streams.get(handle)?.state)
    }

    /// The current key of the record a stream merges into.
    pub fn stream_parent(&self, handle: StreamHandle) -> Result<&CacheKey> {
        Ok(&self.streams.get(handle)?.parent)
    }

    /// Merges one streamed child into the parent's list.
    ///
    /// Increments after the stream closed are dropped and recorded as a warning.
    pub fn apply_increment(&mut self, handle: StreamHandle, child: serde_json::Value) -> Result<IncrementOutcome> {
        let entry = self.streams.get(handle)?;
        let parent = entry.parent.clone();
        let field = entry.field.clone();
        let state = entry.state;

        let received = match state {
            StreamState::Closed(_) => {
                self.writer().warn(CacheWarning::LateIncrement { parent, field });
                return Ok(IncrementOutcome::Dropped);
            }
            StreamState::Empty => 0,
            StreamState::Accumulating { received } => received,
        };

        let relation = self.dispatch().children_relation(parent.typename(), &field)?;
        let target = relation.target.clone();

        // `edges @stream` on a connection delivers `{ node }` edges.
        let child = match child {
            serde_json::Value::Object(mut edge) if relation.connection && edge.contains_key("node") => {
                edge.remove("node").unwrap_or_default()
            }
            child => child,
        };

        let object = match child {
            serde_json::Value::Object(object) => object,
            other => {
                return Err(CacheError::InvalidValue {
                    typename: parent.typename().to_owned(),
                    field,
                    expected: "an object",
                    found: json_kind(&other),
                })
            }
        };

        let index = self.store().get(&parent).map(|record| record.children(&field).len()).unwrap_or_default();

        let (parent, children) = self.transaction(|writer| {
            let location = Location::Field {
                parent: &parent,
                field: &field,
                index: Some(index),
            };
            let child = writer.write_object(&target, object, location)?;
            let parent = writer.merge_children(&parent, &field, vec![child])?;
            let children = writer.store.get(&parent).map(|record| record.children(&field).len()).unwrap_or_default();

            Ok((parent, children))
        })?;

        self.streams.get_mut(handle)?.state = StreamState::Accumulating { received: received + 1 };

        tracing::debug!("Merged increment {} into {parent}.{field}", received + 1);

        Ok(IncrementOutcome::Applied { parent, children })
    }

    /// Marks the stream as complete. Closing an already closed stream keeps the first reason.
    pub fn close(&mut self, handle: StreamHandle) -> Result<()> {
        self.finish(handle, CloseReason::Completed)
    }

    /// Cancels the stream, leaving the store as it was after the last applied increment.
    pub fn cancel(&mut self, handle: StreamHandle) -> Result<()> {
        self.finish(handle, CloseReason::Cancelled)
    }

    fn finish(&mut self, handle: StreamHandle, reason: CloseReason) -> Result<()> {
        let entry = self.streams.get_mut(handle)?;

        if !matches!(entry.state, StreamState::Closed(_)) {
            entry.state = StreamState::Closed(reason);
            tracing::debug!("Stream for {}.{} closed: {reason:?}", entry.parent, entry.field);
        }

        Ok(())
    }

    /// Drives a stream of increments to completion.
    ///
    /// The end of the stream closes it. A transport error, or an increment the cache cannot
    /// interpret, cancels it; the latter is also returned.
    pub async fn consume<S, E>(&mut self, handle: StreamHandle, increments: S) -> Result<StreamSummary>
    where
        S: Stream<Item = std::result::Result<serde_json::Value, E>>,
        E: fmt::Display,
    {
        let mut increments = std::pin::pin!(increments);
        let mut applied = 0;
        let mut dropped = 0;

        while let Some(increment) = increments.next().await {
            let increment = match increment {
                Ok(increment) => increment,
                Err(error) => {
                    let entry = self.streams.get(handle)?;
                    let warning = CacheWarning::StreamFailed {
                        parent: entry.parent.clone(),
                        field: entry.field.clone(),
                        message: error.to_string(),
                    };
                    self.writer().warn(warning);
                    self.cancel(handle)?;
                    break;
                }
            };

            match self.apply_increment(handle, increment) {
                Ok(IncrementOutcome::Applied { .. }) => applied += 1,
                Ok(IncrementOutcome::Dropped) => dropped += 1,
                Err(error) => {
                    self.cancel(handle)?;
                    return Err(error);
                }
            }
        }

        self.close(handle)?;

        let entry = self.streams.get(handle)?;
        let closed = match entry.state {
            StreamState::Closed(reason) => reason,
            StreamState::Empty | StreamState::Accumulating { .. } => CloseReason::Completed,
        };

        Ok(StreamSummary {
            parent: entry.parent.clone(),
            applied,
            dropped,
            closed,
        })
    }
}
