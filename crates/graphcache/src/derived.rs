//! Keeps a shadow relation in step with a children relation.
//!
//! For `Episode.handles -> Episode.media` every synchronization projects `handle.media` for
//! each handle, in order, into `Episode.media.handles`, creating the `Media` record the first
//! time and re-deriving its key afterwards.

use crate::{
    error::{CacheError, Result},
    key::CacheKey,
    record::Record,
    writer::Writer,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedRelation {
    pub source: String,
    pub target: String,
    pub target_type: String,
    pub target_children: String,
    pub project: String,
}

impl Writer<'_> {
    /// Re-projects `relation` for the record under `parent`. Returns the key of the derived
    /// record, if there is one.
    pub(crate) fn sync_derived(&mut self, parent: &CacheKey, relation: &DerivedRelation) -> Result<Option<CacheKey>> {
        let record = self
            .store
            .get(parent)
            .ok_or_else(|| CacheError::MissingRecord(parent.clone()))?;

        let children = record.children(&relation.source);

        // Nothing to mirror yet, a leaf parent leaves its target alone.
        if children.is_empty() {
            return Ok(record.link(&relation.target).cloned());
        }

        let projected = children
            .iter()
            .filter_map(|child| {
                let projection = self.store.get(child).and_then(|child| child.link(&relation.project));
                if projection.is_none() {
                    tracing::debug!("{child} has no {} to project into {parent}", relation.project);
                }
                projection.cloned()
            })
            .collect::<Vec<_>>();

        let target = match record.link(&relation.target) {
            Some(target) => target.clone(),
            None => self.synthesize_target(parent, relation)?,
        };

        self.store
            .replace_children(&target, &relation.target_children, projected);

        let target = self.rederive(&target)?;

        Ok(Some(target))
    }

    /// The target starts out empty. Its identity comes from its projected children, and reads
    /// resolve the identity field from the key.
    fn synthesize_target(&mut self, parent: &CacheKey, relation: &DerivedRelation) -> Result<CacheKey> {
        let key = parent.retag(relation.target_type.as_str());
        self.dispatch.type_entry(&relation.target_type)?;

        tracing::debug!("Synthesizing {key} for {parent}.{}", relation.target);

        self.store.put(&key, Record::new(relation.target_type.as_str()));
        self.store.put(
            parent,
            Record::new(parent.typename()).with_link(relation.target.as_str(), Some(key.clone())),
        );

        Ok(key)
    }
}
