//! Layer records
//!
//! A record pairs what the caller declared with what was last pushed to the
//! rendering engine. Its change set is derived from that pair and is
//! recomputed by every method that replaces either side.
//!
//! Adapters only ever see `&LayerRecord`, so the handle and the applied
//! state can only be written by whoever owns the record.

use std::fmt;

use serde_json::Value;

use crate::{ChangeSet, EventBindings, LayerAttributes, LayerId};

/// Declared and applied state of one map layer
pub struct LayerRecord<H> {
    id: LayerId,
    provider: String,
    declared: LayerAttributes,
    applied_provider: Option<String>,
    applied: Option<LayerAttributes>,
    /// Attributes committed with the snapshot but never pushed
    unapplied: ChangeSet,
    changes: ChangeSet,
    handle: Option<H>,
}

impl<H> LayerRecord<H> {
    pub fn new(id: LayerId, provider: impl Into<String>, declared: LayerAttributes) -> Self {
        let mut record = LayerRecord {
            id,
            provider: provider.into(),
            declared,
            applied_provider: None,
            applied: None,
            unapplied: ChangeSet::EMPTY,
            changes: ChangeSet::FULL,
            handle: None,
        };
        record.recompute();
        record
    }

    #[inline]
    pub fn id(&self) -> &LayerId {
        &self.id
    }

    #[inline]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    #[inline]
    pub fn declared(&self) -> &LayerAttributes {
        &self.declared
    }

    /// Attributes last pushed to the engine, `None` before first materialization
    #[inline]
    pub fn applied(&self) -> Option<&LayerAttributes> {
        self.applied.as_ref()
    }

    #[inline]
    pub fn changes(&self) -> ChangeSet {
        self.changes
    }

    /// Engine-native layer, present once materialized
    #[inline]
    pub fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    #[inline]
    pub fn is_materialized(&self) -> bool {
        self.handle.is_some()
    }

    /// The provider differs from the one the engine layer was built with
    ///
    /// False before anything was applied: a missing applied state is not a
    /// provider change.
    pub fn requires_rebuild(&self) -> bool {
        self.applied_provider
            .as_deref()
            .is_some_and(|applied| applied != self.provider)
    }

    pub fn opacity(&self) -> f64 {
        self.declared.opacity
    }

    pub fn visibility(&self) -> bool {
        self.declared.visibility
    }

    pub fn z_index(&self) -> i32 {
        self.declared.z_index
    }

    pub fn events(&self) -> &EventBindings {
        &self.declared.events
    }

    pub fn interactivity(&self) -> Option<&Value> {
        self.declared.interactivity.as_ref()
    }

    /// Replace the declared state
    pub fn redeclare(&mut self, provider: impl Into<String>, declared: LayerAttributes) {
        self.provider = provider.into();
        self.declared = declared;
        self.recompute();
    }

    /// Mark the current declaration as applied
    pub fn commit(&mut self) {
        self.applied_provider = Some(self.provider.clone());
        self.applied = Some(self.declared.clone());
        self.unapplied = ChangeSet::EMPTY;
        self.recompute();
    }

    /// Mark an earlier snapshot of the declaration as applied
    ///
    /// Used when the declaration moved on while the snapshot was being
    /// materialized; the change set then still holds the newer edits.
    pub fn commit_snapshot(&mut self, provider: String, applied: LayerAttributes) {
        self.commit_snapshot_except(provider, applied, ChangeSet::EMPTY);
    }

    /// Mark a snapshot as applied, except for attributes whose push failed
    ///
    /// Those stay in the change set until a later commit, whatever the
    /// declaration says.
    pub fn commit_snapshot_except(
        &mut self,
        provider: String,
        applied: LayerAttributes,
        unapplied: ChangeSet,
    ) {
        self.applied_provider = Some(provider);
        self.applied = Some(applied);
        self.unapplied = unapplied;
        self.recompute();
    }

    pub fn attach_handle(&mut self, handle: H) {
        self.handle = Some(handle);
    }

    /// Drop the engine handle and forget what was applied with it
    pub fn detach_handle(&mut self) -> Option<H> {
        self.applied_provider = None;
        self.applied = None;
        self.unapplied = ChangeSet::EMPTY;
        self.recompute();
        self.handle.take()
    }

    fn recompute(&mut self) {
        self.changes = ChangeSet::diff(
            &self.provider,
            &self.declared,
            self.applied_provider.as_deref(),
            self.applied.as_ref(),
        )
        .union(self.unapplied);
    }
}

impl<H> fmt::Debug for LayerRecord<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerRecord")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("declared", &self.declared)
            .field("applied", &self.applied)
            .field("changes", &self.changes)
            .field("materialized", &self.handle.is_some())
            .finish()
    }
}
