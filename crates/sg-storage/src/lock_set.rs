//! LockSet: ordered acquisition of several segment locks
//!
//! All segment locks a writer or reader needs are taken through one LockSet.
//! Segments are locked in ascending [`SegmentId`] order, so two LockSets with
//! overlapping segments can never wait on each other in a cycle. Locks are
//! released together, in reverse order, when the set is dropped.

use std::sync::Arc;

use crate::segment::{LockedSegment, Segment, SegmentId};

#[derive(Debug, Default)]
pub struct LockSet {
    /// Held locks, sorted by segment id
    locks: Vec<LockedSegment>,
}

impl LockSet {
    pub fn new() -> Self {
        Self { locks: Vec::new() }
    }

    /// Lock all given segments, blocking until every lock is held.
    /// Duplicates are locked once.
    pub fn acquire<I>(segments: I) -> Self
    where
        I: IntoIterator<Item = Arc<Segment>>,
    {
        let mut segments: Vec<Arc<Segment>> = segments.into_iter().collect();
        segments.sort_by_key(|s| s.id());
        segments.dedup_by_key(|s| s.id());

        let locks = segments.iter().map(|s| s.lock()).collect();
        Self { locks }
    }

    /// Take over a lock that was acquired on a freshly created segment.
    ///
    /// Fresh segments get the highest id handed out so far and are locked
    /// before they become visible, so adopting them keeps the order intact.
    pub fn adopt(&mut self, locked: LockedSegment) {
        match self.locks.binary_search_by_key(&locked.id(), |l| l.id()) {
            Ok(_) => log::warn!("segment {:?} adopted twice", locked.id()),
            Err(index) => self.locks.insert(index, locked),
        }
    }

    /// Move the locks of the given segments into a separate set
    pub fn extract(&mut self, ids: &[SegmentId]) -> LockSet {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.locks)
            .into_iter()
            .partition(|l| ids.contains(&l.id()));
        self.locks = kept;
        LockSet { locks: taken }
    }

    fn index_of(&self, id: SegmentId) -> Option<usize> {
        self.locks.binary_search_by_key(&id, |l| l.id()).ok()
    }

    pub fn get(&self, id: SegmentId) -> Option<&LockedSegment> {
        self.index_of(id).map(|i| &self.locks[i])
    }

    pub fn get_mut(&mut self, id: SegmentId) -> Option<&mut LockedSegment> {
        self.index_of(id).map(move |i| &mut self.locks[i])
    }

    #[inline]
    pub fn contains(&self, id: SegmentId) -> bool {
        self.index_of(id).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.locks.iter().map(|l| l.id())
    }

    /// Release every lock, last acquired first
    pub fn release(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        while let Some(lock) = self.locks.pop() {
            drop(lock);
        }
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        self.release_all();
    }
}
