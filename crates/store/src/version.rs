//! Row versions and version chains
//!
//! Every row is a newest-first chain of versions. A version's lifetime is
//! `[begin, end)` in transaction-id time; `end == NEVER` means open-ended.
//! A present `writer` marks the version uncommitted and write-locked by
//! that transaction; at most one version per chain may carry it, and if
//! present it is the newest.

use smallvec::SmallVec;
use tessera_core::Value;

/// Transaction identifier; monotonically increasing, assigned on begin.
pub type TxnId = u64;

/// Open-ended version lifetime.
pub const NEVER: TxnId = TxnId::MAX;

/// One version of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowVersion {
    /// Owning transaction while uncommitted; doubles as the write lock.
    pub writer: Option<TxnId>,
    /// Newest transaction that read this version.
    pub last_reader: TxnId,
    /// First transaction id that can see this version.
    pub begin: TxnId,
    /// First transaction id that can no longer see it (`NEVER` = open).
    pub end: TxnId,
    /// The stored row, or `None` for a deletion tombstone.
    pub object: Option<Value>,
}

impl RowVersion {
    /// A freshly written, write-locked version owned by `tid`.
    pub fn locked(tid: TxnId, object: Option<Value>) -> Self {
        RowVersion {
            writer: Some(tid),
            last_reader: 0,
            begin: tid,
            end: NEVER,
            object,
        }
    }

    /// A committed version alive since the beginning of time; used when
    /// installing recovered rows.
    pub fn settled(object: Value) -> Self {
        RowVersion {
            writer: None,
            last_reader: 0,
            begin: 0,
            end: NEVER,
            object: Some(object),
        }
    }

    /// The visibility rule.
    pub fn visible_to(&self, tid: TxnId) -> bool {
        self.begin <= tid && tid < self.end && self.writer.map_or(true, |w| w == tid)
    }

    /// True when this version denotes a delete.
    pub fn is_tombstone(&self) -> bool {
        self.object.is_none()
    }

    /// True when this version carries a row object.
    pub fn is_live(&self) -> bool {
        self.object.is_some()
    }

    /// True when write-locked by `tid` specifically.
    pub fn is_locked_by(&self, tid: TxnId) -> bool {
        self.writer == Some(tid)
    }
}

/// Newest-first sequence of a row's versions.
///
/// Chains are nearly always one or two entries long (the current version
/// plus at most one superseded or uncommitted one), hence the inline
/// capacity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionChain {
    versions: SmallVec<[RowVersion; 2]>,
}

impl VersionChain {
    /// A chain holding exactly one version.
    pub fn single(version: RowVersion) -> Self {
        let mut versions = SmallVec::new();
        versions.push(version);
        VersionChain { versions }
    }

    /// Number of versions.
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// True when no versions remain.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Newest version.
    pub fn latest(&self) -> Option<&RowVersion> {
        self.versions.first()
    }

    /// Newest version, mutable.
    pub fn latest_mut(&mut self) -> Option<&mut RowVersion> {
        self.versions.first_mut()
    }

    /// The version `tid` sees, if any.
    pub fn visible(&self, tid: TxnId) -> Option<&RowVersion> {
        self.versions.iter().find(|v| v.visible_to(tid))
    }

    /// The newest committed version within `tid`'s window.
    ///
    /// Unlike [`VersionChain::visible`], a write-locked version is skipped
    /// even when `tid` is its writer: durable snapshots use this rule so a
    /// staged, possibly-to-be-aborted write never reaches a part.
    pub fn committed_visible(&self, tid: TxnId) -> Option<&RowVersion> {
        self.versions
            .iter()
            .find(|v| v.writer.is_none() && v.begin <= tid && tid < v.end)
    }

    /// The version `tid` sees, mutable.
    pub fn visible_mut(&mut self, tid: TxnId) -> Option<&mut RowVersion> {
        self.versions.iter_mut().find(|v| v.visible_to(tid))
    }

    /// Push a new newest version.
    pub fn push_newest(&mut self, version: RowVersion) {
        self.versions.insert(0, version);
    }

    /// Remove and return the newest version.
    pub fn pop_newest(&mut self) -> Option<RowVersion> {
        if self.versions.is_empty() {
            None
        } else {
            Some(self.versions.remove(0))
        }
    }

    /// Second-newest version, mutable; the one whose `end` is stamped when
    /// the newest settles.
    pub fn previous_mut(&mut self) -> Option<&mut RowVersion> {
        self.versions.get_mut(1)
    }

    /// Iterate newest-first.
    pub fn iter(&self) -> impl Iterator<Item = &RowVersion> {
        self.versions.iter()
    }

    /// Split into versions outliving `horizon` and collectible ones.
    pub fn partition_by_horizon(&self, horizon: TxnId) -> (VersionChain, Vec<RowVersion>) {
        let mut kept = SmallVec::new();
        let mut collected = Vec::new();
        for v in &self.versions {
            if v.end > horizon {
                kept.push(v.clone());
            } else {
                collected.push(v.clone());
            }
        }
        (VersionChain { versions: kept }, collected)
    }

    /// True when any version is live or write-locked; rows failing this
    /// after collection are dropped entirely.
    pub fn has_live_or_locked(&self) -> bool {
        self.versions
            .iter()
            .any(|v| v.is_live() || v.writer.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(n: i64) -> Value {
        Value::record([("n", Value::Int(n))])
    }

    #[test]
    fn test_visibility_window() {
        let v = RowVersion {
            writer: None,
            last_reader: 0,
            begin: 5,
            end: 9,
            object: Some(obj(1)),
        };
        assert!(!v.visible_to(4));
        assert!(v.visible_to(5));
        assert!(v.visible_to(8));
        assert!(!v.visible_to(9));
    }

    #[test]
    fn test_locked_version_visible_only_to_writer() {
        let v = RowVersion::locked(7, Some(obj(1)));
        assert!(v.visible_to(7));
        assert!(!v.visible_to(8));
        assert!(!v.visible_to(6));
    }

    #[test]
    fn test_committed_visible_skips_writers_own_staged_version() {
        let mut chain = VersionChain::single(RowVersion::settled(obj(1)));
        chain.push_newest(RowVersion::locked(9, Some(obj(2))));
        // The writer reads its staged version, but the committed view
        // falls through to the settled one even at the writer's own id
        assert_eq!(chain.visible(9).unwrap().object, Some(obj(2)));
        let committed = chain.committed_visible(9).unwrap();
        assert_eq!(committed.object, Some(obj(1)));
    }

    #[test]
    fn test_committed_visible_none_for_unsettled_insert() {
        let chain = VersionChain::single(RowVersion::locked(4, Some(obj(1))));
        assert!(chain.visible(4).is_some());
        assert!(chain.committed_visible(4).is_none());
    }

    #[test]
    fn test_chain_visible_skips_locked_head() {
        let mut chain = VersionChain::single(RowVersion::settled(obj(1)));
        chain.push_newest(RowVersion::locked(9, Some(obj(2))));
        // Other transactions read through to the settled version
        let seen = chain.visible(5).unwrap();
        assert_eq!(seen.object, Some(obj(1)));
        // The writer sees its own uncommitted head
        let own = chain.visible(9).unwrap();
        assert_eq!(own.object, Some(obj(2)));
    }

    #[test]
    fn test_partition_by_horizon() {
        let mut chain = VersionChain::single(RowVersion {
            writer: None,
            last_reader: 0,
            begin: 0,
            end: 4,
            object: Some(obj(1)),
        });
        chain.push_newest(RowVersion {
            writer: None,
            last_reader: 0,
            begin: 4,
            end: NEVER,
            object: Some(obj(2)),
        });
        let (kept, collected) = chain.partition_by_horizon(4);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.latest().unwrap().object, Some(obj(2)));
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].object, Some(obj(1)));
    }

    #[test]
    fn test_has_live_or_locked() {
        let tomb = VersionChain::single(RowVersion {
            writer: None,
            last_reader: 0,
            begin: 3,
            end: NEVER,
            object: None,
        });
        assert!(!tomb.has_live_or_locked());
        let locked_tomb = VersionChain::single(RowVersion::locked(3, None));
        assert!(locked_tomb.has_live_or_locked());
        let live = VersionChain::single(RowVersion::settled(obj(1)));
        assert!(live.has_live_or_locked());
    }

    #[test]
    fn test_push_pop_previous() {
        let mut chain = VersionChain::single(RowVersion::settled(obj(1)));
        chain.push_newest(RowVersion::locked(5, Some(obj(2))));
        assert_eq!(chain.len(), 2);
        assert!(chain.latest().unwrap().is_locked_by(5));
        assert_eq!(chain.previous_mut().unwrap().object, Some(obj(1)));
        let popped = chain.pop_newest().unwrap();
        assert_eq!(popped.object, Some(obj(2)));
        assert_eq!(chain.len(), 1);
    }
}
