// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! In-memory cache of the latest `RaftState` and `MaxIndex` per replica
//! (SPEC_FULL.md §4.4). Backed by `dashmap`, already a dependency of the
//! teacher's own root crate, giving per-shard locking instead of one global
//! mutex guarding every replica's cache entry.

use dashmap::DashMap;

use crate::types::RaftState;

pub type ReplicaId = (u64, u64);

#[derive(Default)]
pub struct RdbCache {
    state: DashMap<ReplicaId, RaftState>,
    max_index: DashMap<ReplicaId, u64>,
}

impl RdbCache {
    pub fn new() -> RdbCache {
        RdbCache::default()
    }

    /// Returns `true` iff `state` differs from the cached value for this
    /// replica (or none is cached yet), in which case the cache is
    /// updated. Returns `false` without touching the cache when the value
    /// is unchanged, letting the caller skip a redundant KV put.
    pub fn set_state(&self, id: ReplicaId, state: &RaftState) -> bool {
        match self.state.get(&id) {
            Some(cur) if &*cur == state => false,
            _ => {
                self.state.insert(id, state.clone());
                true
            }
        }
    }

    pub fn get_state(&self, id: ReplicaId) -> Option<RaftState> {
        self.state.get(&id).map(|v| v.clone())
    }

    pub fn set_max_index(&self, id: ReplicaId, index: u64) {
        self.max_index.insert(id, index);
    }

    pub fn get_max_index(&self, id: ReplicaId) -> Option<u64> {
        self.max_index.get(&id).map(|v| *v)
    }

    /// Drops any cached entries for `id`. Used by `remove_node_data` and by
    /// callers that must invalidate the cache after a failed
    /// `CommitWriteBatch` (SPEC_FULL.md §7 / spec.md §9's open bug note —
    /// this engine does invalidate on failure, see `engine::RdbEngine`).
    pub fn invalidate(&self, id: ReplicaId) {
        self.state.remove(&id);
        self.max_index.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RaftState;

    #[test]
    fn set_state_dedupes() {
        let cache = RdbCache::new();
        let s = RaftState {
            term: 1,
            vote: 0,
            commit: 1,
        };
        assert!(cache.set_state((1, 1), &s));
        assert!(!cache.set_state((1, 1), &s));
        let s2 = RaftState { term: 2, ..s };
        assert!(cache.set_state((1, 1), &s2));
    }
}
