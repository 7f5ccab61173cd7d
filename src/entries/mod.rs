// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! The entry-manager capability set (spec.md §4.5 / SPEC_FULL.md §9):
//! polymorphism over entry layout, implemented as a trait with two
//! implementors (`plain`, `batched`) rather than open inheritance, per the
//! spec's own design note.

pub mod batched;
pub mod plain;

use crate::context::SaveContext;
use crate::error::Result;
use crate::kv::{KvStore, WriteBatch};
use crate::types::Update;
use raft::eraftpb::Entry;

/// What to do with the key range an entry manager computes for a given
/// upper bound: either delete it outright or mark it for compaction. Both
/// `remove_entries_to` and `compaction` reuse the same range derivation
/// (`ranged_op`) and only differ in which store primitive they invoke.
pub enum RangeOp<'a> {
    Delete(&'a dyn KvStore),
    Compact(&'a dyn KvStore),
}

impl RangeOp<'_> {
    fn apply(&self, first: &[u8], last: &[u8]) -> Result<()> {
        match self {
            RangeOp::Delete(store) => store.remove_entries(first, last),
            RangeOp::Compact(store) => store.compaction(first, last),
        }
    }
}

pub trait EntryManager: Send + Sync {
    /// On-disk format number, recorded at open time so a later version can
    /// detect a mismatch (spec.md §4.5).
    fn binary_format(&self) -> u32;

    fn name(&self) -> &'static str;

    /// Appends `entries` to `wb` for `(cluster_id, node_id)`, returning the
    /// highest index actually recorded, or `0` if `entries` was empty.
    /// `store` lets the batched manager read its current tail record
    /// before merging new entries into it; the plain manager ignores it.
    fn record(
        &self,
        store: &dyn KvStore,
        wb: &mut dyn WriteBatch,
        cluster_id: u64,
        node_id: u64,
        ctx: &mut SaveContext,
        entries: &[Entry],
    ) -> Result<u64>;

    /// Appends the entries from every `Update` in `updates` that targets
    /// this manager, in order, to `wb`. Returns the highest index recorded
    /// per replica touched, keyed by `(cluster_id, node_id)`.
    fn record_updates(
        &self,
        store: &dyn KvStore,
        wb: &mut dyn WriteBatch,
        ctx: &mut SaveContext,
        updates: &[Update],
    ) -> Result<Vec<((u64, u64), u64)>> {
        let mut out = Vec::new();
        for u in updates {
            if u.entries_to_save.is_empty() {
                continue;
            }
            let max = self.record(store, wb, u.cluster_id, u.node_id, ctx, &u.entries_to_save)?;
            if max > 0 {
                out.push(((u.cluster_id, u.node_id), max));
            }
        }
        Ok(out)
    }

    /// Reads entries with index in `[low, high)` and total serialized size
    /// `<= max_size` into `out`, appending to whatever `out`/`size_acc`
    /// already hold. Returns the updated accumulated size.
    fn iterate(
        &self,
        store: &dyn KvStore,
        out: &mut Vec<Entry>,
        max_durable_index: u64,
        size_acc: usize,
        cluster_id: u64,
        node_id: u64,
        low: u64,
        high: u64,
        max_size: usize,
    ) -> Result<usize>;

    /// Computes the contiguous available index range given a hint
    /// (`last_index`, typically the caller's previous idea of the first
    /// index) and the known `max_index`.
    fn get_range(
        &self,
        store: &dyn KvStore,
        cluster_id: u64,
        node_id: u64,
        last_index: u64,
        max_index: u64,
    ) -> Result<(u64, u64)>;

    /// Derives the key range spanning entries up to (and including)
    /// `index`, and invokes `op` on it.
    fn ranged_op(&self, cluster_id: u64, node_id: u64, index: u64, op: RangeOp) -> Result<()>;
}
