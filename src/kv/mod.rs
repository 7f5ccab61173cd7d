// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! The ordered KV-store capability this engine is built on top of
//! (spec.md §6: "Out of scope (external collaborators)"). Expressed here as
//! traits so the RDB engine is generic over the backing store, the same
//! role `engine_traits::{Iterable, Mutable, Peekable, WriteBatchExt}` plays
//! between `raftstore` and `engine_rocks` in the teacher.

pub mod mem;
#[cfg(feature = "rocks")]
pub mod rocks;

use crate::error::Result;

/// `Iterate` callback contract: return `Ok(true)` to keep scanning,
/// `Ok(false)` to stop early, `Err` to abort with an error.
pub type ScanResult = Result<bool>;

pub trait KvStore: Send + Sync {
    /// Reads the value at `key` and hands it to `f` without copying it out
    /// of the store, mirroring `engine_traits::Peekable::get_value_cf`'s
    /// "fn(data) -> err" shape from spec.md §6.
    fn get_value(&self, key: &[u8], f: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<bool>;

    /// Scans `[first, last)`, or `[first, last]` when `inclusive`, calling
    /// `f(key, value)` for each record until it returns `Ok(false)` or the
    /// range is exhausted.
    fn iterate_value(
        &self,
        first: &[u8],
        last: &[u8],
        inclusive: bool,
        f: &mut dyn FnMut(&[u8], &[u8]) -> ScanResult,
    ) -> Result<()>;

    fn write_batch(&self) -> Box<dyn WriteBatch>;

    /// Commits `wb` atomically and durably.
    fn commit_write_batch(&self, wb: Box<dyn WriteBatch>) -> Result<()>;

    /// Commits a write batch that only contains deletes, as used by
    /// `remove_node_data`. Distinguished from `commit_write_batch` the way
    /// the teacher distinguishes `CommitWriteBatch`/`CommitDeleteBatch` in
    /// spec.md §6, even though most stores implement both identically.
    fn commit_delete_batch(&self, wb: Box<dyn WriteBatch>) -> Result<()> {
        self.commit_write_batch(wb)
    }

    /// Deletes every key in `[first, last)` in one operation.
    fn remove_entries(&self, first: &[u8], last: &[u8]) -> Result<()>;

    /// Reclaims space freed by previously deleted keys in `[first, last)`.
    fn compaction(&self, first: &[u8], last: &[u8]) -> Result<()>;

    fn close(&self) -> Result<()>;
}

pub trait WriteBatch: Send {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    fn delete(&mut self, key: &[u8]) -> Result<()>;
    fn count(&self) -> usize;
    fn clear(&mut self);

    /// Lets a `KvStore` recover its own concrete batch type back out of
    /// the trait object it handed the caller in `write_batch()`.
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any>;
}

/// Convenience used throughout the engine: read a single value out of the
/// store via `get_value` without threading a closure through call sites.
pub fn get_value_owned(store: &dyn KvStore, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut out = None;
    store.get_value(key, &mut |data| {
        out = Some(data.to_vec());
        Ok(())
    })?;
    Ok(out)
}
