// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! An in-memory ordered KV store, used by every test in this crate and by
//! any host process that wants the engine without touching disk. Mirrors
//! the role `engine_skiplist` plays elsewhere in the Rust TiKV ecosystem —
//! a real, usable `KvStore` backed by an in-process ordered map rather than
//! a mock.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::error::Result;
use crate::kv::{KvStore, ScanResult, WriteBatch};

#[derive(Default)]
pub struct MemStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }
}

impl KvStore for MemStore {
    fn get_value(&self, key: &[u8], f: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<bool> {
        let data = self.data.read();
        match data.get(key) {
            Some(v) => {
                f(v)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn iterate_value(
        &self,
        first: &[u8],
        last: &[u8],
        inclusive: bool,
        f: &mut dyn FnMut(&[u8], &[u8]) -> ScanResult,
    ) -> Result<()> {
        let data = self.data.read();
        let upper = if inclusive {
            Bound::Included(last.to_vec())
        } else {
            Bound::Excluded(last.to_vec())
        };
        for (k, v) in data.range((Bound::Included(first.to_vec()), upper)) {
            if !f(k, v)? {
                break;
            }
        }
        Ok(())
    }

    fn write_batch(&self) -> Box<dyn WriteBatch> {
        Box::new(MemWriteBatch::default())
    }

    fn commit_write_batch(&self, wb: Box<dyn WriteBatch>) -> Result<()> {
        let wb = wb
            .into_any()
            .downcast::<MemWriteBatch>()
            .expect("MemStore only ever receives batches it created");
        let mut data = self.data.write();
        for op in wb.ops {
            match op {
                Op::Put(k, v) => {
                    data.insert(k, v);
                }
                Op::Delete(k) => {
                    data.remove(&k);
                }
            }
        }
        Ok(())
    }

    fn remove_entries(&self, first: &[u8], last: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        let keys: Vec<Vec<u8>> = data
            .range(first.to_vec()..last.to_vec())
            .map(|(k, _)| k.clone())
            .collect();
        for k in keys {
            data.remove(&k);
        }
        Ok(())
    }

    fn compaction(&self, _first: &[u8], _last: &[u8]) -> Result<()> {
        // Nothing to reclaim: an in-memory BTreeMap has no notion of
        // tombstones surviving a delete.
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

#[derive(Default)]
struct MemWriteBatch {
    ops: Vec<Op>,
}

impl WriteBatch for MemWriteBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ops.push(Op::Put(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ops.push(Op::Delete(key.to_vec()));
        Ok(())
    }

    fn count(&self) -> usize {
        self.ops.len()
    }

    fn clear(&mut self) {
        self.ops.clear();
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let store = MemStore::new();
        let mut wb = store.write_batch();
        wb.put(b"k", b"v").unwrap();
        store.commit_write_batch(wb).unwrap();
        let mut seen = None;
        store
            .get_value(b"k", &mut |v| {
                seen = Some(v.to_vec());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, Some(b"v".to_vec()));
    }

    #[test]
    fn range_delete() {
        let store = MemStore::new();
        let mut wb = store.write_batch();
        for i in 0u8..5 {
            wb.put(&[i], b"v").unwrap();
        }
        store.commit_write_batch(wb).unwrap();
        store.remove_entries(&[1], &[4]).unwrap();
        let mut left = vec![];
        store
            .iterate_value(&[0], &[5], true, &mut |k, _| {
                left.push(k[0]);
                Ok(true)
            })
            .unwrap();
        assert_eq!(left, vec![0, 4]);
    }
}
