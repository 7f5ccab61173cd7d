// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! A pool of reusable key buffers, so the hot `save_raft_state` path does
//! not allocate a fresh `Vec<u8>` per key on every call. This is a
//! performance contract, not a correctness one (SPEC_FULL.md §9) — any
//! synchronized freelist works; `parking_lot::Mutex` is used here since it
//! is already part of this codebase's dependency stack (`raftstore`
//! depends on `parking_lot = "0.12"`).

use parking_lot::Mutex;

use crate::keys::MAX_KEY_LEN;

pub struct KeyPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl Default for KeyPool {
    fn default() -> Self {
        KeyPool {
            free: Mutex::new(Vec::new()),
        }
    }
}

impl KeyPool {
    pub fn new() -> KeyPool {
        KeyPool::default()
    }

    /// Borrows a buffer of capacity `MAX_KEY_LEN`. Callers must `release`
    /// it when done with the operation; dropping it without releasing is
    /// safe but defeats the pooling.
    pub fn get(&self) -> Vec<u8> {
        let mut free = self.free.lock();
        free.pop()
            .unwrap_or_else(|| Vec::with_capacity(MAX_KEY_LEN))
    }

    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.free.lock().push(buf);
    }
}
