// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Per-call scratch buffers (SPEC_FULL.md §4.3). A `SaveContext` is built
//! once by the caller and threaded through every key/value this engine
//! constructs for the duration of a single `save_raft_state` call, so
//! repeated saves on the same replica do not pay for fresh allocations.

pub struct SaveContext {
    key_buf: Vec<u8>,
    value_buf: Vec<u8>,
}

impl Default for SaveContext {
    fn default() -> Self {
        SaveContext {
            key_buf: Vec::new(),
            value_buf: Vec::new(),
        }
    }
}

impl SaveContext {
    pub fn new() -> SaveContext {
        SaveContext::default()
    }

    /// Returns the per-call key and value scratch buffers together, both
    /// cleared (the value buffer reserved to at least `value_len`), so one
    /// key/value pair can be built and put into a write batch without a
    /// fresh `Vec` allocation per key. Handed out as a pair, rather than
    /// through two separate accessors, because building one key-value put
    /// always needs both at once and Rust cannot borrow `self` mutably
    /// twice to get them separately. Content is not guaranteed zeroed.
    pub fn buffers(&mut self, value_len: usize) -> (&mut Vec<u8>, &mut Vec<u8>) {
        self.key_buf.clear();
        self.value_buf.clear();
        if self.value_buf.capacity() < value_len {
            self.value_buf.reserve(value_len - self.value_buf.capacity());
        }
        (&mut self.key_buf, &mut self.value_buf)
    }
}
