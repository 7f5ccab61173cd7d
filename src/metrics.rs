// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Prometheus metrics for the RDB engine, declared the way `engine_rocks`
//! declares its own metrics module — `lazy_static` globals registered at
//! first use, not at `open()` time, so a process that never touches this
//! crate never pays for registration.

use lazy_static::lazy_static;
use prometheus::{exponential_buckets, register_histogram, register_int_counter, Histogram, IntCounter};

lazy_static! {
    pub static ref RAFT_LOG_STORE_SAVE_DURATION: Histogram = register_histogram!(
        "raft_log_store_save_raft_state_duration_seconds",
        "Bucketed histogram of save_raft_state commit latency",
        exponential_buckets(0.00005, 2.0, 20).unwrap()
    )
    .unwrap();
    pub static ref RAFT_LOG_STORE_ENTRIES_WRITTEN: IntCounter = register_int_counter!(
        "raft_log_store_entries_written_total",
        "Total number of Raft log entries appended to the store"
    )
    .unwrap();
    pub static ref RAFT_LOG_STORE_ENTRIES_READ: IntCounter = register_int_counter!(
        "raft_log_store_entries_read_total",
        "Total number of Raft log entries returned by iterate_entries"
    )
    .unwrap();
}
