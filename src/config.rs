// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

use serde::{Deserialize, Serialize};

/// Default batch size for the batched entry manager: 64 entries per
/// record, the same order of magnitude as `raft-engine`'s default log file
/// rotation granularity.
pub const DEFAULT_BATCH_SIZE: u64 = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RdbConfig {
    /// Directory for SST files and manifests.
    pub dir: String,
    /// Directory for the write-ahead log.
    pub wal_dir: String,
    /// Use the batched entry manager instead of the plain one.
    pub batched: bool,
    pub batch_size: u64,
}

impl Default for RdbConfig {
    fn default() -> RdbConfig {
        RdbConfig {
            dir: "raft".to_owned(),
            wal_dir: String::new(),
            batched: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}
