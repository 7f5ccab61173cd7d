// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Record types this engine owns the lifecycle of (SPEC_FULL.md §3).
//! `Entry` itself is not redefined here — it is `raft::eraftpb::Entry`,
//! reused verbatim from the `raft` crate the way `engine_rocks` does.

use std::collections::HashMap;

use raft::eraftpb::Entry;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftState {
    pub term: u64,
    pub vote: u64,
    pub commit: u64,
}

impl RaftState {
    pub fn is_empty(&self) -> bool {
        self.term == 0 && self.vote == 0 && self.commit == 0
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("RaftState always serializes")
    }

    pub fn decode(data: &[u8]) -> Result<RaftState> {
        bincode::deserialize(data).map_err(|e| Error::fatal(format!("corrupt RaftState: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateMachineType {
    Regular,
    ConcurrentMap,
    OnDisk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    pub join: bool,
    pub state_machine_type: StateMachineType,
    /// node_id -> address.
    pub addresses: HashMap<u64, String>,
}

impl Bootstrap {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Bootstrap always serializes")
    }

    pub fn decode(data: &[u8]) -> Result<Bootstrap> {
        bincode::deserialize(data).map_err(|e| Error::fatal(format!("corrupt Bootstrap: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotType {
    Regular,
    OnDisk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub term: u64,
    pub index: u64,
    pub snapshot_type: SnapshotType,
    pub files: Vec<String>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.index == 0 && self.term == 0 && self.files.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Snapshot always serializes")
    }

    pub fn decode(data: &[u8]) -> Result<Snapshot> {
        bincode::deserialize(data).map_err(|e| Error::fatal(format!("corrupt Snapshot: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeInfo {
    pub cluster_id: u64,
    pub node_id: u64,
}

/// One Raft group's worth of state to persist in a single
/// `save_raft_state` call. Any field may be left at its empty default when
/// this update does not touch that entity.
#[derive(Debug, Clone, Default)]
pub struct Update {
    pub cluster_id: u64,
    pub node_id: u64,
    pub state: Option<RaftState>,
    pub snapshot: Option<Snapshot>,
    pub entries_to_save: Vec<Entry>,
}

impl Update {
    pub fn new(cluster_id: u64, node_id: u64) -> Update {
        Update {
            cluster_id,
            node_id,
            ..Default::default()
        }
    }
}
