// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! A persistent Raft log storage engine for a multi-group consensus
//! runtime, built on top of a generic ordered KV store. See `engine::RdbEngine`
//! for the entry point.

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod entries;
pub mod error;
pub mod fs;
pub mod keys;
pub mod kv;
pub mod metrics;
pub mod pool;
pub mod types;

pub use crate::config::RdbConfig;
pub use crate::context::SaveContext;
pub use crate::engine::RdbEngine;
pub use crate::error::{Error, Result};
pub use crate::types::{Bootstrap, NodeInfo, RaftState, Snapshot, SnapshotType, StateMachineType, Update};
