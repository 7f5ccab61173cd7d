// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

use std::fmt;

/// Boxes an arbitrary error as an opaque [`Error::Io`], the way
/// `tikv_util::box_err!` wraps KV-store errors at the `engine_traits`
/// boundary.
#[macro_export]
macro_rules! box_err {
    ($e:expr) => {
        $crate::error::Error::Io(Box::new($e))
    };
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the RDB engine. Recoverable variants are returned up
/// the call stack; [`Error::Fatal`] marks a protocol violation or corruption
/// that the host process is expected to treat as unrecoverable for the
/// affected replica (see SPEC_FULL.md §7 for why this crate returns rather
/// than aborts).
#[derive(thiserror::Error)]
pub enum Error {
    /// No `MaxIndex` or no `State` exists for a replica.
    #[error("no saved log for this replica")]
    NoSavedLog,

    /// No `Bootstrap` record exists for a replica.
    #[error("no bootstrap info for this replica")]
    NoBootstrapInfo,

    /// `iterate`'s `low` precedes the available range.
    #[error("requested entries have been compacted")]
    Compacted,

    /// `iterate`'s `high - 1` exceeds the known max durable index.
    #[error("requested entries are not yet available")]
    Unavailable,

    /// A protocol violation or corrupted record. The caller should treat
    /// the owning replica as unrecoverable.
    #[error("fatal raft-log-store error: {0}")]
    Fatal(String),

    /// Opaque error surfaced by the backing KV store.
    #[error("kv store error: {0}")]
    Io(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Error {
    pub fn fatal(msg: impl Into<String>) -> Error {
        Error::Fatal(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}
