// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Fixed-size key encoding for every record kind this engine stores.
//!
//! Every key starts with a one-byte kind tag followed by big-endian
//! `cluster_id` and `node_id`, mirroring the way `keys::raft_log_key` and
//! `keys::raft_state_key` lay out region-scoped keys in `engine_rocks`, but
//! generalized to the `(cluster_id, node_id)` replica identity this engine
//! indexes by instead of a single region id. Big-endian encoding keeps
//! lexicographic key order equal to numeric `(cluster, node, index)` order,
//! so a range scan across one kind yields a contiguous per-replica range.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Size of the common `tag + cluster_id + node_id` prefix shared by every
/// key kind.
const PREFIX_LEN: usize = 1 + 8 + 8;

/// Size of the largest key this engine ever constructs (prefix plus one
/// trailing `u64` suffix). The key pool hands out buffers of this size.
pub const MAX_KEY_LEN: usize = PREFIX_LEN + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyKind {
    State = 1,
    Bootstrap = 2,
    MaxIndex = 3,
    Snapshot = 4,
    EntryPlain = 5,
    EntryBatched = 6,
    /// Written by `remove_node_data` before its entry/snapshot range
    /// deletes run. If the process crashes before those range-deletes
    /// finish, `RdbEngine::open_with_store` scans every `Tombstone` marker
    /// and resumes the owed cleanup for that `(cluster_id, node_id)`. This
    /// is an addition over spec.md (see SPEC_FULL.md §4.1) and not present
    /// in the distilled key table.
    Tombstone = 7,
}

impl KeyKind {
    fn from_tag(tag: u8) -> Result<KeyKind> {
        match tag {
            1 => Ok(KeyKind::State),
            2 => Ok(KeyKind::Bootstrap),
            3 => Ok(KeyKind::MaxIndex),
            4 => Ok(KeyKind::Snapshot),
            5 => Ok(KeyKind::EntryPlain),
            6 => Ok(KeyKind::EntryBatched),
            7 => Ok(KeyKind::Tombstone),
            _ => Err(Error::fatal(format!("unknown key kind tag {}", tag))),
        }
    }
}

fn write_prefix(buf: &mut Vec<u8>, kind: KeyKind, cluster_id: u64, node_id: u64) {
    buf.clear();
    buf.push(kind as u8);
    let mut tmp = [0u8; 8];
    BigEndian::write_u64(&mut tmp, cluster_id);
    buf.extend_from_slice(&tmp);
    BigEndian::write_u64(&mut tmp, node_id);
    buf.extend_from_slice(&tmp);
}

fn with_prefix(kind: KeyKind, cluster_id: u64, node_id: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PREFIX_LEN);
    write_prefix(&mut buf, kind, cluster_id, node_id);
    buf
}

fn with_suffix(kind: KeyKind, cluster_id: u64, node_id: u64, suffix: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_KEY_LEN);
    fill_suffix_key(&mut buf, kind, cluster_id, node_id, suffix);
    buf
}

/// Writes a prefix-only key (`State`/`Bootstrap`/`MaxIndex`/`Tombstone`)
/// into a caller-supplied buffer, e.g. one borrowed from [`crate::pool::KeyPool`]
/// or [`crate::context::SaveContext`] on the single-key hot paths
/// (`read_state`, `read_max_index`, `save_raft_state`).
pub fn fill_prefix_key(buf: &mut Vec<u8>, kind: KeyKind, cluster_id: u64, node_id: u64) {
    write_prefix(buf, kind, cluster_id, node_id);
}

/// Writes a suffixed key (`Snapshot`/`Entry*`) into a caller-supplied
/// buffer, the suffixed counterpart to [`fill_prefix_key`].
pub fn fill_suffix_key(buf: &mut Vec<u8>, kind: KeyKind, cluster_id: u64, node_id: u64, suffix: u64) {
    write_prefix(buf, kind, cluster_id, node_id);
    let mut tmp = [0u8; 8];
    BigEndian::write_u64(&mut tmp, suffix);
    buf.extend_from_slice(&tmp);
}

pub fn state_key(cluster_id: u64, node_id: u64) -> Vec<u8> {
    with_prefix(KeyKind::State, cluster_id, node_id)
}

pub fn bootstrap_key(cluster_id: u64, node_id: u64) -> Vec<u8> {
    with_prefix(KeyKind::Bootstrap, cluster_id, node_id)
}

pub fn max_index_key(cluster_id: u64, node_id: u64) -> Vec<u8> {
    with_prefix(KeyKind::MaxIndex, cluster_id, node_id)
}

pub fn tombstone_key(cluster_id: u64, node_id: u64) -> Vec<u8> {
    with_prefix(KeyKind::Tombstone, cluster_id, node_id)
}

pub fn snapshot_key(cluster_id: u64, node_id: u64, index: u64) -> Vec<u8> {
    with_suffix(KeyKind::Snapshot, cluster_id, node_id, index)
}

pub fn snapshot_prefix(cluster_id: u64, node_id: u64) -> Vec<u8> {
    with_prefix(KeyKind::Snapshot, cluster_id, node_id)
}

pub fn entry_plain_key(cluster_id: u64, node_id: u64, index: u64) -> Vec<u8> {
    with_suffix(KeyKind::EntryPlain, cluster_id, node_id, index)
}

pub fn entry_plain_prefix(cluster_id: u64, node_id: u64) -> Vec<u8> {
    with_prefix(KeyKind::EntryPlain, cluster_id, node_id)
}

pub fn entry_batched_key(cluster_id: u64, node_id: u64, batch_id: u64) -> Vec<u8> {
    with_suffix(KeyKind::EntryBatched, cluster_id, node_id, batch_id)
}

pub fn entry_batched_prefix(cluster_id: u64, node_id: u64) -> Vec<u8> {
    with_prefix(KeyKind::EntryBatched, cluster_id, node_id)
}

/// `[first, last]` (inclusive) spanning every batch record for one
/// replica, across all batch ids.
pub fn entry_batched_prefix_range(cluster_id: u64, node_id: u64) -> (Vec<u8>, Vec<u8>) {
    (
        entry_batched_key(cluster_id, node_id, 0),
        entry_batched_key(cluster_id, node_id, u64::MAX),
    )
}

/// `[first, last]` (inclusive) spanning every snapshot record for one
/// replica, across all snapshot indexes.
pub fn snapshot_range(cluster_id: u64, node_id: u64) -> (Vec<u8>, Vec<u8>) {
    (
        snapshot_key(cluster_id, node_id, 0),
        snapshot_key(cluster_id, node_id, u64::MAX),
    )
}

/// Decodes the trailing `u64` suffix of a `Snapshot`/`Entry*` key. Errors
/// (fatal: corrupted key) if `key` is shorter than expected.
pub fn decode_suffix(key: &[u8]) -> Result<u64> {
    if key.len() != MAX_KEY_LEN {
        return Err(Error::fatal("truncated key while decoding suffix"));
    }
    Ok(BigEndian::read_u64(&key[PREFIX_LEN..]))
}

/// Decodes `(cluster_id, node_id)` from any key sharing the common prefix
/// layout, and returns the kind tag alongside it.
pub fn decode_prefix(key: &[u8]) -> Result<(KeyKind, u64, u64)> {
    if key.len() < PREFIX_LEN {
        return Err(Error::fatal("truncated key while decoding prefix"));
    }
    let kind = KeyKind::from_tag(key[0])?;
    let cluster_id = BigEndian::read_u64(&key[1..9]);
    let node_id = BigEndian::read_u64(&key[9..17]);
    Ok((kind, cluster_id, node_id))
}

/// `[first, last)` spanning every `Bootstrap` record, for `list_node_info`.
pub fn bootstrap_range() -> (Vec<u8>, Vec<u8>) {
    kind_range(KeyKind::Bootstrap)
}

/// `[first, last)` spanning every plain-manager entry record, across all
/// clusters/nodes, for the entry manager's open-time self-check.
pub fn entry_plain_kind_range() -> (Vec<u8>, Vec<u8>) {
    kind_range(KeyKind::EntryPlain)
}

/// `[first, last)` spanning every batched-manager entry record, across all
/// clusters/nodes, for the entry manager's open-time self-check.
pub fn entry_batched_kind_range() -> (Vec<u8>, Vec<u8>) {
    kind_range(KeyKind::EntryBatched)
}

/// `[first, last)` spanning every `Tombstone` marker, across all
/// clusters/nodes, scanned at open time to resume a `remove_node_data`
/// that crashed after its delete batch committed but before the
/// entry/snapshot range-delete and compaction it still owed ran.
pub fn tombstone_range() -> (Vec<u8>, Vec<u8>) {
    kind_range(KeyKind::Tombstone)
}

/// `[first, last)` spanning every key of `kind`, across all clusters/nodes.
fn kind_range(kind: KeyKind) -> (Vec<u8>, Vec<u8>) {
    let first = vec![kind as u8];
    let last = vec![kind as u8 + 1];
    (first, last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trip() {
        for &(cluster, node, idx) in &[(1u64, 2u64, 3u64), (0, 0, 0), (u64::MAX, 7, u64::MAX)] {
            let key = entry_plain_key(cluster, node, idx);
            let (kind, c, n) = decode_prefix(&key).unwrap();
            assert_eq!(kind, KeyKind::EntryPlain);
            assert_eq!((c, n), (cluster, node));
            assert_eq!(decode_suffix(&key).unwrap(), idx);
        }
    }

    #[test]
    fn key_ordering_matches_tuple_ordering() {
        let pairs = [
            ((1u64, 1u64, 1u64), (1u64, 1u64, 2u64)),
            ((1, 1, u64::MAX), (1, 2, 0)),
            ((1, u64::MAX, 0), (2, 0, 0)),
        ];
        for ((c1, n1, i1), (c2, n2, i2)) in pairs {
            let k1 = entry_plain_key(c1, n1, i1);
            let k2 = entry_plain_key(c2, n2, i2);
            assert!(k1 < k2, "{:?} should sort before {:?}", k1, k2);
        }
    }

    #[test]
    fn kinds_occupy_disjoint_byte_ranges() {
        let a = state_key(5, 5);
        let b = bootstrap_key(5, 5);
        assert_ne!(a[0], b[0]);
    }

    proptest::proptest! {
        /// Testable property 1 (spec.md §8): for all `(cluster, node, idx)`,
        /// decoding an encoded key returns the same tuple and kind tag.
        #[test]
        fn prop_key_round_trip(cluster in proptest::prelude::any::<u64>(), node in proptest::prelude::any::<u64>(), idx in proptest::prelude::any::<u64>()) {
            let key = entry_plain_key(cluster, node, idx);
            let (kind, c, n) = decode_prefix(&key).unwrap();
            proptest::prop_assert_eq!(kind, KeyKind::EntryPlain);
            proptest::prop_assert_eq!((c, n), (cluster, node));
            proptest::prop_assert_eq!(decode_suffix(&key).unwrap(), idx);
        }

        /// Testable property 2 (spec.md §8): lexicographic tuple order
        /// implies bytewise key order.
        #[test]
        fn prop_key_ordering(
            c1 in proptest::prelude::any::<u64>(), n1 in proptest::prelude::any::<u64>(), i1 in proptest::prelude::any::<u64>(),
            c2 in proptest::prelude::any::<u64>(), n2 in proptest::prelude::any::<u64>(), i2 in proptest::prelude::any::<u64>(),
        ) {
            let tuple1 = (c1, n1, i1);
            let tuple2 = (c2, n2, i2);
            let k1 = entry_plain_key(c1, n1, i1);
            let k2 = entry_plain_key(c2, n2, i2);
            match tuple1.cmp(&tuple2) {
                std::cmp::Ordering::Less => proptest::prop_assert!(k1 < k2),
                std::cmp::Ordering::Equal => proptest::prop_assert_eq!(k1, k2),
                std::cmp::Ordering::Greater => proptest::prop_assert!(k1 > k2),
            }
        }
    }
}
