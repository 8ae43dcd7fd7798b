//! Stripe a flat array across the slots of an abstract key-value store.
//!
//! The only access pattern a slot-addressed store offers is `(key, extent)`: read or write some
//! bytes at some offset of some key. This crate layers a logical, cell-addressed array on top of
//! that pattern. Every array offset is translated into a [layout::SlotKey] and an offset inside
//! that slot ([layout]), consecutive ranges that land in the same slot are coalesced into a single
//! store operation ([coalesce]), and the caller's scatter/gather buffers are re-sliced (never
//! copied) to match each operation ([segments]). [array::Array] drives all of the above against
//! any [store::Store], discovers the current length of the array by enumerating slot keys, and
//! grows or shrinks it.
//!
//! # Status
//!
//! `commonware-array` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

pub mod array;
pub mod coalesce;
pub mod layout;
#[cfg(test)]
mod mocks;
pub mod segments;
pub mod store;

use layout::SlotKey;
use thiserror::Error;

/// Errors that can occur when interacting with an [array::Array].
#[derive(Debug, Error)]
pub enum Error {
    #[error("runtime error: {0}")]
    Runtime(#[from] commonware_runtime::Error),
    #[error("invalid layout: {0}")]
    InvalidLayout(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("invalid slot key: {0}")]
    InvalidKey(String),
    #[error("range length ({ranges} bytes) does not match segment length ({segments} bytes)")]
    LengthMismatch { ranges: u64, segments: u64 },
    #[error("range overflows the array address space: index={index} len={len}")]
    RangeOverflow { index: u64, len: u64 },
    #[error("segments exhausted with {missing} bytes left to carve")]
    SegmentsExhausted { missing: u64 },
    #[error("unit opened for slot {expected} but range resolved to slot {found}")]
    KeyMismatch { expected: SlotKey, found: SlotKey },
    #[error("fetch failed for slot {0}: {1}")]
    Fetch(SlotKey, #[source] commonware_runtime::Error),
    #[error("update failed for slot {0}: {1}")]
    Update(SlotKey, #[source] commonware_runtime::Error),
    #[error("punch failed for slot {0}: {1}")]
    Punch(SlotKey, #[source] commonware_runtime::Error),
    #[error("key listing failed: {0}")]
    List(#[source] commonware_runtime::Error),
    #[error("sync failed: {0}")]
    Sync(#[source] commonware_runtime::Error),
}
