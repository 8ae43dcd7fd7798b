//! The slot-addressed key-value store an [crate::array::Array] is layered on.
//!
//! A [Store] exposes the narrow access pattern the array needs: fetch or update a list of byte
//! [Extent]s of a single slot, scattered from (or gathered into) a list of memory segments, and
//! enumerate the slots that exist. Beyond that, a store must report the highest byte written to a
//! slot ([Store::extent_end]) and be able to drop bytes from the tail of a slot ([Store::punch]) so
//! the array can compute its exact length and shrink.
//!
//! [blob::Store] implements [Store] on top of [commonware_runtime::Storage], storing each slot in
//! its own blob.

use crate::layout::SlotKey;
use commonware_runtime::Error;
use std::future::Future;

pub mod blob;

/// A byte range inside one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub len: u64,
}

impl Extent {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// First byte after the extent.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// One page of an ascending slot key enumeration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub keys: Vec<SlotKey>,

    /// Cursor to resume enumeration from, or `None` once every key has been returned.
    pub next: Option<SlotKey>,
}

/// Interface to a slot-addressed key-value store.
///
/// In both [Store::fetch] and [Store::update], `extents` and `segments` describe the same number of
/// bytes: the bytes of the extents, in order, map onto the bytes of the segments, in order.
pub trait Store: Send + Sync {
    /// Read `extents` of slot `key` into `segments`.
    ///
    /// Bytes that were never written are left untouched.
    fn fetch(
        &self,
        key: SlotKey,
        extents: &[Extent],
        segments: &mut [&mut [u8]],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Write `segments` into `extents` of slot `key`, creating the slot if needed.
    fn update(
        &self,
        key: SlotKey,
        extents: &[Extent],
        segments: &[&[u8]],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// List up to `max` keys (in ascending order) greater than `after`.
    fn list_keys(
        &self,
        after: Option<SlotKey>,
        max: usize,
    ) -> impl Future<Output = Result<KeyPage, Error>> + Send;

    /// Return one past the highest byte written to slot `key`, or `None` if the slot does not exist.
    fn extent_end(&self, key: SlotKey) -> impl Future<Output = Result<Option<u64>, Error>> + Send;

    /// Keep the first `keep` bytes of slot `key` and drop the rest, removing the slot when `keep`
    /// is zero.
    fn punch(&self, key: SlotKey, keep: u64) -> impl Future<Output = Result<(), Error>> + Send;

    /// Durably persist all prior updates.
    fn sync(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Copy `data` into `segments` starting `skip` bytes into the concatenation of `segments`.
pub(crate) fn scatter(segments: &mut [&mut [u8]], mut skip: usize, mut data: &[u8]) {
    for segment in segments.iter_mut() {
        if data.is_empty() {
            return;
        }
        if skip >= segment.len() {
            skip -= segment.len();
            continue;
        }
        let n = (segment.len() - skip).min(data.len());
        segment[skip..skip + n].copy_from_slice(&data[..n]);
        data = &data[n..];
        skip = 0;
    }
}

/// Copy `len` bytes out of the concatenation of `segments`, starting `skip` bytes in.
pub(crate) fn gather(segments: &[&[u8]], mut skip: usize, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for segment in segments {
        if out.len() == len {
            break;
        }
        if skip >= segment.len() {
            skip -= segment.len();
            continue;
        }
        let n = (segment.len() - skip).min(len - out.len());
        out.extend_from_slice(&segment[skip..skip + n]);
        skip = 0;
    }
    out
}
