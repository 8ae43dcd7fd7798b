//! Batch array ranges into per-slot I/O units.
//!
//! A caller describes an access as an ordered list of [Range]s. Each range is translated into the
//! slot(s) it covers, and consecutive ranges that land in the same physical run of a slot (the
//! `slot_capacity` contiguous bytes a slot holds for one round) are folded into a single [Unit]
//! so they can be served by one store operation.
//!
//! # Algorithm
//!
//! For the current position (the start of a range, or the unconsumed remainder of one):
//!
//! 1. Translate the position into `(key, offset, capacity)`.
//! 2. Emit the extent `(offset, min(remaining, capacity))`.
//! 3. If the range extends past `capacity`, the unit is closed and the remainder is translated
//!    afresh (it lives in the next slot of the stripe).
//! 4. Otherwise the range is done. The unit is closed if no ranges remain or if the range ended
//!    exactly on the edge of its run. Else, if the next (non-empty) range starts inside the same
//!    run, it joins the unit and the walk repeats from step 2. If not, the unit is closed.
//!
//! Ranges are never sorted: ranges that share a slot but are not consecutive in the caller's list
//! (or land in a different round of the same slot) end up in different units. Adjacent extents
//! within a unit are merged.
//!
//! # Example
//!
//! ```rust
//! use commonware_array::{coalesce::{Coalescer, Range}, layout::{Config, Layout, SlotKey}};
//!
//! let layout = Layout::new(Config {
//!     cell_size: 1,
//!     slot_capacity: 16,
//!     rounds_per_group: 3,
//!     slots_per_group: 4,
//! }).unwrap();
//!
//! // Two strided ranges in the first slot, then one straddling the second and third slot
//! let ranges = [Range::new(0, 4), Range::new(8, 4), Range::new(28, 8)];
//! let units: Vec<_> = Coalescer::new(&layout, &ranges)
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(units.len(), 3);
//! assert_eq!(units[0].key, SlotKey::new(0, 0));
//! assert_eq!(units[0].extents.len(), 2);
//! assert_eq!(units[1].key, SlotKey::new(0, 1));
//! assert_eq!(units[2].key, SlotKey::new(0, 2));
//! ```

use crate::{
    layout::{Layout, SlotKey},
    store::Extent,
    Error,
};

/// A run of `len` cells starting at array cell `index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Range {
    pub index: u64,
    pub len: u64,
}

impl Range {
    pub fn new(index: u64, len: u64) -> Self {
        Self { index, len }
    }
}

/// Work for a single store operation: extents of one slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    pub key: SlotKey,
    pub extents: Vec<Extent>,

    /// Total bytes covered by `extents`.
    pub len: u64,
}

/// Walks a list of [Range]s and yields the [Unit]s needed to access them.
#[derive(Clone)]
pub struct Coalescer<'a> {
    layout: &'a Layout,
    ranges: &'a [Range],
    bytes: u64,

    // Index of the next range to load
    next: usize,

    // Byte address and remaining bytes of a partially consumed range
    pending: Option<(u64, u64)>,
}

impl<'a> Coalescer<'a> {
    /// Create a [Coalescer] over `ranges`, rejecting ranges whose byte addresses overflow.
    pub fn new(layout: &'a Layout, ranges: &'a [Range]) -> Result<Self, Error> {
        let mut bytes = 0u64;
        for range in ranges {
            let overflow = || Error::RangeOverflow {
                index: range.index,
                len: range.len,
            };
            range
                .index
                .checked_add(range.len)
                .and_then(|end| end.checked_mul(layout.cell_size()))
                .ok_or_else(overflow)?;
            bytes = bytes
                .checked_add(range.len * layout.cell_size())
                .ok_or_else(overflow)?;
        }
        Ok(Self {
            layout,
            ranges,
            bytes,
            next: 0,
            pending: None,
        })
    }

    /// Total bytes addressed by all ranges.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Count the units that iteration would yield, without building them.
    pub fn count_units(&self) -> Result<usize, Error> {
        let mut walker = self.clone();
        let mut units = 0;
        while walker.step(None)?.is_some() {
            units += 1;
        }
        Ok(units)
    }

    /// Load the next non-empty range as `(byte address, bytes)`.
    fn load(&mut self) -> Option<(u64, u64)> {
        while let Some(range) = self.ranges.get(self.next) {
            self.next += 1;
            if range.len == 0 {
                continue;
            }
            let cell_size = self.layout.cell_size();
            return Some((range.index * cell_size, range.len * cell_size));
        }
        None
    }

    /// Produce the next unit, returning its key and length (and pushing its extents into
    /// `extents`, if provided).
    fn step(
        &mut self,
        mut extents: Option<&mut Vec<Extent>>,
    ) -> Result<Option<(SlotKey, u64)>, Error> {
        let Some((mut start, mut remaining)) = self.pending.take().or_else(|| self.load()) else {
            return Ok(None);
        };
        let mut location = self.layout.locate(start);
        let key = location.key;
        let mut len = 0;
        loop {
            let take = remaining.min(location.capacity);
            if let Some(extents) = extents.as_deref_mut() {
                match extents.last_mut() {
                    Some(last) if last.end() == location.offset => last.len += take,
                    _ => extents.push(Extent::new(location.offset, take)),
                }
            }
            len += take;

            // Remainder continues in the next slot of the stripe
            if remaining > location.capacity {
                self.pending = Some((start + location.capacity, remaining - location.capacity));
                break;
            }

            // Range ended on the edge of its run
            if remaining == location.capacity {
                break;
            }

            let Some((next_start, next_remaining)) = self.load() else {
                break;
            };
            let run_end = start + location.capacity;
            let run_start = run_end - self.layout.slot_capacity();
            if next_start < run_start || next_start >= run_end {
                self.pending = Some((next_start, next_remaining));
                break;
            }
            let next_location = self.layout.locate(next_start);
            if next_location.key != key {
                return Err(Error::KeyMismatch {
                    expected: key,
                    found: next_location.key,
                });
            }
            start = next_start;
            remaining = next_remaining;
            location = next_location;
        }
        Ok(Some((key, len)))
    }
}

impl Iterator for Coalescer<'_> {
    type Item = Result<Unit, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut extents = Vec::new();
        match self.step(Some(&mut extents)) {
            Ok(Some((key, len))) => Some(Ok(Unit { key, extents, len })),
            Ok(None) => None,
            Err(err) => {
                self.next = self.ranges.len();
                self.pending = None;
                Some(Err(err))
            }
        }
    }
}
