//! Partition a caller's scatter/gather list into per-unit segment lists.
//!
//! A [Carver] walks the caller's segments with a cursor (segment index, offset within that
//! segment) and hands out exactly `n` bytes at a time as a new list of sub-slices of the same
//! memory. No bytes are copied and the cursor only moves forward, so every carved list is disjoint
//! from every other one (which is what allows mutable carving for reads).

use crate::Error;
use std::mem::take;

/// A contiguous region of caller memory that can be split without copying.
pub trait Segment: Default {
    /// Number of bytes in the segment.
    fn size(&self) -> usize;

    /// Split the segment into `[0, mid)` and `[mid, size)`.
    fn divide(self, mid: usize) -> (Self, Self);
}

impl Segment for &[u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn divide(self, mid: usize) -> (Self, Self) {
        self.split_at(mid)
    }
}

impl Segment for &mut [u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn divide(self, mid: usize) -> (Self, Self) {
        self.split_at_mut(mid)
    }
}

/// Carves consecutive byte counts out of a list of segments.
pub struct Carver<S: Segment, I: Iterator<Item = S>> {
    segments: I,

    // Uncarved tail of the segment under the cursor
    current: S,
    pulled: usize,
    offset: usize,
}

impl<S: Segment, I: Iterator<Item = S>> Carver<S, I> {
    pub fn new(segments: impl IntoIterator<Item = S, IntoIter = I>) -> Self {
        Self {
            segments: segments.into_iter(),
            current: S::default(),
            pulled: 0,
            offset: 0,
        }
    }

    /// Return the cursor as `(segment index, offset within segment)`.
    pub fn cursor(&self) -> (usize, usize) {
        if self.current.size() == 0 {
            (self.pulled, 0)
        } else {
            (self.pulled - 1, self.offset)
        }
    }

    /// Carve the next `n` bytes.
    ///
    /// Fails if the segments run out first; the cursor is left at the end of the list.
    pub fn carve(&mut self, n: usize) -> Result<Vec<S>, Error> {
        let mut carved = Vec::new();
        let mut needed = n;
        while needed > 0 {
            if self.current.size() == 0 {
                let Some(segment) = self.segments.next() else {
                    return Err(Error::SegmentsExhausted {
                        missing: needed as u64,
                    });
                };
                self.current = segment;
                self.pulled += 1;
                self.offset = 0;
                continue;
            }
            let n = needed.min(self.current.size());
            let (head, tail) = take(&mut self.current).divide(n);
            self.current = tail;
            self.offset += n;
            needed -= n;
            carved.push(head);
        }
        Ok(carved)
    }
}
