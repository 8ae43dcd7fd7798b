//! Translate array offsets into slots.
//!
//! The array's byte address space is split into fixed-size groups. Inside a group, bytes are
//! striped round-robin across `slots_per_group` slots, `slot_capacity` bytes at a time. After
//! `rounds_per_group` passes over every slot of the group, addressing rolls into the next group
//! (and a fresh set of slots):
//!
//! ```text
//!                 group 0 (group_size = slot_capacity * slots_per_group * rounds_per_group)
//! +---------+---------+---------+---------+---------+---------+---------+---------+-- ... --+
//! | 0_0 [0] | 0_1 [0] | 0_2 [0] | 0_3 [0] | 0_0 [1] | 0_1 [1] | 0_2 [1] | 0_3 [1] |   ...   |
//! +---------+---------+---------+---------+---------+---------+---------+---------+-- ... --+
//! |<--------------- group_chunk --------------->|
//!
//! `g_s [r]` = round `r` of slot `s` in group `g`, stored at slot-local offset `r * slot_capacity`.
//! ```
//!
//! Each slot is stored under its own [SlotKey] and holds `rounds_per_group * slot_capacity` bytes,
//! which are contiguous within the slot but strided in the array.

use crate::Error;
use commonware_utils::hex;
use std::{fmt, str::FromStr};

/// Default number of bytes per array cell.
pub const DEFAULT_CELL_SIZE: u64 = 1;

/// Default number of bytes stored in a slot before striping moves to the next slot (1 MiB).
pub const DEFAULT_SLOT_CAPACITY: u64 = 1024 * 1024;

/// Default number of round-robin passes over the slots of a group.
pub const DEFAULT_ROUNDS_PER_GROUP: u64 = 3;

/// Default number of slots in a group.
pub const DEFAULT_SLOTS_PER_GROUP: u32 = 4;

/// Identifies one slot of the underlying store.
///
/// Serialized as `"<group>_<slot>"`, which is the primary key handed to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub group: u64,
    pub slot: u32,
}

impl SlotKey {
    pub fn new(group: u64, slot: u32) -> Self {
        Self { group, slot }
    }

    /// Encode the key as it is stored.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Decode a stored key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        std::str::from_utf8(bytes)
            .map_err(|_| Error::InvalidKey(hex(bytes)))?
            .parse()
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.group, self.slot)
    }
}

/// Parse a canonical decimal component (no sign, no leading zeros).
fn component<T: FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

impl FromStr for SlotKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidKey(s.to_string());
        let (group, slot) = s.split_once('_').ok_or_else(invalid)?;
        let group = component(group).ok_or_else(invalid)?;
        let slot = component(slot).ok_or_else(invalid)?;
        Ok(Self { group, slot })
    }
}

/// Where an array offset lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    /// The slot holding the offset.
    pub key: SlotKey,
    /// Byte offset inside the slot.
    pub offset: u64,
    /// Bytes left in the slot's current round, starting at `offset`.
    pub capacity: u64,
}

/// Configuration for a [Layout].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Bytes per array cell.
    pub cell_size: u64,

    /// Bytes a slot holds (per round) before striping moves to the next slot of the group.
    pub slot_capacity: u64,

    /// Number of round-robin passes over the slots of a group before moving to the next group.
    pub rounds_per_group: u64,

    /// Number of slots in a group.
    pub slots_per_group: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            rounds_per_group: DEFAULT_ROUNDS_PER_GROUP,
            slots_per_group: DEFAULT_SLOTS_PER_GROUP,
        }
    }
}

/// Validated, immutable striping parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    cell_size: u64,
    slot_capacity: u64,
    rounds_per_group: u64,
    slots_per_group: u32,

    group_chunk: u64,
    group_size: u64,
}

impl Default for Layout {
    fn default() -> Self {
        let cfg = Config::default();
        let group_chunk = cfg.slot_capacity * cfg.slots_per_group as u64;
        Self {
            cell_size: cfg.cell_size,
            slot_capacity: cfg.slot_capacity,
            rounds_per_group: cfg.rounds_per_group,
            slots_per_group: cfg.slots_per_group,
            group_chunk,
            group_size: group_chunk * cfg.rounds_per_group,
        }
    }
}

impl Layout {
    /// Validate `cfg` and derive the group geometry.
    pub fn new(cfg: Config) -> Result<Self, Error> {
        if cfg.cell_size == 0 {
            return Err(Error::InvalidLayout("cell_size must be non-zero"));
        }
        if cfg.slot_capacity == 0 {
            return Err(Error::InvalidLayout("slot_capacity must be non-zero"));
        }
        if cfg.rounds_per_group == 0 {
            return Err(Error::InvalidLayout("rounds_per_group must be non-zero"));
        }
        if cfg.slots_per_group == 0 {
            return Err(Error::InvalidLayout("slots_per_group must be non-zero"));
        }
        if cfg.slot_capacity % cfg.cell_size != 0 {
            return Err(Error::InvalidLayout(
                "slot_capacity must be a multiple of cell_size",
            ));
        }
        let group_chunk = cfg
            .slot_capacity
            .checked_mul(cfg.slots_per_group as u64)
            .ok_or(Error::InvalidLayout("group_chunk overflows"))?;
        let group_size = group_chunk
            .checked_mul(cfg.rounds_per_group)
            .ok_or(Error::InvalidLayout("group_size overflows"))?;
        Ok(Self {
            cell_size: cfg.cell_size,
            slot_capacity: cfg.slot_capacity,
            rounds_per_group: cfg.rounds_per_group,
            slots_per_group: cfg.slots_per_group,
            group_chunk,
            group_size,
        })
    }

    pub fn cell_size(&self) -> u64 {
        self.cell_size
    }

    pub fn slot_capacity(&self) -> u64 {
        self.slot_capacity
    }

    pub fn rounds_per_group(&self) -> u64 {
        self.rounds_per_group
    }

    pub fn slots_per_group(&self) -> u32 {
        self.slots_per_group
    }

    /// Bytes covered by one round-robin pass over every slot of a group.
    pub fn group_chunk(&self) -> u64 {
        self.group_chunk
    }

    /// Bytes covered by a group.
    pub fn group_size(&self) -> u64 {
        self.group_size
    }

    /// Bytes a single slot holds once its group is full.
    pub fn slot_size(&self) -> u64 {
        self.slot_capacity * self.rounds_per_group
    }

    /// Translate the array cell at `index` into its slot.
    ///
    /// `index * cell_size` must fit in a `u64`.
    pub fn translate(&self, index: u64) -> Location {
        self.locate(index * self.cell_size)
    }

    /// Translate an array byte address into its slot.
    pub fn locate(&self, byte: u64) -> Location {
        let group = byte / self.group_size;
        let rel = byte - group * self.group_size;
        let slot = (rel / self.slot_capacity) % self.slots_per_group as u64;
        let round = rel / self.group_chunk;
        let start = round * self.group_chunk + slot * self.slot_capacity;
        let offset = round * self.slot_capacity + (rel - start);
        let capacity = (round + 1) * self.slot_capacity - offset;
        Location {
            key: SlotKey::new(group, slot as u32),
            offset,
            capacity,
        }
    }

    /// Whether `key` names a slot this layout can address.
    pub fn contains(&self, key: SlotKey) -> bool {
        key.slot < self.slots_per_group && key.group.checked_mul(self.group_size).is_some()
    }

    /// Array byte address of byte `offset` inside slot `key` (the inverse of [Layout::locate]).
    ///
    /// Returns `None` if `key` or `offset` falls outside the layout or the address overflows.
    pub fn position(&self, key: SlotKey, offset: u64) -> Option<u64> {
        if key.slot >= self.slots_per_group || offset >= self.slot_size() {
            return None;
        }
        let round = offset / self.slot_capacity;
        let within = offset % self.slot_capacity;
        let rel = round * self.group_chunk + key.slot as u64 * self.slot_capacity + within;
        key.group.checked_mul(self.group_size)?.checked_add(rel)
    }

    /// Number of leading bytes of slot `key` that map below array byte address `len`.
    ///
    /// Offsets inside a slot increase with their array address, so these bytes form a prefix.
    pub fn retained(&self, key: SlotKey, len: u64) -> u64 {
        let group = len / self.group_size;
        if key.group < group {
            return self.slot_size();
        }
        if key.group > group {
            return 0;
        }
        let rel = len - group * self.group_size;
        let round = rel / self.group_chunk;
        let within_chunk = rel % self.group_chunk;
        let slot = within_chunk / self.slot_capacity;
        let partial = match (key.slot as u64).cmp(&slot) {
            std::cmp::Ordering::Less => self.slot_capacity,
            std::cmp::Ordering::Equal => within_chunk % self.slot_capacity,
            std::cmp::Ordering::Greater => 0,
        };
        round * self.slot_capacity + partial
    }
}
