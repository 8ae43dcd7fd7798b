//! In-memory [Store] that records every operation and can be told to fail.

use crate::{
    layout::SlotKey,
    store::{gather, scatter, Extent, KeyPage, Store as StoreTrait},
};
use commonware_runtime::Error;
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Bound,
    sync::Mutex,
};

/// An operation observed by [Store].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Fetch(SlotKey, Vec<Extent>),
    Update(SlotKey, Vec<Extent>),
    List(Option<SlotKey>),
    ExtentEnd(SlotKey),
    Punch(SlotKey, u64),
    Sync,
}

/// Slots held as plain byte vectors.
#[derive(Default)]
pub struct Store {
    slots: Mutex<BTreeMap<SlotKey, Vec<u8>>>,
    ops: Mutex<Vec<Op>>,
    failing: BTreeSet<SlotKey>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every fetch or update of `key`.
    pub fn failing(keys: impl IntoIterator<Item = SlotKey>) -> Self {
        Self {
            failing: keys.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Every operation performed so far, in order.
    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    /// Keys touched by fetches and updates, in order.
    pub fn io(&self) -> Vec<SlotKey> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Fetch(key, _) | Op::Update(key, _) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Raw bytes of slot `key`.
    pub fn slot(&self, key: SlotKey) -> Option<Vec<u8>> {
        self.slots.lock().unwrap().get(&key).cloned()
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

impl StoreTrait for Store {
    async fn fetch(
        &self,
        key: SlotKey,
        extents: &[Extent],
        segments: &mut [&mut [u8]],
    ) -> Result<(), Error> {
        self.record(Op::Fetch(key, extents.to_vec()));
        if self.failing.contains(&key) {
            return Err(Error::ReadFailed);
        }
        let slots = self.slots.lock().unwrap();
        let Some(data) = slots.get(&key) else {
            return Ok(());
        };
        let mut skip = 0usize;
        for extent in extents {
            let start = (extent.offset as usize).min(data.len());
            let end = (extent.end() as usize).min(data.len());
            scatter(segments, skip, &data[start..end]);
            skip += extent.len as usize;
        }
        Ok(())
    }

    async fn update(
        &self,
        key: SlotKey,
        extents: &[Extent],
        segments: &[&[u8]],
    ) -> Result<(), Error> {
        self.record(Op::Update(key, extents.to_vec()));
        if self.failing.contains(&key) {
            return Err(Error::WriteFailed);
        }
        let mut slots = self.slots.lock().unwrap();
        let data = slots.entry(key).or_default();
        let mut skip = 0usize;
        for extent in extents {
            let end = extent.end() as usize;
            if data.len() < end {
                data.resize(end, 0);
            }
            let bytes = gather(segments, skip, extent.len as usize);
            data[extent.offset as usize..end].copy_from_slice(&bytes);
            skip += extent.len as usize;
        }
        Ok(())
    }

    async fn list_keys(&self, after: Option<SlotKey>, max: usize) -> Result<KeyPage, Error> {
        self.record(Op::List(after));
        let slots = self.slots.lock().unwrap();
        let mut keys = match after {
            Some(after) => slots.range((Bound::Excluded(after), Bound::Unbounded)),
            None => slots.range(..),
        }
        .map(|(key, _)| *key);
        let page: Vec<SlotKey> = keys.by_ref().take(max).collect();
        let next = keys.next().and(page.last().copied());
        Ok(KeyPage { keys: page, next })
    }

    async fn extent_end(&self, key: SlotKey) -> Result<Option<u64>, Error> {
        self.record(Op::ExtentEnd(key));
        Ok(self
            .slots
            .lock()
            .unwrap()
            .get(&key)
            .map(|data| data.len() as u64))
    }

    async fn punch(&self, key: SlotKey, keep: u64) -> Result<(), Error> {
        self.record(Op::Punch(key, keep));
        let mut slots = self.slots.lock().unwrap();
        if keep == 0 {
            slots.remove(&key);
        } else if let Some(data) = slots.get_mut(&key) {
            data.truncate(keep as usize);
        }
        Ok(())
    }

    async fn sync(&self) -> Result<(), Error> {
        self.record(Op::Sync);
        Ok(())
    }
}
