use super::{Config, Dispatch};
use crate::{
    coalesce::{Coalescer, Range, Unit},
    layout::{Layout, SlotKey},
    segments::Carver,
    store::Store,
    Error,
};
use futures::future::join_all;
use tracing::{debug, warn};

/// A flat, cell-addressed array striped across the slots of a [Store].
pub struct Array<S: Store> {
    layout: Layout,
    list_page_size: usize,

    store: S,
}

impl<S: Store> Array<S> {
    /// Create an [Array] over `store`.
    pub fn new(store: S, cfg: Config) -> Result<Self, Error> {
        if cfg.list_page_size == 0 {
            return Err(Error::InvalidConfig("list_page_size must be non-zero"));
        }
        Ok(Self {
            layout: cfg.layout,
            list_page_size: cfg.list_page_size,
            store,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Validate an access and build its units.
    ///
    /// Nothing is sent to the store if this fails.
    fn plan(
        &self,
        ranges: &[Range],
        available: u64,
        dispatch: Dispatch,
    ) -> Result<Vec<Unit>, Error> {
        let coalescer = Coalescer::new(&self.layout, ranges)?;
        if coalescer.bytes() != available {
            return Err(Error::LengthMismatch {
                ranges: coalescer.bytes(),
                segments: available,
            });
        }
        let mut units = match dispatch {
            Dispatch::Sequential => Vec::new(),
            Dispatch::Concurrent => Vec::with_capacity(coalescer.count_units()?),
        };
        for unit in coalescer {
            units.push(unit?);
        }
        Ok(units)
    }

    /// Read `ranges` into `segments`.
    ///
    /// The bytes of `ranges` (in order) are copied into the bytes of `segments` (in order), so both
    /// must describe the same number of bytes. Cells that were never written are left untouched.
    pub async fn read(
        &self,
        ranges: &[Range],
        segments: &mut [&mut [u8]],
        dispatch: Dispatch,
    ) -> Result<(), Error> {
        let available = segments.iter().map(|segment| segment.len() as u64).sum();
        let units = self.plan(ranges, available, dispatch)?;
        debug!(
            ranges = ranges.len(),
            units = units.len(),
            bytes = available,
            ?dispatch,
            "reading"
        );

        // The caller's buffer already matches the only unit
        if let [unit] = units.as_slice() {
            if segments.len() == 1 {
                return self
                    .store
                    .fetch(unit.key, &unit.extents, segments)
                    .await
                    .map_err(|err| fetch_failed(unit.key, err));
            }
        }

        let mut carver = Carver::new(segments.iter_mut().map(|segment| &mut **segment));
        let mut parts = Vec::with_capacity(units.len());
        for unit in units {
            let carved = carver.carve(self.carve_len(&unit)?)?;
            parts.push((unit, carved));
        }

        match dispatch {
            Dispatch::Sequential => {
                for (unit, carved) in parts.iter_mut() {
                    self.store
                        .fetch(unit.key, &unit.extents, carved)
                        .await
                        .map_err(|err| fetch_failed(unit.key, err))?;
                }
                Ok(())
            }
            Dispatch::Concurrent => {
                let results = join_all(parts.iter_mut().map(|(unit, carved)| async move {
                    self.store
                        .fetch(unit.key, &unit.extents, carved)
                        .await
                        .map_err(|err| fetch_failed(unit.key, err))
                }))
                .await;
                results.into_iter().collect()
            }
        }
    }

    /// Write `segments` into `ranges`.
    ///
    /// The bytes of `segments` (in order) are copied into the bytes of `ranges` (in order), so both
    /// must describe the same number of bytes. Nothing is rolled back if a unit fails.
    pub async fn write(
        &self,
        ranges: &[Range],
        segments: &[&[u8]],
        dispatch: Dispatch,
    ) -> Result<(), Error> {
        let available = segments.iter().map(|segment| segment.len() as u64).sum();
        let units = self.plan(ranges, available, dispatch)?;
        debug!(
            ranges = ranges.len(),
            units = units.len(),
            bytes = available,
            ?dispatch,
            "writing"
        );

        if let [unit] = units.as_slice() {
            if segments.len() == 1 {
                return self
                    .store
                    .update(unit.key, &unit.extents, segments)
                    .await
                    .map_err(|err| update_failed(unit.key, err));
            }
        }

        let mut carver = Carver::new(segments.iter().copied());
        let mut parts = Vec::with_capacity(units.len());
        for unit in units {
            let carved = carver.carve(self.carve_len(&unit)?)?;
            parts.push((unit, carved));
        }

        match dispatch {
            Dispatch::Sequential => {
                for (unit, carved) in parts.iter() {
                    self.store
                        .update(unit.key, &unit.extents, carved)
                        .await
                        .map_err(|err| update_failed(unit.key, err))?;
                }
                Ok(())
            }
            Dispatch::Concurrent => {
                let results = join_all(parts.iter().map(|(unit, carved)| async move {
                    self.store
                        .update(unit.key, &unit.extents, carved)
                        .await
                        .map_err(|err| update_failed(unit.key, err))
                }))
                .await;
                results.into_iter().collect()
            }
        }
    }

    /// Return the length of the array in cells.
    ///
    /// The length is one past the highest cell ever written (and not truncated away).
    pub async fn size(&self) -> Result<u64, Error> {
        let keys = self.keys().await?;

        // The highest group holding any data holds the last byte
        for slots in keys.chunk_by(|a, b| a.group == b.group).rev() {
            let mut end = 0u64;
            for key in slots {
                let extent_end = self
                    .store
                    .extent_end(*key)
                    .await
                    .map_err(|err| fetch_failed(*key, err))?;
                match extent_end {
                    Some(extent_end) if extent_end > 0 => {
                        let byte = self
                            .layout
                            .position(*key, extent_end - 1)
                            .and_then(|byte| byte.checked_add(1))
                            .ok_or_else(|| {
                                warn!(%key, extent_end, "slot extends outside the layout");
                                Error::InvalidKey(key.to_string())
                            })?;
                        end = end.max(byte);
                    }
                    _ => warn!(%key, "empty slot"),
                }
            }
            if end > 0 {
                let size = end.div_ceil(self.layout.cell_size());
                debug!(group = slots[0].group, bytes = end, size, "resolved size");
                return Ok(size);
            }
        }
        debug!(slots = keys.len(), "no data found");
        Ok(0)
    }

    /// Grow or shrink the array to `len` cells.
    ///
    /// Growing writes a zeroed cell at `len - 1`. Shrinking truncates (or removes) every slot
    /// holding cells at or past `len`.
    pub async fn resize(&self, len: u64) -> Result<(), Error> {
        let current = self.size().await?;
        if current == len {
            return Ok(());
        }
        if current < len {
            debug!(current, len, "growing");
            return self.sentinel(len).await;
        }

        debug!(current, len, "shrinking");
        let bytes = len * self.layout.cell_size();
        for key in self.keys().await? {
            let keep = self.layout.retained(key, bytes);
            if keep >= self.layout.slot_size() {
                continue;
            }
            let end = self
                .store
                .extent_end(key)
                .await
                .map_err(|err| fetch_failed(key, err))?;
            if !end.is_some_and(|end| end > keep) {
                continue;
            }
            self.store.punch(key, keep).await.map_err(|err| {
                warn!(%key, keep, ?err, "punch failed");
                Error::Punch(key, err)
            })?;
        }

        // Truncation can expose a hole at the new end
        if self.size().await? < len {
            self.sentinel(len).await?;
        }
        Ok(())
    }

    /// Durably persist all prior writes.
    pub async fn sync(&self) -> Result<(), Error> {
        self.store.sync().await.map_err(Error::Sync)
    }

    /// Bytes of caller memory `unit` spans.
    fn carve_len(&self, unit: &Unit) -> Result<usize, Error> {
        usize::try_from(unit.len).map_err(|_| {
            let byte = unit
                .extents
                .first()
                .and_then(|extent| self.layout.position(unit.key, extent.offset))
                .unwrap_or_default();
            Error::RangeOverflow {
                index: byte / self.layout.cell_size(),
                len: unit.len.div_ceil(self.layout.cell_size()),
            }
        })
    }

    /// Write a zeroed cell at `len - 1`.
    async fn sentinel(&self, len: u64) -> Result<(), Error> {
        let cell = vec![0u8; self.layout.cell_size() as usize];
        self.write(&[Range::new(len - 1, 1)], &[cell.as_slice()], Dispatch::Sequential)
            .await
    }

    /// Enumerate every slot key, rejecting keys the layout cannot address.
    async fn keys(&self) -> Result<Vec<SlotKey>, Error> {
        let mut keys = Vec::new();
        let mut after = None;
        loop {
            let page = self
                .store
                .list_keys(after, self.list_page_size)
                .await
                .map_err(Error::List)?;
            for key in page.keys {
                if !self.layout.contains(key) {
                    warn!(%key, "slot outside the layout");
                    return Err(Error::InvalidKey(key.to_string()));
                }
                keys.push(key);
            }
            match page.next {
                Some(next) => after = Some(next),
                None => return Ok(keys),
            }
        }
    }
}

fn fetch_failed(key: SlotKey, err: commonware_runtime::Error) -> Error {
    warn!(%key, ?err, "fetch failed");
    Error::Fetch(key, err)
}

fn update_failed(key: SlotKey, err: commonware_runtime::Error) -> Error {
    warn!(%key, ?err, "update failed");
    Error::Update(key, err)
}
