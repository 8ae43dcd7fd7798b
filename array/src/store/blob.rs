//! A [super::Store] that keeps each slot in its own [commonware_runtime::Blob].
//!
//! All slots of an array live in a single [commonware_runtime::Storage] partition. A slot's blob is
//! named by its [SlotKey] (`"<group>_<slot>"`) and holds the slot's bytes at their slot-local
//! offsets. Blobs are created on first update, so the set of blobs in the partition is exactly the
//! set of slots that have ever been written (and not punched away).
//!
//! On [Store::init], the partition is scanned and every blob is opened and its length recorded.
//! The recorded length is the highest byte written to the slot, which [super::Store::extent_end]
//! reports. Reads are clamped to it: bytes past the end of a blob are left untouched in the
//! caller's buffer.
//!
//! Updates are not durable until [super::Store::sync] (or [Store::close]) is called.

use super::{gather, scatter, Extent, KeyPage};
use crate::{layout::SlotKey, Error};
use commonware_runtime::{Blob, Metrics, Storage};
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use std::{
    collections::{BTreeMap, BTreeSet},
    mem::take,
    ops::Bound,
    sync::Mutex,
};
use tracing::{debug, warn};

/// Configuration for [Store].
#[derive(Clone)]
pub struct Config {
    /// The [commonware_runtime::Storage] partition to store slots in.
    pub partition: String,
}

/// An open slot.
struct Slot<B: Blob> {
    blob: B,
    len: u64,
}

/// Implementation of [super::Store] backed by [commonware_runtime::Storage].
pub struct Store<E: Storage + Metrics> {
    context: E,
    partition: String,

    // Never held across an await
    slots: Mutex<BTreeMap<SlotKey, Slot<E::Blob>>>,
    dirty: Mutex<BTreeSet<SlotKey>>,

    fetches: Counter,
    updates: Counter,
    punches: Counter,
    tracked: Gauge,
}

impl<E: Storage + Metrics> Store<E> {
    /// Initialize a new [Store] instance, opening every slot already in the partition.
    pub async fn init(context: E, config: Config) -> Result<Self, Error> {
        let names = match context.scan(&config.partition).await {
            Ok(names) => names,
            Err(commonware_runtime::Error::PartitionMissing(_)) => Vec::new(),
            Err(err) => return Err(Error::Runtime(err)),
        };

        let mut slots = BTreeMap::new();
        for name in names {
            let key = SlotKey::from_bytes(&name)?;
            let (blob, len) = context.open(&config.partition, &name).await?;
            debug!(%key, len, "found slot");
            slots.insert(key, Slot { blob, len });
        }
        debug!(slots = slots.len(), partition = %config.partition, "opened slots");

        let fetches = Counter::default();
        let updates = Counter::default();
        let punches = Counter::default();
        let tracked = Gauge::default();
        context.register("fetches", "Number of fetches performed", fetches.clone());
        context.register("updates", "Number of updates performed", updates.clone());
        context.register("punches", "Number of punches performed", punches.clone());
        context.register("slots", "Number of slots tracked", tracked.clone());
        tracked.set(slots.len() as i64);

        Ok(Self {
            context,
            partition: config.partition,
            slots: Mutex::new(slots),
            dirty: Mutex::new(BTreeSet::new()),
            fetches,
            updates,
            punches,
            tracked,
        })
    }

    /// Return a handle to slot `key` and its length, if it exists.
    fn slot(&self, key: &SlotKey) -> Option<(E::Blob, u64)> {
        let slots = self.slots.lock().unwrap();
        slots.get(key).map(|slot| (slot.blob.clone(), slot.len))
    }

    /// Open (creating if necessary) the blob for slot `key`.
    async fn create(&self, key: SlotKey) -> Result<E::Blob, commonware_runtime::Error> {
        let (blob, len) = self.context.open(&self.partition, &key.to_bytes()).await?;
        let mut slots = self.slots.lock().unwrap();
        let blob = slots
            .entry(key)
            .or_insert_with(|| {
                debug!(%key, "created slot");
                Slot { blob, len }
            })
            .blob
            .clone();
        self.tracked.set(slots.len() as i64);
        Ok(blob)
    }

    /// Record that slot `key` extends to at least `end`.
    fn extend(&self, key: &SlotKey, end: u64) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(key) {
            slot.len = slot.len.max(end);
        }
    }

    /// Sync all pending updates and close the store.
    pub async fn close(self) -> Result<(), Error> {
        super::Store::sync(&self).await.map_err(Error::Sync)
    }

    /// Remove every slot and the partition itself.
    pub async fn destroy(self) -> Result<(), Error> {
        let slots = take(&mut *self.slots.lock().unwrap());
        for key in slots.into_keys() {
            self.context
                .remove(&self.partition, Some(&key.to_bytes()))
                .await?;
            debug!(%key, "destroyed slot");
        }
        match self.context.remove(&self.partition, None).await {
            Ok(()) | Err(commonware_runtime::Error::PartitionMissing(_)) => Ok(()),
            Err(err) => Err(Error::Runtime(err)),
        }
    }
}

impl<E: Storage + Metrics> super::Store for Store<E> {
    async fn fetch(
        &self,
        key: SlotKey,
        extents: &[Extent],
        segments: &mut [&mut [u8]],
    ) -> Result<(), commonware_runtime::Error> {
        self.fetches.inc();
        let Some((blob, len)) = self.slot(&key) else {
            debug!(%key, "fetch from missing slot");
            return Ok(());
        };

        let mut skip = 0usize;
        for extent in extents {
            let end = extent.end().min(len);
            if extent.offset < end {
                let buf = vec![0u8; (end - extent.offset) as usize];
                let buf = blob.read_at(buf, extent.offset).await?;
                scatter(segments, skip, buf.as_ref());
            }
            skip += extent.len as usize;
        }
        Ok(())
    }

    async fn update(
        &self,
        key: SlotKey,
        extents: &[Extent],
        segments: &[&[u8]],
    ) -> Result<(), commonware_runtime::Error> {
        self.updates.inc();
        let blob = match self.slot(&key) {
            Some((blob, _)) => blob,
            None => self.create(key).await?,
        };

        // Extents written before a failure must still be synced
        self.dirty.lock().unwrap().insert(key);
        let mut skip = 0usize;
        for extent in extents {
            if extent.len == 0 {
                continue;
            }
            let data = gather(segments, skip, extent.len as usize);
            blob.write_at(data, extent.offset).await?;
            self.extend(&key, extent.end());
            skip += extent.len as usize;
        }
        Ok(())
    }

    async fn list_keys(
        &self,
        after: Option<SlotKey>,
        max: usize,
    ) -> Result<KeyPage, commonware_runtime::Error> {
        let slots = self.slots.lock().unwrap();
        let range = match after {
            Some(after) => slots.range((Bound::Excluded(after), Bound::Unbounded)),
            None => slots.range(..),
        };
        let mut remaining = range.map(|(key, _)| *key);
        let keys: Vec<SlotKey> = remaining.by_ref().take(max.max(1)).collect();
        let next = match remaining.next() {
            Some(_) => keys.last().copied(),
            None => None,
        };
        Ok(KeyPage { keys, next })
    }

    async fn extent_end(&self, key: SlotKey) -> Result<Option<u64>, commonware_runtime::Error> {
        Ok(self.slot(&key).map(|(_, len)| len))
    }

    async fn punch(&self, key: SlotKey, keep: u64) -> Result<(), commonware_runtime::Error> {
        self.punches.inc();
        let Some((blob, len)) = self.slot(&key) else {
            return Ok(());
        };

        if keep == 0 {
            self.context
                .remove(&self.partition, Some(&key.to_bytes()))
                .await?;
            let mut slots = self.slots.lock().unwrap();
            slots.remove(&key);
            self.tracked.set(slots.len() as i64);
            self.dirty.lock().unwrap().remove(&key);
            debug!(%key, len, "removed slot");
            return Ok(());
        }

        if keep < len {
            blob.resize(keep).await?;
            blob.sync().await?;
            if let Some(slot) = self.slots.lock().unwrap().get_mut(&key) {
                slot.len = keep;
            }
            debug!(%key, len, keep, "truncated slot");
        }
        Ok(())
    }

    async fn sync(&self) -> Result<(), commonware_runtime::Error> {
        let dirty = take(&mut *self.dirty.lock().unwrap());
        for key in dirty {
            let Some((blob, _)) = self.slot(&key) else {
                warn!(%key, "dirty slot no longer tracked");
                continue;
            };
            blob.sync().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store as _;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Error as RError, Runner};
    use commonware_utils::StableBuf;
    use prometheus_client::registry::Metric;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    type Inner = deterministic::Context;

    /// Context whose blobs reject writes at or past `limit` and count syncs.
    #[derive(Clone)]
    struct Faulty {
        inner: Inner,
        limit: u64,
        syncs: Arc<AtomicUsize>,
    }

    #[derive(Clone)]
    struct FaultyBlob {
        inner: <Inner as Storage>::Blob,
        limit: u64,
        syncs: Arc<AtomicUsize>,
    }

    impl Storage for Faulty {
        type Blob = FaultyBlob;

        async fn open(&self, partition: &str, name: &[u8]) -> Result<(FaultyBlob, u64), RError> {
            let (inner, len) = self.inner.open(partition, name).await?;
            let blob = FaultyBlob {
                inner,
                limit: self.limit,
                syncs: self.syncs.clone(),
            };
            Ok((blob, len))
        }

        async fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), RError> {
            self.inner.remove(partition, name).await
        }

        async fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, RError> {
            self.inner.scan(partition).await
        }
    }

    impl Blob for FaultyBlob {
        async fn read_at(
            &self,
            buf: impl Into<StableBuf> + Send,
            offset: u64,
        ) -> Result<StableBuf, RError> {
            self.inner.read_at(buf, offset).await
        }

        async fn write_at(&self, buf: impl Into<StableBuf> + Send, offset: u64) -> Result<(), RError> {
            if offset >= self.limit {
                return Err(RError::WriteFailed);
            }
            self.inner.write_at(buf, offset).await
        }

        async fn resize(&self, len: u64) -> Result<(), RError> {
            self.inner.resize(len).await
        }

        async fn sync(&self) -> Result<(), RError> {
            self.syncs.fetch_add(1, Ordering::Relaxed);
            self.inner.sync().await
        }

        async fn close(self) -> Result<(), RError> {
            self.inner.close().await
        }
    }

    impl Metrics for Faulty {
        fn label(&self) -> String {
            self.inner.label()
        }

        fn with_label(&self, label: &str) -> Self {
            Self {
                inner: self.inner.with_label(label),
                limit: self.limit,
                syncs: self.syncs.clone(),
            }
        }

        fn register<N: Into<String>, H: Into<String>>(&self, name: N, help: H, metric: impl Metric) {
            self.inner.register(name, help, metric)
        }

        fn encode(&self) -> String {
            self.inner.encode()
        }
    }

    fn config() -> Config {
        Config {
            partition: "slots".to_string(),
        }
    }

    #[test_traced]
    fn test_update_fetch() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Store::init(context.clone(), config()).await.unwrap();
            let key = SlotKey::new(0, 1);

            // Gather two segments into two extents
            let a = [1u8, 2, 3];
            let b = [4u8, 5, 6, 7, 8];
            let extents = [Extent::new(0, 4), Extent::new(10, 4)];
            store.update(key, &extents, &[&a[..], &b[..]]).await.unwrap();
            assert_eq!(store.extent_end(key).await.unwrap(), Some(14));

            // Scatter into segments that split differently
            let mut x = [0u8; 2];
            let mut y = [0u8; 6];
            {
                let mut segments: Vec<&mut [u8]> = vec![&mut x[..], &mut y[..]];
                store.fetch(key, &extents, &mut segments).await.unwrap();
            }
            assert_eq!(x, [1, 2]);
            assert_eq!(y, [3, 4, 5, 6, 7, 8]);

            // Unwritten bytes inside the blob are zero
            let mut gap = [9u8; 6];
            store
                .fetch(key, &[Extent::new(4, 6)], &mut [&mut gap[..]])
                .await
                .unwrap();
            assert_eq!(gap, [0; 6]);

            let buffer = context.encode();
            assert!(buffer.contains("fetches_total 2"));
            assert!(buffer.contains("updates_total 1"));
            assert!(buffer.contains("slots 1"));

            store.destroy().await.unwrap();
        });
    }

    #[test_traced]
    fn test_fetch_missing_is_untouched() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Store::init(context, config()).await.unwrap();

            // Missing slot
            let mut buf = [7u8; 8];
            store
                .fetch(SlotKey::new(3, 0), &[Extent::new(0, 8)], &mut [&mut buf[..]])
                .await
                .unwrap();
            assert_eq!(buf, [7; 8]);
            assert_eq!(store.extent_end(SlotKey::new(3, 0)).await.unwrap(), None);

            // Past the end of an existing slot
            let key = SlotKey::new(0, 0);
            store
                .update(key, &[Extent::new(0, 2)], &[&[1u8, 2][..]])
                .await
                .unwrap();
            let mut buf = [7u8; 4];
            store
                .fetch(key, &[Extent::new(0, 4)], &mut [&mut buf[..]])
                .await
                .unwrap();
            assert_eq!(buf, [1, 2, 7, 7]);

            store.destroy().await.unwrap();
        });
    }

    #[test_traced]
    fn test_list_keys_paged() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Store::init(context, config()).await.unwrap();
            let mut expected = Vec::new();
            for group in [0u64, 1, 10] {
                for slot in 0..3u32 {
                    let key = SlotKey::new(group, slot);
                    store
                        .update(key, &[Extent::new(0, 1)], &[&[1u8][..]])
                        .await
                        .unwrap();
                    expected.push(key);
                }
            }

            let mut keys = Vec::new();
            let mut after = None;
            let mut pages = 0;
            loop {
                let page = store.list_keys(after, 4).await.unwrap();
                assert!(page.keys.len() <= 4);
                keys.extend(page.keys);
                pages += 1;
                match page.next {
                    Some(next) => after = Some(next),
                    None => break,
                }
            }
            assert_eq!(keys, expected);
            assert_eq!(pages, 3);

            // Exact page boundary signals the end without an empty page
            let page = store.list_keys(Some(SlotKey::new(1, 2)), 3).await.unwrap();
            assert_eq!(page.keys.len(), 3);
            assert_eq!(page.next, None);

            store.destroy().await.unwrap();
        });
    }

    #[test_traced]
    fn test_punch() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Store::init(context.clone(), config()).await.unwrap();
            let key = SlotKey::new(0, 0);
            store
                .update(key, &[Extent::new(0, 8)], &[&[1u8, 2, 3, 4, 5, 6, 7, 8][..]])
                .await
                .unwrap();

            // Truncate
            store.punch(key, 3).await.unwrap();
            assert_eq!(store.extent_end(key).await.unwrap(), Some(3));
            let mut buf = [0u8; 8];
            store
                .fetch(key, &[Extent::new(0, 8)], &mut [&mut buf[..]])
                .await
                .unwrap();
            assert_eq!(buf, [1, 2, 3, 0, 0, 0, 0, 0]);

            // Keeping more than exists is a no-op
            store.punch(key, 100).await.unwrap();
            assert_eq!(store.extent_end(key).await.unwrap(), Some(3));

            // Remove
            store.punch(key, 0).await.unwrap();
            assert_eq!(store.extent_end(key).await.unwrap(), None);
            let page = store.list_keys(None, 10).await.unwrap();
            assert!(page.keys.is_empty());

            // Missing slots are ignored
            store.punch(SlotKey::new(5, 0), 0).await.unwrap();

            let buffer = context.encode();
            assert!(buffer.contains("punches_total 4"));
            assert!(buffer.contains("slots 0"));

            store.destroy().await.unwrap();
        });
    }

    #[test_traced]
    fn test_reopen() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = Store::init(context.clone(), config()).await.unwrap();
            store
                .update(SlotKey::new(2, 1), &[Extent::new(4, 3)], &[&[1u8, 2, 3][..]])
                .await
                .unwrap();
            store
                .update(SlotKey::new(0, 3), &[Extent::new(0, 1)], &[&[9u8][..]])
                .await
                .unwrap();
            store.close().await.unwrap();

            let store = Store::init(context.with_label("reopened"), config())
                .await
                .unwrap();
            let page = store.list_keys(None, 10).await.unwrap();
            assert_eq!(page.keys, vec![SlotKey::new(0, 3), SlotKey::new(2, 1)]);
            assert_eq!(store.extent_end(SlotKey::new(2, 1)).await.unwrap(), Some(7));

            let mut buf = [0u8; 3];
            store
                .fetch(
                    SlotKey::new(2, 1),
                    &[Extent::new(4, 3)],
                    &mut [&mut buf[..]],
                )
                .await
                .unwrap();
            assert_eq!(buf, [1, 2, 3]);

            store.destroy().await.unwrap();
        });
    }

    #[test_traced]
    fn test_foreign_blob_rejected() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (blob, _) = context.open("slots", b"not-a-slot").await.unwrap();
            blob.write_at(vec![1u8], 0).await.unwrap();
            blob.sync().await.unwrap();

            let result = Store::init(context, config()).await;
            assert!(matches!(result, Err(Error::InvalidKey(_))));
        });
    }

    #[test_traced]
    fn test_partial_update_is_synced() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let syncs = Arc::new(AtomicUsize::new(0));
            let faulty = Faulty {
                inner: context,
                limit: 50,
                syncs: syncs.clone(),
            };
            let store = Store::init(faulty, config()).await.unwrap();

            // Second extent lands past the limit
            let key = SlotKey::new(0, 0);
            let result = store
                .update(
                    key,
                    &[Extent::new(0, 4), Extent::new(100, 4)],
                    &[&[7u8; 8][..]],
                )
                .await;
            assert!(matches!(result, Err(RError::WriteFailed)));
            assert_eq!(store.extent_end(key).await.unwrap(), Some(4));

            // The first extent still reaches the blob
            store.sync().await.unwrap();
            assert_eq!(syncs.load(Ordering::Relaxed), 1);
            let mut buf = [0u8; 4];
            store
                .fetch(key, &[Extent::new(0, 4)], &mut [&mut buf[..]])
                .await
                .unwrap();
            assert_eq!(buf, [7u8; 4]);

            // Nothing left to sync
            store.sync().await.unwrap();
            assert_eq!(syncs.load(Ordering::Relaxed), 1);
        });
    }
}
