//! A flat array striped across the slots of a key-value store.
//!
//! [Array] translates accesses to a logical, cell-addressed array into operations on the slots of
//! an underlying [crate::store::Store]. Each access is a list of [crate::coalesce::Range]s
//! (processed in the order given) and a list of memory segments holding (or receiving) exactly as
//! many bytes as the ranges cover.
//!
//! # Access
//!
//! An access is planned before anything is sent to the store: ranges are validated against the
//! segments and coalesced into one unit per run of consecutive ranges sharing a slot. The caller's
//! segments are then carved (without copying) into one segment list per unit, and one store
//! operation is issued per unit. If there is a single unit and a single segment, the segment is
//! passed through as-is.
//!
//! With [Dispatch::Sequential], units are issued and awaited one at a time. With
//! [Dispatch::Concurrent], every unit is issued at once and the access resolves only once all of
//! them have: the first failure (in unit order) is returned, but no unit is abandoned midway.
//! Either way, nothing is rolled back if a unit fails.
//!
//! # Length
//!
//! The store has no notion of an array length. [Array::size] enumerates every slot key, keeps the
//! slots of the highest group, and asks the store how far each of those slots extends. The array
//! extends to the highest of those bytes. [Array::resize] grows the array by writing a zeroed cell
//! at the new end and shrinks it by truncating every slot to the bytes that remain below the new
//! end.
//!
//! # Example
//!
//! ```rust
//! use commonware_array::{
//!     array::{Array, Config, Dispatch},
//!     coalesce::Range,
//!     layout::Layout,
//!     store::blob::{Config as BlobConfig, Store},
//! };
//! use commonware_runtime::{deterministic, Runner};
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     // Open the array
//!     let store = Store::init(context, BlobConfig {
//!         partition: "array".to_string(),
//!     }).await.unwrap();
//!     let array = Array::new(store, Config {
//!         layout: Layout::default(),
//!         list_page_size: 64,
//!     }).unwrap();
//!
//!     // Write two ranges from one buffer
//!     let ranges = [Range::new(0, 5), Range::new(100, 5)];
//!     array.write(&ranges, &[&b"helloworld"[..]], Dispatch::Concurrent).await.unwrap();
//!
//!     // Read them back into two buffers
//!     let mut hello = [0u8; 5];
//!     let mut world = [0u8; 5];
//!     array.read(&ranges, &mut [&mut hello[..], &mut world[..]], Dispatch::Sequential).await.unwrap();
//!     assert_eq!(&hello, b"hello");
//!     assert_eq!(&world, b"world");
//!     assert_eq!(array.size().await.unwrap(), 105);
//!
//!     // Persist
//!     array.sync().await.unwrap();
//! });
//! ```

mod storage;
use crate::layout::Layout;
pub use storage::Array;

/// Default number of slot keys requested per page while enumerating slots.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 128;

/// How the store operations of a single access are driven.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dispatch {
    /// Issue each unit after the previous one completes.
    #[default]
    Sequential,

    /// Issue every unit at once and wait for all of them.
    Concurrent,
}

/// Configuration for [Array].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// How the array is striped across slots.
    pub layout: Layout,

    /// Maximum number of slot keys to request from the store at once.
    pub list_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
        }
    }
}
