//! Slot-to-vertex mapping (`AddressesHashTable` in the original, component
//! C4).
//!
//! The original keys this table by a smart pointer's own memory address,
//! classifying root-vs-regular by an address-range query at registration
//! time. Rust smart-pointer handles move, so this port keys the table by a
//! synthetic, move-stable [`SlotId`] instead (see `SPEC_FULL.md` §0) and
//! decides root-vs-regular at construction time, carried alongside the id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::vertex::VertexId;

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

/// A process-wide unique, move-stable identifier for one smart-pointer
/// slot. Replaces the raw slot address the original keys its hash table
/// by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) u64);

impl SlotId {
    /// Draws a fresh id from the process-wide monotonic counter. Called at
    /// `Gc`/`GcEdge` construction, before any message reaches the worker
    /// thread, so ids never collide even though allocation happens
    /// concurrently across producer threads.
    pub(crate) fn next() -> Self {
        Self(NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One entry in the slot table: what this slot currently points to, and
/// the vertex that embeds it (`None` for a root slot).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SlotEntry {
    pub(crate) pointed: Option<VertexId>,
    pub(crate) container: Option<VertexId>,
}

impl SlotEntry {
    pub(crate) fn is_root(&self) -> bool {
        self.container.is_none()
    }
}

/// A separately chained hash table (in spirit — `std::collections::HashMap`
/// is the idiomatic stand-in) from [`SlotId`] to [`SlotEntry`].
pub(crate) struct SlotTable {
    entries: HashMap<SlotId, SlotEntry>,
    load_factor_threshold: f64,
}

impl SlotTable {
    pub(crate) fn new(initial_size_log2: u32, load_factor_threshold: f64) -> Self {
        Self {
            entries: HashMap::with_capacity(1usize << initial_size_log2),
            load_factor_threshold,
        }
    }

    pub(crate) fn get(&self, id: SlotId) -> Option<&SlotEntry> {
        self.entries.get(&id)
    }

    pub(crate) fn insert(&mut self, id: SlotId, entry: SlotEntry) {
        self.entries.insert(id, entry);
        self.maybe_reserve();
    }

    pub(crate) fn set_pointed(&mut self, id: SlotId, pointed: Option<VertexId>) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.pointed = pointed;
        }
    }

    pub(crate) fn remove(&mut self, id: SlotId) -> Option<SlotEntry> {
        self.entries.remove(&id)
    }

    fn maybe_reserve(&mut self) {
        let capacity = self.entries.capacity();
        if capacity == 0 {
            return;
        }
        #[expect(clippy::cast_precision_loss)]
        let load = self.entries.len() as f64 / capacity as f64;
        if load > self.load_factor_threshold {
            self.entries.reserve(capacity);
        }
    }
}
