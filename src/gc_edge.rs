//! The embedded smart-pointer handle: a slot living inside another managed
//! block rather than on the stack or in a global. See `gc` for the root
//! counterpart.
//!
//! A [`GcEdge<T>`] is how cyclic structures get built: two managed blocks
//! that each hold a `GcEdge` pointing at the other form a cycle the
//! backward-reachability sweep in `digraph` can still reclaim, because
//! neither edge counts as a root. Embed it behind a `Mutex` field (the way
//! this crate's own tests do) to mutate it after construction — `GcEdge`
//! itself does not provide interior mutability, matching `Gc<T>`. Use
//! `Mutex`, not `RefCell`: `Gc::new` requires `T: Send + Sync`, and
//! `RefCell<T>` is never `Sync`.

use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::gc::Gc;
use crate::gc_box::GcBox;
use crate::slot_table::SlotId;
use crate::GC;

/// A garbage-collected reference embedded inside another managed block.
///
/// Unlike [`Gc<T>`], a `GcEdge<T>` may point at nothing (`None`), mirroring
/// `spec.md`'s "a slot ... holds a pointer to one managed block or is
/// null." Its slot is always classified **regular**: it is an edge from
/// its container vertex to whatever it currently points at, never a root.
pub struct GcEdge<T> {
    ptr: Option<NonNull<GcBox<T>>>,
    slot: SlotId,
    phantom: PhantomData<T>,
}

impl<T> GcEdge<T> {
    /// Creates an edge embedded in `container`'s managed block, initially
    /// pointing at nothing.
    ///
    /// `container` must already be allocated (its `Gc::new` must have
    /// returned), since a slot's container is resolved to a vertex at
    /// registration time.
    #[must_use]
    pub fn new_null<C>(container: &Gc<C>) -> Self {
        let slot = SlotId::next();
        GC.register_slot(slot, Some(container.block_addr()), None);
        Self { ptr: None, slot, phantom: PhantomData }
    }

    /// Converts a root `Gc<T>` into an edge embedded in `container`'s
    /// managed block. The root slot backing `root` is unregistered only
    /// after the new regular edge is registered, so the target is never
    /// observed with zero incoming edges in between.
    #[must_use]
    pub fn from_root<C>(root: Gc<T>, container: &Gc<C>) -> Self {
        let target = root.block_addr();
        let old_slot = root.slot;
        let ptr = root.ptr;
        let slot = SlotId::next();
        GC.register_slot(slot, Some(container.block_addr()), Some(target));
        std::mem::forget(root);
        GC.unregister_slot(old_slot);
        Self { ptr: Some(ptr), slot, phantom: PhantomData }
    }

    /// Returns a reference to the pointed-to value, or `None` if this edge
    /// is currently null.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: `self.ptr`, if present, was produced by `alloc_and_register`
        // (via a `Gc<T>`) and remains valid as long as this edge holds an
        // incoming-edge registration on its target, which it does for as
        // long as `self.ptr` is `Some`.
        self.ptr.map(|p| unsafe { &p.as_ref().data })
    }

    /// Returns `true` if this edge currently points at nothing.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Repoints this edge at `value`'s block, consuming the root handle.
    /// The new incoming edge is registered before the old one (on
    /// whichever vertex this edge used to target, and on `value`'s own
    /// former root slot) is removed, for the same reason as
    /// [`GcEdge::from_root`].
    pub fn set(&mut self, value: Gc<T>) {
        let target = value.block_addr();
        let old_root_slot = value.slot;
        let ptr = value.ptr;
        GC.update_reference(self.slot, Some(target));
        std::mem::forget(value);
        GC.unregister_slot(old_root_slot);
        self.ptr = Some(ptr);
    }

    /// Clears this edge so it points at nothing.
    pub fn clear(&mut self) {
        GC.release_reference(self.slot);
        self.ptr = None;
    }
}

impl<T> Drop for GcEdge<T> {
    fn drop(&mut self) {
        GC.unregister_slot(self.slot);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for GcEdge<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcEdge").field("value", &self.get()).finish()
    }
}

// SAFETY: a `GcEdge<T>` only ever exposes `&T`; the collector thread is the
// sole mutator of graph metadata, so sending or sharing the handle across
// threads is sound whenever `T` itself permits it, the same argument as
// `Gc<T>`.
unsafe impl<T: Sync + Send> Send for GcEdge<T> {}
unsafe impl<T: Sync + Send> Sync for GcEdge<T> {}
