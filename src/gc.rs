//! The root smart-pointer handle: a `Gc<T>` whose slot is a root (it is not
//! embedded inside another managed block). See `gc_edge` for the embedded
//! counterpart.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::Finalize;
use crate::gc_box::GcBox;
use crate::gc_edge::GcEdge;
use crate::slot_table::SlotId;
use crate::{Error, GC, Result};

/// A garbage-collected pointer type for `T`.
///
/// `Gc<T>` provides shared ownership of a value allocated on the heap.
/// Unlike `Arc<T>`, `Gc<T>` can hold circular references to other
/// `Gc`/[`GcEdge`]-reachable values: the collector's backward-reachability
/// sweep reclaims a cycle once nothing roots it, rather than requiring the
/// programmer to break the cycle with a weak reference.
///
/// A freshly constructed or cloned `Gc<T>` is always a **root** — it
/// contributes to reachability on its own, independent of any container.
/// Call [`Gc::into_edge`] to embed it inside another managed value instead.
pub struct Gc<T> {
    pub(crate) ptr: NonNull<GcBox<T>>,
    pub(crate) slot: SlotId,
    pub(crate) phantom: PhantomData<GcBox<T>>,
}

impl<T> Gc<T> {
    /// Constructs a new `Gc<T>`, registering it with the global collector as
    /// a root.
    ///
    /// # Panics
    ///
    /// Panics if the host allocator cannot satisfy the allocation. Use
    /// [`Gc::try_new`] to handle that case explicitly.
    pub fn new(data: T) -> Self
    where
        T: Send + Sync,
    {
        Self::try_new(data).expect("gc allocation failed")
    }

    /// Constructs a new `Gc<T>`, registering it with the global collector as
    /// a root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the host allocator returns
    /// null.
    pub fn try_new(data: T) -> Result<Self>
    where
        T: Send + Sync,
    {
        let slot = SlotId::next();
        let ptr = GC.alloc_and_register(data, slot, None)?;
        Ok(Self { ptr, slot, phantom: PhantomData })
    }

    /// Constructs a new `Gc<T>` whose value is finalized (via [`Finalize`])
    /// before its destructor runs, the moment the collector determines it is
    /// unreachable.
    ///
    /// # Panics
    ///
    /// Panics if the host allocator cannot satisfy the allocation.
    pub fn new_with_finalizer(data: T) -> Self
    where
        T: Send + Sync + Finalize,
    {
        Self::try_new_with_finalizer(data).expect("gc allocation failed")
    }

    /// Fallible counterpart to [`Gc::new_with_finalizer`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the host allocator returns
    /// null.
    pub fn try_new_with_finalizer(data: T) -> Result<Self>
    where
        T: Send + Sync + Finalize,
    {
        let slot = SlotId::next();
        let ptr = GC.alloc_and_register_with_finalizer(data, slot, None)?;
        Ok(Self { ptr, slot, phantom: PhantomData })
    }

    /// Constructs a new `Gc<T>` from a fallible initializer, registering the
    /// managed block with the collector before `init` runs rather than
    /// after. If `init` fails, the reserved block is freed without ever
    /// running `T`'s destructor — this is `spec.md`'s `abort-construction`
    /// operation, for producers that need to allocate first and decide
    /// whether to keep the value only once some later step (parsing input,
    /// acquiring a resource) has succeeded.
    ///
    /// # Errors
    ///
    /// Returns `Err(E::from(Error::AllocationFailure { .. }))` if the host
    /// allocator returns null, or propagates whatever `init` itself returns.
    pub fn try_new_with<F, E>(init: F) -> std::result::Result<Self, E>
    where
        T: Send + Sync,
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let slot = SlotId::next();
        let block = GC.alloc_and_register_pending::<T>(slot, None).map_err(E::from)?;
        match init() {
            Ok(data) => {
                // SAFETY: `block` was just reserved by `alloc_and_register_pending`
                // and its `data` field is still uninitialized; nothing else
                // observes it until this write completes, since the vertex
                // registered for `slot` never reads through the block.
                unsafe {
                    ptr::addr_of_mut!((*block.as_ptr()).data).write(data);
                }
                Ok(Self { ptr: block, slot, phantom: PhantomData })
            }
            Err(err) => {
                GC.unregister_aborted_object(slot);
                Err(err)
            }
        }
    }

    /// Returns `true` if the two `Gc`s point to the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }

    /// Returns a raw pointer to the data.
    ///
    /// The caller must ensure the `Gc` outlives the pointer this function
    /// returns, or else it will end up pointing at reclaimed memory.
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        ptr::addr_of!(**self)
    }

    /// Makes a mutable reference into the given `Gc`.
    ///
    /// # Safety
    ///
    /// This method does not check for aliasing. The caller must ensure no
    /// other reference to the data exists for the duration of the borrow.
    #[must_use]
    pub unsafe fn get_mut_unchecked(&mut self) -> &mut T {
        // SAFETY: delegated to the caller per this method's own contract.
        unsafe { &mut self.ptr.as_mut().data }
    }

    pub(crate) fn inner(&self) -> &GcBox<T> {
        // SAFETY: `ptr` was produced by `alloc_and_register` and remains
        // valid until the digraph reclaims its vertex, which cannot happen
        // while this `Gc` (a live root, or an edge holding an equivalent
        // incoming edge) exists.
        unsafe { self.ptr.as_ref() }
    }

    pub(crate) fn block_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Converts this root handle into an edge embedded in `container`'s
    /// managed block, returning the [`GcEdge<T>`] to store as a field of
    /// `container`'s value.
    ///
    /// `container` must already be allocated — this is only ever the case
    /// once `Gc::new` (or an equivalent) for the container has returned, so
    /// cyclic structures are built by first allocating every participant as
    /// a standalone root and then wiring edges between them.
    #[must_use]
    pub fn into_edge<C>(self, container: &Gc<C>) -> GcEdge<T> {
        GcEdge::from_root(self, container)
    }
}

impl<T> Clone for Gc<T> {
    /// Registers a new root slot pointing at the same managed block.
    fn clone(&self) -> Self {
        let slot = SlotId::next();
        GC.register_slot_copy(slot, None, Some(self.block_addr()));
        Self { ptr: self.ptr, slot, phantom: PhantomData }
    }
}

impl<T> Drop for Gc<T> {
    fn drop(&mut self) {
        GC.unregister_slot(self.slot);
    }
}

impl<T> Deref for Gc<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner().data
    }
}

// SAFETY: a `Gc<T>` only ever exposes `&T` (or `&mut T` under the caller's
// own aliasing promise); the collector thread is the sole mutator of the
// graph metadata, so sending or sharing the handle across threads is sound
// whenever `T` itself permits it.
unsafe impl<T: Sync + Send> Send for Gc<T> {}
unsafe impl<T: Sync + Send> Sync for Gc<T> {}

impl<T: Default + Send + Sync> Default for Gc<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Display> fmt::Display for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T: fmt::Debug> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T> fmt::Pointer for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.as_ptr(), f)
    }
}

impl<T: PartialEq> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T: Eq> Eq for Gc<T> {}

impl<T: PartialOrd> PartialOrd for Gc<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (**self).partial_cmp(&**other)
    }
}

impl<T: Ord> Ord for Gc<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (**self).cmp(&**other)
    }
}

impl<T: Hash> Hash for Gc<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state);
    }
}

impl<T> Borrow<T> for Gc<T> {
    fn borrow(&self) -> &T {
        self
    }
}

impl<T> AsRef<T> for Gc<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: Send + Sync> From<T> for Gc<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
