//! Heap representation backing a [`crate::Gc`] handle.

/// The managed block itself: a plain heap allocation holding the user's
/// value. No bookkeeping lives here — reachability state is held entirely
/// by the digraph's [`crate::vertex::Vertex`] record, addressed by this
/// box's own address (the "managed block" of the data model).
pub(crate) struct GcBox<T> {
    pub(crate) data: T,
}

impl<T> GcBox<T> {
    pub(crate) fn new(data: T) -> Self {
        Self { data }
    }
}
