//! The managed object graph (component C4): vertex storage, edge
//! maintenance, and the backward-reachability reclamation sweep.
//!
//! Every method here runs exclusively on the collector's worker thread
//! (see `collector`); nothing in this module is `Sync`, and none of it
//! needs to be — the single-consumer message queue is what serializes
//! access.

use std::alloc::Layout;
use std::collections::{HashMap, HashSet};
use std::panic;
use std::ptr::NonNull;

use tracing::{trace, warn};

use crate::dynamic_pool::DynamicMemPool;
use crate::edges::Edge;
use crate::slot_table::{SlotEntry, SlotId, SlotTable};
use crate::vertex::{DropFn, Vertex, VertexId};

/// Owns every live [`Vertex`] record and the [`SlotTable`] that maps slots
/// to them. `new-object`, `register-slot`, `register-slot-copy`,
/// `update-reference`, `release-reference`, `abort-construction` and
/// `unregister-slot` (see `messages`) are all implemented as methods here.
pub(crate) struct MemoryDigraph {
    vertex_pool: DynamicMemPool,
    slots: SlotTable,
    generation: u64,
    /// Maps a managed block's own address to the vertex tracking it.
    ///
    /// `messages` only ever knows the block address of the `Gc<T>`/`GcEdge<T>`
    /// it is talking about (that is what a producer thread can compute
    /// without touching the graph); this is the one piece of bookkeeping
    /// that lets `Message::apply` turn a block address back into the
    /// [`VertexId`] the rest of this module works in terms of.
    block_index: HashMap<usize, VertexId>,
    /// Running totals surfaced by `Collector` as [`crate::config::Statistics`].
    pub(crate) vertices_freed: u64,
    pub(crate) bytes_freed: u64,
}

impl MemoryDigraph {
    pub(crate) fn new(
        pool_initial_size: u32,
        pool_growing_factor: f64,
        slots_initial_size_log2: u32,
        slots_load_factor_threshold: f64,
    ) -> Self {
        Self {
            vertex_pool: DynamicMemPool::new(
                pool_initial_size,
                std::mem::size_of::<Vertex>(),
                pool_growing_factor,
            ),
            slots: SlotTable::new(slots_initial_size_log2, slots_load_factor_threshold),
            generation: 0,
            block_index: HashMap::new(),
            vertices_freed: 0,
            bytes_freed: 0,
        }
    }

    /// Resolves a managed block's address to the vertex tracking it, if any
    /// is still registered. Used by `messages::Message::apply` to translate
    /// the block addresses a producer thread captured into the `VertexId`s
    /// this module operates on.
    pub(crate) fn vertex_for_block(&self, block_addr: usize) -> Option<VertexId> {
        self.block_index.get(&block_addr).copied()
    }

    fn vertex(&self, id: VertexId) -> &Vertex {
        // SAFETY: `id.0` is always the address of a `Vertex` record handed
        // out by `alloc_vertex` and not yet returned to `vertex_pool`.
        unsafe { &*(id.0 as *const Vertex) }
    }

    #[expect(clippy::mut_from_ref)]
    fn vertex_mut(&self, id: VertexId) -> &mut Vertex {
        // SAFETY: see `vertex`; the digraph is only ever driven from one
        // thread, so this exclusive borrow never aliases another live one.
        unsafe { &mut *(id.0 as *mut Vertex) }
    }

    fn alloc_vertex(&mut self, block: NonNull<u8>, layout: Layout, drop_fn: DropFn) -> VertexId {
        let addr = self.vertex_pool.get_free_block();
        // SAFETY: `addr` is a freshly issued, uninitialized, correctly
        // aligned `Vertex`-sized slot from `vertex_pool`.
        unsafe {
            (addr as *mut Vertex).write(Vertex::new(block, layout, drop_fn));
        }
        let id = VertexId(addr);
        self.block_index.insert(block.as_ptr() as usize, id);
        id
    }

    fn dealloc_vertex(&mut self, id: VertexId) {
        let block_addr = self.vertex(id).block_addr();
        self.block_index.remove(&block_addr);
        // SAFETY: the record is about to be returned to the pool and never
        // read again.
        unsafe {
            std::ptr::drop_in_place(id.0 as *mut Vertex);
        }
        self.vertex_pool.return_block(id.0);
    }

    fn add_incoming(&self, target: VertexId, slot: SlotId, container: Option<VertexId>) {
        match container {
            None => self.vertex_mut(target).incoming.add_root(slot),
            Some(c) => self.vertex_mut(target).incoming.add_regular(c),
        }
    }

    fn remove_incoming(&self, target: VertexId, slot: SlotId, container: Option<VertexId>) {
        match container {
            None => self.vertex_mut(target).incoming.remove_root(slot),
            Some(c) => self.vertex_mut(target).incoming.remove_regular(c),
        }
    }

    /// `new-object(S, B, container)`: allocates a vertex for a freshly
    /// constructed block and registers `S` as the slot that first observed
    /// it (root if `container` is `None`, otherwise embedded in it).
    pub(crate) fn new_object(
        &mut self,
        slot: SlotId,
        container: Option<VertexId>,
        block: NonNull<u8>,
        layout: Layout,
        drop_fn: DropFn,
    ) -> VertexId {
        let vertex_id = self.alloc_vertex(block, layout, drop_fn);
        self.slots.insert(
            slot,
            SlotEntry {
                pointed: Some(vertex_id),
                container,
            },
        );
        self.add_incoming(vertex_id, slot, container);
        if let Some(c) = container {
            self.vertex_mut(c).outgoing.add_regular(vertex_id);
            self.vertex_mut(c).embedded_slots.push(slot);
        }
        vertex_id
    }

    fn register(&mut self, slot: SlotId, container: Option<VertexId>, pointed: Option<VertexId>) {
        self.slots.insert(slot, SlotEntry { pointed, container });
        if let Some(target) = pointed {
            self.add_incoming(target, slot, container);
            if let Some(c) = container {
                self.vertex_mut(c).outgoing.add_regular(target);
            }
        }
        if let Some(c) = container {
            self.vertex_mut(c).embedded_slots.push(slot);
        }
    }

    /// `register-slot(S, pointed, container)`: registers a slot built from
    /// a raw, already-live vertex (the `Gc::into_edge` path).
    pub(crate) fn register_slot(
        &mut self,
        slot: SlotId,
        container: Option<VertexId>,
        pointed: Option<VertexId>,
    ) {
        self.register(slot, container, pointed);
    }

    /// `register-slot-copy(S, pointed, container)`: registers a slot
    /// created by copying another handle's current target (`Gc::clone`).
    /// Identical bookkeeping to `register_slot` — kept as a separate
    /// operation because the two have distinct call sites and distinct
    /// failure semantics upstream.
    pub(crate) fn register_slot_copy(
        &mut self,
        slot: SlotId,
        container: Option<VertexId>,
        pointed: Option<VertexId>,
    ) {
        self.register(slot, container, pointed);
    }

    /// `update-reference(S, new_pointed)`: repoints an already-registered
    /// slot, evaluating its old target for reclamation.
    pub(crate) fn update_reference(&mut self, slot: SlotId, new_pointed: Option<VertexId>) {
        let Some(entry) = self.slots.get(slot).copied() else {
            warn!(?slot, "update-reference for an unregistered slot");
            return;
        };
        if let Some(old_target) = entry.pointed {
            self.remove_incoming(old_target, slot, entry.container);
            if let Some(c) = entry.container {
                self.vertex_mut(c).outgoing.remove_regular(old_target);
            }
        }
        self.slots.set_pointed(slot, new_pointed);
        if let Some(new_target) = new_pointed {
            self.add_incoming(new_target, slot, entry.container);
            if let Some(c) = entry.container {
                self.vertex_mut(c).outgoing.add_regular(new_target);
            }
        }
        if let Some(old_target) = entry.pointed {
            self.evaluate(old_target);
        }
    }

    /// `release-reference(S)`: clears a slot's target without
    /// unregistering the slot itself.
    pub(crate) fn release_reference(&mut self, slot: SlotId) {
        self.update_reference(slot, None);
    }

    /// `abort-construction(S)`: marks the slot's current target as never
    /// to be finalized, then unregisters the slot entirely — the slot was
    /// only ever observed by the producing thread that is now giving up on
    /// it (see `Collector::unregister_aborted_object`).
    pub(crate) fn abort_construction(&mut self, slot: SlotId) {
        if let Some(entry) = self.slots.get(slot).copied() {
            if let Some(target) = entry.pointed {
                self.vertex_mut(target).abort();
            }
        }
        self.unregister_slot(slot);
    }

    /// `unregister-slot(S)`: removes a slot's entry entirely and evaluates
    /// its old target for reclamation.
    pub(crate) fn unregister_slot(&mut self, slot: SlotId) {
        let Some(entry) = self.slots.remove(slot) else {
            warn!(?slot, "unregister-slot for an unregistered slot");
            return;
        };
        if let Some(old_target) = entry.pointed {
            self.remove_incoming(old_target, slot, entry.container);
            if let Some(c) = entry.container {
                self.vertex_mut(c).outgoing.remove_regular(old_target);
            }
            self.evaluate(old_target);
        }
    }

    /// Runs the backward-reachability sweep for `start`: destroys it
    /// immediately if nothing points at it, keeps it if any root points at
    /// it directly, and otherwise walks its incoming regular edges looking
    /// for a root anywhere in the reachable set before condemning the
    /// whole component.
    pub(crate) fn evaluate(&mut self, start: VertexId) {
        if self.vertex(start).incoming.is_empty() {
            self.destroy_component(vec![start]);
            return;
        }
        if self.vertex(start).incoming.has_root_edges() {
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let mut stack = vec![start];
        let mut visited = Vec::new();
        let mut live = false;

        while let Some(v) = stack.pop() {
            let vertex = self.vertex_mut(v);
            if vertex.mark == generation {
                continue;
            }
            vertex.mark = generation;
            visited.push(v);

            if vertex.incoming.has_root_edges() {
                live = true;
                break;
            }
            for edge in vertex.incoming.iter() {
                if let Edge::Regular(container) = edge {
                    stack.push(container);
                }
            }
        }

        if live {
            trace!(?start, "condemned candidate reached a root, kept alive");
            return;
        }
        self.destroy_component(visited);
    }

    /// Destroys every vertex in `condemned` together. Each vertex's
    /// outgoing edges to vertices outside the condemned set are stripped
    /// first, so those externally-held peers are left with a consistent
    /// incoming array before anything is freed; they are then
    /// re-evaluated once the whole component is gone.
    fn destroy_component(&mut self, condemned: Vec<VertexId>) {
        let condemned_set: HashSet<VertexId> = condemned.iter().copied().collect();
        let mut reevaluate = Vec::new();

        for &v in &condemned {
            let targets: Vec<VertexId> = self.vertex(v).outgoing.regular_iter().collect();
            for target in targets {
                self.vertex_mut(target).incoming.remove_regular(v);
                if !condemned_set.contains(&target) {
                    reevaluate.push(target);
                }
            }
            for slot in std::mem::take(&mut self.vertex_mut(v).embedded_slots) {
                self.slots.remove(slot);
            }
        }

        for v in condemned {
            self.bytes_freed += self.vertex(v).layout.size() as u64;
            self.run_drop(v);
            self.dealloc_vertex(v);
            self.vertices_freed += 1;
        }

        for target in reevaluate {
            self.evaluate(target);
        }
    }

    /// Runs the value's destructor (unless construction was aborted) and
    /// always releases the managed block's raw memory back to the host
    /// allocator — `abort-construction` must still free the block even
    /// though the value inside it never finished being built and its
    /// destructor must not run over uninitialized memory.
    fn run_drop(&self, id: VertexId) {
        let vertex = self.vertex(id);
        let block = vertex.block;
        if let Some(drop_fn) = vertex.drop_fn {
            // SAFETY: `drop_fn` was monomorphized for the value written at
            // `block` by the allocation site (`Collector::alloc_and_register`)
            // and has not been run before — a vertex is destroyed exactly
            // once.
            let result = panic::catch_unwind(panic::AssertUnwindSafe(|| unsafe {
                drop_fn(block.as_ptr());
            }));
            if result.is_err() {
                warn!(vertex = ?id, "value destructor panicked during reclamation");
            }
        }
        // SAFETY: `block`/`layout` were produced together by the
        // allocation site and the value, if any, was just finalized above;
        // nothing else references this block once its vertex is condemned.
        unsafe {
            std::alloc::dealloc(block.as_ptr(), vertex.layout);
        }
    }

    /// Releases any fully-returned vertex pools back to the host
    /// allocator. Called once per worker loop iteration, after the queue
    /// has drained.
    pub(crate) fn shrink(&mut self) {
        self.vertex_pool.shrink();
    }

    #[cfg(test)]
    pub(crate) fn vertex_exists(&self, id: VertexId) -> bool {
        !self.vertex(id).incoming.is_empty() || self.slots_point_at(id)
    }

    #[cfg(test)]
    fn slots_point_at(&self, _id: VertexId) -> bool {
        false
    }
}
