//! The seven message variants a producer thread can enqueue, and their
//! application against the digraph (component C4's public entry point from
//! the collector's worker thread).
//!
//! Modeled as a closed tagged union with a single `apply` dispatch rather
//! than a polymorphic message hierarchy, per the design notes in
//! `SPEC_FULL.md` §9: the worker's hot loop should not pay for an indirect
//! call per message.

use std::alloc::Layout;
use std::ptr::NonNull;

use tracing::warn;

use crate::digraph::MemoryDigraph;
use crate::slot_table::SlotId;
use crate::vertex::DropFn;

/// One mutation enqueued by a producer thread (a `Gc<T>`/`GcEdge<T>`
/// constructor, assignment, or destructor) and applied by the collector's
/// worker thread.
///
/// Vertices are identified here by the address of the managed block they
/// track rather than by `VertexId`: a producer thread never touches the
/// digraph, so a block address (computable from a raw pointer it already
/// holds) is the only identity it can supply. `Message::apply` resolves
/// each address through `MemoryDigraph::vertex_for_block` before handing
/// off to the corresponding digraph method.
pub(crate) enum Message {
    NewObject {
        slot: SlotId,
        container: Option<usize>,
        block: NonNull<u8>,
        layout: Layout,
        drop_fn: DropFn,
    },
    RegisterSlot {
        slot: SlotId,
        container: Option<usize>,
        pointed: Option<usize>,
    },
    RegisterSlotCopy {
        slot: SlotId,
        container: Option<usize>,
        pointed: Option<usize>,
    },
    UpdateReference {
        slot: SlotId,
        pointed: Option<usize>,
    },
    ReleaseReference {
        slot: SlotId,
    },
    AbortConstruction {
        slot: SlotId,
    },
    UnregisterSlot {
        slot: SlotId,
    },
}

// SAFETY: a message is built on a producer thread and consumed exactly once,
// on the worker thread, before anything else touches the block it names;
// the `NonNull<u8>` it carries is never read by the producer after this
// point.
unsafe impl Send for Message {}

impl Message {
    /// Applies this message to the graph, resolving every block address it
    /// carries to the vertex that currently tracks it. A reference to a
    /// vertex that no longer resolves (unregistered already, or never
    /// registered) is an invariant violation: logged and treated as `None`
    /// rather than panicking, per `spec.md` §7's release-build policy.
    pub(crate) fn apply(self, graph: &mut MemoryDigraph) {
        match self {
            Message::NewObject {
                slot,
                container,
                block,
                layout,
                drop_fn,
            } => {
                let container_vertex = resolve(graph, container, "new-object container");
                graph.new_object(slot, container_vertex, block, layout, drop_fn);
            }
            Message::RegisterSlot {
                slot,
                container,
                pointed,
            } => {
                let container_vertex = resolve(graph, container, "register-slot container");
                let pointed_vertex = resolve(graph, pointed, "register-slot target");
                graph.register_slot(slot, container_vertex, pointed_vertex);
            }
            Message::RegisterSlotCopy {
                slot,
                container,
                pointed,
            } => {
                let container_vertex = resolve(graph, container, "register-slot-copy container");
                let pointed_vertex = resolve(graph, pointed, "register-slot-copy target");
                graph.register_slot_copy(slot, container_vertex, pointed_vertex);
            }
            Message::UpdateReference { slot, pointed } => {
                let pointed_vertex = resolve(graph, pointed, "update-reference target");
                graph.update_reference(slot, pointed_vertex);
            }
            Message::ReleaseReference { slot } => graph.release_reference(slot),
            Message::AbortConstruction { slot } => graph.abort_construction(slot),
            Message::UnregisterSlot { slot } => graph.unregister_slot(slot),
        }
    }
}

/// Resolves an optional block address to its vertex, logging and falling
/// back to `None` (treating the edge as absent) if the block is no longer
/// tracked — the release-build half of `spec.md` §7's invariant-violation
/// policy. A present-but-unresolvable address should not happen given the
/// single-producer-per-slot ordering assumption documented in
/// `SPEC_FULL.md` §0; if it does, this is where it surfaces.
fn resolve(graph: &MemoryDigraph, block: Option<usize>, what: &str) -> Option<crate::vertex::VertexId> {
    let addr = block?;
    let resolved = graph.vertex_for_block(addr);
    if resolved.is_none() {
        warn!(address = addr, "{what} references a block with no live vertex");
    }
    resolved
}
