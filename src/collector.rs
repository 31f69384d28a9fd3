//! The process-wide collector singleton (component C5).
//!
//! Owns the lock-free message queue, the dedicated worker thread, and the
//! termination event the original calls an `Event` (a mutex-guarded flag
//! plus condition variable). The digraph itself is never touched outside
//! the worker thread's closure — nothing about it needs to be `Send` or
//! `Sync`, because it is constructed on, and never leaves, that thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, LazyLock, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::config::{Configuration, Statistics};
use crate::digraph::MemoryDigraph;
use crate::error::{Error, Result};
use crate::finalizer::Finalize;
use crate::messages::Message;
use crate::queue::LockFreeQueue;
use crate::slot_table::SlotId;

/// The global collector instance, started lazily on first use and run for
/// the lifetime of the process. Matches the original's process-wide
/// singleton, double-checked-initialization construction (`LazyLock` gives
/// us that for free).
pub static GC: LazyLock<Collector> = LazyLock::new(Collector::new);

struct TerminationEvent {
    lock: Mutex<bool>,
    condvar: Condvar,
}

impl TerminationEvent {
    fn new() -> Self {
        Self {
            lock: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut terminating = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        *terminating = true;
        self.condvar.notify_all();
    }

    /// Waits up to `timeout` for the signal, returning whether it fired.
    fn wait(&self, timeout: Duration) -> bool {
        let terminating = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if *terminating {
            return true;
        }
        let (terminating, _result) = self
            .condvar
            .wait_timeout(terminating, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        *terminating
    }
}

/// The collector singleton: the seven-operation API the smart-pointer
/// types call, backed by the message queue and the worker thread that
/// drains it into the digraph.
pub struct Collector {
    queue: std::sync::Arc<LockFreeQueue<Message>>,
    termination: std::sync::Arc<TerminationEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: std::sync::Arc<Mutex<Statistics>>,
    worker_error: std::sync::Arc<Mutex<Option<Error>>>,
    shut_down: AtomicBool,
    config: Configuration,
}

impl Collector {
    /// Constructs a collector with default configuration and starts its
    /// worker thread. Exposed for tests that want an independent instance
    /// rather than the process-wide [`GC`]; application code should use
    /// [`GC`] directly through the `Gc`/`GcEdge` constructors.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Configuration::default())
    }

    /// Constructs a collector with the given configuration and starts its
    /// worker thread.
    #[must_use]
    pub fn with_config(config: Configuration) -> Self {
        let queue = std::sync::Arc::new(LockFreeQueue::new());
        let termination = std::sync::Arc::new(TerminationEvent::new());
        let stats = std::sync::Arc::new(Mutex::new(Statistics::default()));
        let worker_error = std::sync::Arc::new(Mutex::new(None));

        let handle = spawn_worker(
            std::sync::Arc::clone(&queue),
            std::sync::Arc::clone(&termination),
            config.clone(),
            std::sync::Arc::clone(&stats),
            std::sync::Arc::clone(&worker_error),
        );

        Self {
            queue,
            termination,
            worker: Mutex::new(Some(handle)),
            stats,
            worker_error,
            shut_down: AtomicBool::new(false),
            config,
        }
    }

    /// The tunables this collector was constructed with.
    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// A snapshot of cumulative collector statistics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the statistics lock was poisoned by a
    /// panicking holder (this never happens in ordinary operation; the
    /// worker thread is the only writer and updates it infallibly).
    pub fn statistics(&self) -> Result<Statistics> {
        Ok(self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Any error the worker thread captured before exiting. Populated once
    /// the worker has panicked; checked by [`Collector::shutdown`] so
    /// failures are not silently lost.
    #[must_use]
    pub fn worker_error(&self) -> Option<String> {
        self.worker_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(ToString::to_string)
    }

    fn enqueue(&self, message: Message) {
        if self.shut_down.load(Ordering::Acquire) {
            warn!("message enqueued after shutdown; dropping it");
            return;
        }
        self.queue.enqueue(message);
    }

    fn record_allocation(&self, bytes: usize) {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).bytes_allocated += bytes;
    }

    /// `new-object(S, B, size, free)`: registers a freshly allocated block
    /// as a new vertex, with `slot` as the first edge into it — a root
    /// unless `container` (the enclosing block's address) is given.
    pub(crate) fn register_new_object(
        &self,
        slot: SlotId,
        container: Option<usize>,
        block: std::ptr::NonNull<u8>,
        layout: std::alloc::Layout,
        drop_fn: crate::vertex::DropFn,
    ) {
        self.enqueue(Message::NewObject { slot, container, block, layout, drop_fn });
    }

    /// `register-slot(S, B)`: registers a slot built from an already-live
    /// block (e.g. a `GcEdge::new` with an initial value).
    pub(crate) fn register_slot(&self, slot: SlotId, container: Option<usize>, pointed: Option<usize>) {
        self.enqueue(Message::RegisterSlot { slot, container, pointed });
    }

    /// `register-slot-copy(S_left, S_right)`: registers a slot created by
    /// copying another handle's current target (`Gc::clone`).
    pub(crate) fn register_slot_copy(&self, slot: SlotId, container: Option<usize>, pointed: Option<usize>) {
        self.enqueue(Message::RegisterSlotCopy { slot, container, pointed });
    }

    /// `update-reference(S, B)`: repoints an already-registered slot.
    pub(crate) fn update_reference(&self, slot: SlotId, pointed: Option<usize>) {
        self.enqueue(Message::UpdateReference { slot, pointed });
    }

    /// `release-reference(S)`: clears a slot's target without unregistering
    /// the slot itself. Used by [`crate::gc_edge::GcEdge::clear`]; unlike
    /// [`Collector::update_reference`], it carries no new target to
    /// resolve, so the worker thread skips that lookup entirely.
    pub(crate) fn release_reference(&self, slot: SlotId) {
        self.enqueue(Message::ReleaseReference { slot });
    }

    /// `abort-construction(S)`: the constructor producing this slot's
    /// object threw after allocation; the block must be freed but the
    /// value's destructor must never run, since the value was never
    /// finished.
    pub(crate) fn unregister_aborted_object(&self, slot: SlotId) {
        self.enqueue(Message::AbortConstruction { slot });
    }

    /// `unregister-slot(S)`: removes a slot's entry entirely (the ordinary
    /// `Gc`/`GcEdge` destructor path).
    pub(crate) fn unregister_slot(&self, slot: SlotId) {
        self.enqueue(Message::UnregisterSlot { slot });
    }

    /// Allocates `value` on the host heap, aligned per `GcBox<T>`'s own
    /// layout (at least 2 bytes, per `spec.md` §6), and enqueues the
    /// `new-object` message that registers it. The allocation itself is
    /// synchronous and can fail; registration never fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the host allocator returns
    /// null.
    pub(crate) fn alloc_and_register<T: Send + Sync>(
        &self,
        value: T,
        slot: SlotId,
        container: Option<usize>,
    ) -> Result<std::ptr::NonNull<crate::gc_box::GcBox<T>>> {
        use crate::gc_box::GcBox;
        use std::alloc::{self, Layout};

        let layout = Layout::new::<GcBox<T>>();
        // SAFETY: `layout` has non-zero size for any `T` (`GcBox<T>` is at
        // least one pointer-sized discriminant-free struct).
        let raw = unsafe { alloc::alloc(layout) }.cast::<GcBox<T>>();
        let block = std::ptr::NonNull::new(raw).ok_or(Error::AllocationFailure { size: layout.size() })?;
        // SAFETY: `block` was just allocated with `GcBox<T>`'s own layout
        // and is not yet observed by any other thread.
        unsafe { block.as_ptr().write(GcBox::new(value)) };

        unsafe fn drop_gcbox<T>(ptr: *mut u8) {
            // SAFETY: called exactly once by the worker thread, on a
            // pointer produced by `alloc_and_register::<T>` above, whose
            // value has not yet been dropped. The block's raw memory is
            // freed separately by `digraph::MemoryDigraph::run_drop` once
            // this returns, using the `Layout` captured at registration.
            unsafe {
                std::ptr::drop_in_place(ptr.cast::<GcBox<T>>());
            }
        }

        self.record_allocation(layout.size());
        self.register_new_object(slot, container, block.cast::<u8>(), layout, drop_gcbox::<T>);
        Ok(block)
    }

    /// Reserves a managed block for `T` and registers its vertex
    /// immediately, before `T` itself has been written — the two-phase
    /// "allocate, then either finish or abort" construction `spec.md` §4.5
    /// describes. The registration is safe to perform on uninitialized
    /// memory because a vertex never reads through `block`; it only stores
    /// the address, layout and free callback.
    ///
    /// The caller must either write a `T` into the returned block and keep
    /// it alive as an ordinary `Gc<T>` (construction finished), or call
    /// [`Collector::unregister_aborted_object`] on `slot` without ever
    /// writing to the block (construction aborted) — see [`crate::Gc::try_new_with`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the host allocator returns
    /// null.
    pub(crate) fn alloc_and_register_pending<T: Send + Sync>(
        &self,
        slot: SlotId,
        container: Option<usize>,
    ) -> Result<std::ptr::NonNull<crate::gc_box::GcBox<T>>> {
        use crate::gc_box::GcBox;
        use std::alloc::{self, Layout};

        let layout = Layout::new::<GcBox<T>>();
        // SAFETY: see `alloc_and_register`.
        let raw = unsafe { alloc::alloc(layout) }.cast::<GcBox<T>>();
        let block = std::ptr::NonNull::new(raw).ok_or(Error::AllocationFailure { size: layout.size() })?;

        unsafe fn drop_gcbox<T>(ptr: *mut u8) {
            // SAFETY: called exactly once by the worker thread, on a
            // pointer produced by `alloc_and_register_pending::<T>` above,
            // whose value — if construction finished rather than aborted —
            // has not yet been dropped.
            unsafe {
                std::ptr::drop_in_place(ptr.cast::<GcBox<T>>());
            }
        }

        self.record_allocation(layout.size());
        self.register_new_object(slot, container, block.cast::<u8>(), layout, drop_gcbox::<T>);
        Ok(block)
    }

    /// Identical to [`Collector::alloc_and_register`], except the
    /// registered free callback runs `T::finalize` before the value's own
    /// destructor, exactly once, the moment the vertex becomes
    /// unreachable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the host allocator returns
    /// null.
    pub(crate) fn alloc_and_register_with_finalizer<T: Send + Sync + Finalize>(
        &self,
        value: T,
        slot: SlotId,
        container: Option<usize>,
    ) -> Result<std::ptr::NonNull<crate::gc_box::GcBox<T>>> {
        use crate::gc_box::GcBox;
        use std::alloc::{self, Layout};

        let layout = Layout::new::<GcBox<T>>();
        // SAFETY: see `alloc_and_register`.
        let raw = unsafe { alloc::alloc(layout) }.cast::<GcBox<T>>();
        let block = std::ptr::NonNull::new(raw).ok_or(Error::AllocationFailure { size: layout.size() })?;
        // SAFETY: see `alloc_and_register`.
        unsafe { block.as_ptr().write(GcBox::new(value)) };

        unsafe fn drop_gcbox_with_finalizer<T: Finalize>(ptr: *mut u8) {
            // SAFETY: called exactly once by the worker thread, on a
            // pointer produced by `alloc_and_register_with_finalizer::<T>`
            // above, whose value has not yet been dropped or finalized.
            // The block's raw memory is freed separately by
            // `digraph::MemoryDigraph::run_drop` once this returns.
            unsafe {
                let gcbox = ptr.cast::<GcBox<T>>();
                (*gcbox).data.finalize();
                std::ptr::drop_in_place(gcbox);
            }
        }

        self.record_allocation(layout.size());
        self.register_new_object(slot, container, block.cast::<u8>(), layout, drop_gcbox_with_finalizer::<T>);
        Ok(block)
    }

    /// Signals the worker to terminate, joins it, and drains every message
    /// still in the queue so finalizers run before returning. Safe to call
    /// from a `Drop` implementation: errors are logged and swallowed, never
    /// propagated.
    ///
    /// Calling this more than once is a no-op past the first call.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.termination.signal();
        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("gc worker thread panicked during shutdown");
            }
        }
        if let Some(message) = self.worker_error() {
            error!(%message, "gc worker reported a fatal error before shutting down");
        }
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("config", &self.config)
            .field("shut_down", &self.shut_down.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(
    queue: std::sync::Arc<LockFreeQueue<Message>>,
    termination: std::sync::Arc<TerminationEvent>,
    config: Configuration,
    stats: std::sync::Arc<Mutex<Statistics>>,
    worker_error: std::sync::Arc<Mutex<Option<Error>>>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("gc-worker".to_owned())
        .spawn(move || {
            debug!("gc worker thread started");
            let mut graph = MemoryDigraph::new(
                config.mem_blocks_pool_initial_size,
                config.mem_blocks_pool_growing_factor,
                config.sptr_objects_hash_table_initial_size_log2,
                config.sptr_objects_hash_table_load_factor_threshold,
            );
            let sleep = Duration::from_millis(config.msg_loop_sleep_ms);
            let mut seen_freed = 0u64;
            let mut seen_freed_bytes = 0u64;

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                loop {
                    let terminating = termination.wait(sleep);
                    let started = std::time::Instant::now();
                    let mut applied = 0usize;
                    while let Some(message) = queue.dequeue() {
                        message.apply(&mut graph);
                        applied += 1;
                    }
                    if applied > 0 {
                        trace!(applied, "gc worker drained queue");
                        let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
                        stats.collections_started += 1;
                        stats.collections_completed += 1;
                        stats.vertices_freed += (graph.vertices_freed - seen_freed) as usize;
                        stats.bytes_freed += (graph.bytes_freed - seen_freed_bytes) as usize;
                        stats.total_collection_time += started.elapsed();
                        seen_freed = graph.vertices_freed;
                        seen_freed_bytes = graph.bytes_freed;
                    }
                    if terminating {
                        break;
                    }
                    graph.shrink();
                }
            }));

            if let Err(panic) = outcome {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "gc worker panicked with a non-string payload".to_owned());
                error!(%message, "gc worker thread failed");
                *worker_error.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Error::WorkerFatal(message));
            }
            debug!("gc worker thread stopped");
        })
        .expect("failed to spawn gc worker thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::Layout;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    static DROPS: AtomicUsize = AtomicUsize::new(0);

    unsafe fn counting_drop(ptr: *mut u8) {
        // SAFETY: only ever registered against `u64`-sized blocks below.
        unsafe { std::ptr::drop_in_place(ptr.cast::<u64>()) };
        DROPS.fetch_add(1, Ordering::SeqCst);
    }

    fn fast_collector() -> Collector {
        let mut config = Configuration::default();
        config.msg_loop_sleep_ms = 5;
        Collector::with_config(config)
    }

    fn wait_for<F: Fn() -> bool>(predicate: F) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(predicate(), "condition did not become true in time");
    }

    #[test]
    fn single_object_round_trip_scenario_s1() {
        DROPS.store(0, Ordering::SeqCst);
        let collector = fast_collector();
        let slot = SlotId::next();
        let layout = Layout::new::<u64>();
        let raw = unsafe { std::alloc::alloc(layout) };
        let block = std::ptr::NonNull::new(raw).unwrap();
        collector.register_new_object(slot, None, block, layout, counting_drop);
        collector.unregister_slot(slot);

        wait_for(|| DROPS.load(Ordering::SeqCst) == 1);
        collector.shutdown();
    }

    #[test]
    fn shutdown_drains_pending_messages() {
        DROPS.store(0, Ordering::SeqCst);
        let collector = fast_collector();
        let slot = SlotId::next();
        let layout = Layout::new::<u64>();
        let raw = unsafe { std::alloc::alloc(layout) };
        let block = std::ptr::NonNull::new(raw).unwrap();
        collector.register_new_object(slot, None, block, layout, counting_drop);
        collector.unregister_slot(slot);
        collector.shutdown();
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn root_kept_alive_observes_no_callback_scenario_s4() {
        DROPS.store(0, Ordering::SeqCst);
        let collector = fast_collector();
        let slot = SlotId::next();
        let layout = Layout::new::<u64>();
        let raw = unsafe { std::alloc::alloc(layout) };
        let block = std::ptr::NonNull::new(raw).unwrap();
        collector.register_new_object(slot, None, block, layout, counting_drop);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(DROPS.load(Ordering::SeqCst), 0, "root never released, object must survive");

        collector.unregister_slot(slot);
        collector.shutdown();
    }

    #[test]
    fn abort_construction_never_runs_the_value_destructor_scenario_s6() {
        DROPS.store(0, Ordering::SeqCst);
        let collector = fast_collector();
        let slot = SlotId::next();
        let layout = Layout::new::<u64>();
        let raw = unsafe { std::alloc::alloc(layout) };
        let block = std::ptr::NonNull::new(raw).unwrap();
        collector.register_new_object(slot, None, block, layout, counting_drop);
        collector.unregister_aborted_object(slot);
        collector.shutdown();
        assert_eq!(DROPS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn statistics_report_freed_vertices() {
        DROPS.store(0, Ordering::SeqCst);
        let collector = fast_collector();
        let slot = SlotId::next();
        let layout = Layout::new::<u64>();
        let raw = unsafe { std::alloc::alloc(layout) };
        let block = std::ptr::NonNull::new(raw).unwrap();
        collector.register_new_object(slot, None, block, layout, counting_drop);
        collector.unregister_slot(slot);
        wait_for(|| collector.statistics().unwrap().vertices_freed >= 1);
        collector.shutdown();
    }
}
