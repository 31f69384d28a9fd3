//! Configuration and statistics for the collector singleton.
//!
//! The five tunables below are read once, at `Collector` construction, and
//! never revisited — matching the original's "configuration keys consumed on
//! startup" contract.

/// Configuration for the garbage collector, read once on startup.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// `gc.msg_loop_sleep_ms` — worker wait timeout between queue drains.
    pub msg_loop_sleep_ms: u64,
    /// `gc.mem_blocks_pool.initial_size` — initial count of vertex records
    /// per pool chunk.
    pub mem_blocks_pool_initial_size: u32,
    /// `gc.mem_blocks_pool.growing_factor` — multiplier applied to
    /// subsequent pool chunks.
    pub mem_blocks_pool_growing_factor: f64,
    /// `gc.sptr_objects_hash_table.initial_size_log2` — initial bucket
    /// count of the slot table, expressed as a power of two.
    pub sptr_objects_hash_table_initial_size_log2: u32,
    /// `gc.sptr_objects_hash_table.load_factor_threshold` — rehash
    /// threshold for the slot table.
    pub sptr_objects_hash_table_load_factor_threshold: f64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            msg_loop_sleep_ms: 100,
            mem_blocks_pool_initial_size: 128,
            mem_blocks_pool_growing_factor: 1.0,
            sptr_objects_hash_table_initial_size_log2: 8,
            sptr_objects_hash_table_load_factor_threshold: 0.7,
        }
    }
}

/// Cumulative statistics reported by a running collector. Not part of the
/// original specification; kept so callers have something to observe
/// without reaching into the digraph.
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    /// Number of backward-sweep reclamations that found at least one
    /// candidate vertex with no root edge.
    pub collections_started: usize,
    /// Number of backward sweeps that completed without the worker
    /// observing a fatal error.
    pub collections_completed: usize,
    /// Total vertices destroyed across the collector's lifetime.
    pub vertices_freed: usize,
    /// Total bytes released back to the host allocator via free callbacks.
    pub bytes_freed: usize,
    /// Total bytes allocated through `alloc_and_register`.
    pub bytes_allocated: usize,
    /// Wall-clock time spent applying messages and running the backward
    /// sweep, cumulative.
    pub total_collection_time: std::time::Duration,
}
