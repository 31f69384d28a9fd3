//! Growing set of same-block-size pools (component C2).
//!
//! Manages a growing set of [`MemoryPool`] instances, routing allocations to
//! whichever pool currently has room and returning blocks to the pool that
//! owns their address.

use std::collections::{BTreeMap, VecDeque};

use crate::memory_pool::MemoryPool;

/// A dynamically growing collection of fixed-size block pools.
#[derive(Debug)]
pub(crate) struct DynamicMemPool {
    initial_size: u32,
    block_size: usize,
    growing_factor: f64,
    /// Pools keyed by base address, ordered so the owning pool of any
    /// address can be found with a single range query.
    pools: BTreeMap<usize, MemoryPool>,
    /// Base addresses of pools known to have at least one free block.
    available: VecDeque<usize>,
}

impl DynamicMemPool {
    pub(crate) fn new(initial_size: u32, block_size: usize, growing_factor: f64) -> Self {
        assert!(initial_size > 0 && block_size > 0, "cannot start zero-sized");
        assert!(growing_factor > 0.0, "growing factor must be positive");
        Self {
            initial_size,
            block_size,
            growing_factor,
            pools: BTreeMap::new(),
            available: VecDeque::new(),
        }
    }

    /// Serves from the head of the available queue; if that pool turns out
    /// exhausted, pops it and tries the next. Creates a new pool, sized
    /// `initial` for the first chunk or `min(initial * growing_factor,
    /// 2^16)` thereafter, when nothing is available.
    pub(crate) fn get_free_block(&mut self) -> usize {
        while let Some(&addr) = self.available.front() {
            let pool = self
                .pools
                .get_mut(&addr)
                .expect("available queue references a live pool");
            if let Some(block) = pool.get_free_block() {
                return block;
            }
            self.available.pop_front();
        }

        let num_blocks = if self.pools.is_empty() {
            self.initial_size
        } else {
            #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let grown = (f64::from(self.initial_size) * self.growing_factor) as u64;
            u32::try_from(grown.min(u64::from(crate::memory_pool::MAX_BLOCKS))).unwrap_or(crate::memory_pool::MAX_BLOCKS)
        };

        let mut pool = MemoryPool::new(num_blocks, self.block_size);
        let block = pool
            .get_free_block()
            .expect("freshly created pool has a free block");
        let base = pool.base_address();
        self.pools.insert(base, pool);
        self.available.push_back(base);
        block
    }

    /// Finds the owning pool via upper-bound on `addr` and returns the
    /// block to it, re-enqueueing the pool as available if it had been
    /// fully exhausted.
    ///
    /// # Panics
    ///
    /// Panics if `addr` does not belong to any pool tracked here.
    pub(crate) fn return_block(&mut self, addr: usize) {
        let &base = self
            .pools
            .range(..=addr)
            .next_back()
            .map(|(base, _)| base)
            .expect("address does not belong to any tracked pool");

        let pool = self.pools.get_mut(&base).expect("pool vanished from map");
        assert!(pool.contains(addr), "address does not belong to its nearest pool");

        if pool.is_empty() && !self.available.contains(&base) {
            self.available.push_back(base);
        }

        pool.return_block(addr);
    }

    /// Removes and drops every pool that is currently full (all blocks
    /// free), releasing memory back to the host allocator.
    pub(crate) fn shrink(&mut self) {
        let mut retained = VecDeque::with_capacity(self.available.len());
        let mut drop_addrs = Vec::new();

        for addr in self.available.drain(..) {
            let full = self
                .pools
                .get(&addr)
                .is_some_and(MemoryPool::is_full);
            if full {
                drop_addrs.push(addr);
            } else {
                retained.push_back(addr);
            }
        }

        self.available = retained;
        for addr in drop_addrs {
            self.pools.remove(&addr);
        }
    }

    #[cfg(test)]
    pub(crate) fn pool_count(&self) -> usize {
        self.pools.len()
    }
}
