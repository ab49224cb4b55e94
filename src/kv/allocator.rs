//! Paged KV allocator: a fixed-capacity block pool with reuse and LRU
//! eviction, serving as the memory substrate for attention state.
//!
//! Blocks live in an arena (`Vec<Page>`). A free list of [`BlockHandle`]s
//! tracks which blocks are available; allocation always pops the head,
//! release always pushes the head (stack-like MRU reuse), and page growth
//! or eviction always pushes the tail. See the module docs in
//! [`crate::kv`] for the free-list ordering rationale.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::kv::block::{Block, BlockHandle, Owner, Page};

/// Snapshot of allocator counters, surfaced via `stats()`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    pub total_blocks: usize,
    pub used_blocks: usize,
    pub reused_blocks: u64,
    pub evicted_blocks: u64,
    pub hits: u64,
    pub misses: u64,
}

pub struct PagedKvAllocator {
    page_size: usize,
    block_size: usize,
    max_pages: usize,
    blocks_per_page: usize,

    pages: Vec<Page>,
    free_list: VecDeque<BlockHandle>,
    owners: HashMap<Owner, Vec<BlockHandle>>,

    reused: u64,
    evicted: u64,
    hits: u64,
    misses: u64,

    /// Logical clock, advanced once per operation that stamps a block.
    /// Keeps eviction order deterministic without depending on wall time.
    clock: u64,
}

impl PagedKvAllocator {
    pub fn new(page_size: usize, block_size: usize, max_pages: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(EngineError::InvalidConfig(
                "block_size must be > 0".to_string(),
            ));
        }
        if block_size > page_size {
            return Err(EngineError::InvalidConfig(format!(
                "block_size ({block_size}) cannot exceed page_size ({page_size})"
            )));
        }
        if max_pages < 1 {
            return Err(EngineError::InvalidConfig(
                "max_pages must be >= 1".to_string(),
            ));
        }

        Ok(Self {
            page_size,
            block_size,
            max_pages,
            blocks_per_page: page_size / block_size,
            pages: Vec::new(),
            free_list: VecDeque::new(),
            owners: HashMap::new(),
            reused: 0,
            evicted: 0,
            hits: 0,
            misses: 0,
            clock: 0,
        })
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn block_mut(&mut self, handle: BlockHandle) -> &mut Block {
        &mut self.pages[handle.page].blocks[handle.block]
    }

    fn create_page(&mut self) {
        let stamp = self.tick();
        let index = self.pages.len();
        let page = Page::new(index, self.blocks_per_page, self.block_size, stamp);
        for block in &page.blocks {
            self.free_list.push_back(block.handle);
        }
        debug!(page = index, blocks = self.blocks_per_page, "kv page created");
        self.pages.push(page);
    }

    /// Evict the owned, unpinned block with the smallest `last_used`,
    /// breaking ties by `(page, block)` ascending.
    fn evict_one(&mut self) -> Result<()> {
        let victim = self
            .pages
            .iter()
            .flat_map(|page| page.blocks.iter())
            .filter(|b| b.owner.is_some() && !b.pinned)
            .min_by_key(|b| (b.last_used, b.handle.page, b.handle.block))
            .map(|b| b.handle);

        let Some(handle) = victim else {
            return Err(EngineError::CapacityExhausted(
                "no unpinned owned block available to evict".to_string(),
            ));
        };

        let owner = self.block_mut(handle).owner.take().expect("victim must be owned");
        if let Some(blocks) = self.owners.get_mut(&owner) {
            blocks.retain(|h| *h != handle);
            if blocks.is_empty() {
                self.owners.remove(&owner);
            }
        }

        let stamp = self.tick();
        let block = self.block_mut(handle);
        block.pinned = false;
        block.last_used = stamp;

        self.evicted += 1;
        self.free_list.push_back(handle);
        warn!(?handle, %owner, "kv block evicted under pressure");
        Ok(())
    }

    fn ensure_capacity(&mut self, required: usize) -> Result<()> {
        while self.free_list.len() < required {
            if self.pages.len() < self.max_pages {
                self.create_page();
            } else {
                self.evict_one()?;
            }
        }
        Ok(())
    }

    /// Allocate enough blocks to hold `kv_length` bytes of KV state for
    /// `owner`. A `kv_length` of zero allocates nothing and leaves the
    /// owner map untouched.
    pub fn allocate(
        &mut self,
        owner: impl Into<Owner>,
        kv_length: usize,
        pin: bool,
    ) -> Result<Vec<BlockHandle>> {
        let owner = owner.into();
        let required = kv_length.div_ceil(self.block_size);
        if required == 0 {
            return Ok(Vec::new());
        }

        self.ensure_capacity(required)?;

        let mut allocated = Vec::with_capacity(required);
        for _ in 0..required {
            let handle = self
                .free_list
                .pop_front()
                .expect("ensure_capacity guarantees enough free blocks");
            self.reused += 1;
            let stamp = self.tick();
            let block = self.block_mut(handle);
            block.owner = Some(owner.clone());
            block.pinned = pin;
            block.last_used = stamp;
            allocated.push(handle);
        }

        self.owners
            .entry(owner.clone())
            .or_default()
            .extend(allocated.iter().copied());
        debug!(%owner, blocks = allocated.len(), pinned = pin, "kv blocks allocated");
        Ok(allocated)
    }

    /// Refresh LRU timestamps on every block `owner` holds, and account a
    /// hit or miss depending on whether the owner held any blocks.
    pub fn touch(&mut self, owner: &str) {
        let handles = self.owners.get(owner).cloned().unwrap_or_default();
        if handles.is_empty() {
            self.misses += 1;
            return;
        }
        self.hits += 1;
        let stamp = self.tick();
        for handle in handles {
            self.block_mut(handle).last_used = stamp;
        }
    }

    /// Release every block `owner` holds back to the free list, at the
    /// head, so they are the first candidates reused. A no-op for an
    /// unknown owner.
    pub fn release(&mut self, owner: &str) {
        let Some(handles) = self.owners.remove(owner) else {
            return;
        };
        for handle in handles {
            let stamp = self.tick();
            let block = self.block_mut(handle);
            block.owner = None;
            block.pinned = false;
            block.last_used = stamp;
            self.free_list.push_front(handle);
        }
    }

    pub fn describe_owner(&self, owner: &str) -> Vec<(usize, usize)> {
        self.owners
            .get(owner)
            .map(|blocks| blocks.iter().map(|h| (h.page, h.block)).collect())
            .unwrap_or_default()
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        let total_blocks = self.pages.len() * self.blocks_per_page;
        CacheStats {
            total_blocks,
            used_blocks: total_blocks - self.free_list.len(),
            reused_blocks: self.reused,
            evicted_blocks: self.evicted,
            hits: self.hits,
            misses: self.misses,
        }
    }
}
