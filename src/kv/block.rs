//! Block and page types for the paged KV allocator.
//!
//! Blocks live in an arena: a `Vec<Page>`, each holding a `Vec<Block>`. A
//! block's stable identity is its `(page index, block index)` handle — never
//! a raw reference — so the owner map and free list can hold handles cheaply
//! without fighting the borrow checker.

use serde::{Deserialize, Serialize};

/// Owner identifiers are a flat string space shared by request ids and
/// hex-encoded prefix fingerprints (see [`crate::prefix_cache`]).
pub type Owner = String;

/// Stable identity of a block: which page, and which slot within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHandle {
    pub page: usize,
    pub block: usize,
}

/// A single fixed-size unit of KV memory.
#[derive(Debug, Clone)]
pub struct Block {
    pub handle: BlockHandle,
    pub size: usize,
    pub owner: Option<Owner>,
    pub pinned: bool,
    pub last_used: u64,
}

impl Block {
    fn new(handle: BlockHandle, size: usize, stamp: u64) -> Self {
        Self {
            handle,
            size,
            owner: None,
            pinned: false,
            last_used: stamp,
        }
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none() && !self.pinned
    }
}

/// A contiguous group of blocks carved from a fixed byte capacity.
#[derive(Debug)]
pub struct Page {
    pub index: usize,
    pub blocks: Vec<Block>,
}

impl Page {
    /// Create a new page of `blocks_per_page` never-owned blocks, all
    /// stamped with `stamp` (the allocator's logical clock at creation time).
    pub fn new(index: usize, blocks_per_page: usize, block_size: usize, stamp: u64) -> Self {
        let blocks = (0..blocks_per_page)
            .map(|block| Block::new(BlockHandle { page: index, block }, block_size, stamp))
            .collect();
        Self { index, blocks }
    }
}
