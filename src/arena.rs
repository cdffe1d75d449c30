//! Block arena: a growing, doubling-block bump allocator (§3, §4 "Block
//! arena"). Owns per-request scratch memory and is released in bulk at
//! request end.
//!
//! Grounded on the teacher's `runtime::buffer::BufferPool`: a flat `Vec<u8>`
//! per block plus a free-list, generalized from fixed-size buffers to a
//! doubling-block bump allocator with a per-thread block cache.

use std::cell::RefCell;

/// Smallest block size a fresh arena starts with.
const MIN_BLOCK_CAPACITY: usize = 4 * 1024;

/// Default cap, in bytes, on the per-thread free-block list (§5 "Per-thread
/// free-block list caps the number of retained arena blocks by total size").
const DEFAULT_FREE_LIST_CAP: usize = 64 * 1024;

thread_local! {
    static FREE_BLOCKS: RefCell<FreeBlockList> = RefCell::new(FreeBlockList::new(DEFAULT_FREE_LIST_CAP));
}

struct FreeBlockList {
    blocks: Vec<Vec<u8>>,
    cap_bytes: usize,
    total_bytes: usize,
}

impl FreeBlockList {
    fn new(cap_bytes: usize) -> Self {
        FreeBlockList {
            blocks: Vec::new(),
            cap_bytes,
            total_bytes: 0,
        }
    }

    fn take(&mut self, min_capacity: usize) -> Option<Vec<u8>> {
        let idx = self.blocks.iter().position(|b| b.capacity() >= min_capacity)?;
        let block = self.blocks.swap_remove(idx);
        self.total_bytes -= block.capacity();
        Some(block)
    }

    fn give(&mut self, mut block: Vec<u8>) {
        block.clear();
        if self.total_bytes + block.capacity() > self.cap_bytes {
            return;
        }
        self.total_bytes += block.capacity();
        self.blocks.push(block);
    }
}

struct Block {
    data: Vec<u8>,
    /// Bump offset into `data`; bytes [0, offset) are allocated.
    offset: usize,
}

impl Block {
    fn with_capacity(capacity: usize) -> Self {
        let data = FREE_BLOCKS
            .with(|f| f.borrow_mut().take(capacity))
            .unwrap_or_else(|| Vec::with_capacity(capacity));
        Block { data, offset: 0 }
    }

    fn capacity(&self) -> usize {
        self.data.capacity()
    }

    fn remaining(&self) -> usize {
        self.capacity() - self.offset
    }
}

/// A growing bump allocator handing out byte slices with last-allocation
/// free/resize, released in bulk via `free_all` (§3 "Block arena").
pub struct Arena {
    /// Oldest block is at index 0, kept for the lifetime of the arena;
    /// later blocks are released back to the free-list on `free_all`.
    blocks: Vec<Block>,
    /// Current active block, always `blocks.len() - 1`.
    next_block_capacity: usize,
    /// Offset of the last allocation within the active block, so `free_last`
    /// can roll it back; `None` if nothing has been allocated from the
    /// active block yet.
    last_alloc: Option<(usize, usize)>,
    high_water: usize,
}

impl Arena {
    pub fn new() -> Self {
        Arena {
            blocks: vec![Block::with_capacity(MIN_BLOCK_CAPACITY)],
            next_block_capacity: MIN_BLOCK_CAPACITY * 2,
            last_alloc: None,
            high_water: 0,
        }
    }

    fn current(&mut self) -> &mut Block {
        self.blocks.last_mut().expect("arena always has a block")
    }

    /// Allocate `len` zero-initialized bytes, 8-byte aligned within the
    /// block. Returns a stable index identifying the allocation's block and
    /// offset, since Rust cannot hand back a long-lived `&mut [u8]` slice
    /// from inside a `Vec<Block>` without self-referential lifetimes; callers
    /// index back into the arena via [`Arena::get_mut`].
    pub fn alloc(&mut self, len: usize) -> AllocHandle {
        const ALIGN: usize = 8;
        let block_idx = self.blocks.len() - 1;
        let block = &mut self.blocks[block_idx];
        let aligned = (block.offset + ALIGN - 1) & !(ALIGN - 1);

        if aligned + len > block.capacity() {
            self.grow_for(len);
            let block_idx = self.blocks.len() - 1;
            let block = &mut self.blocks[block_idx];
            let start = 0;
            block.data.resize(len, 0);
            block.offset = len;
            self.last_alloc = Some((block_idx, start));
            self.high_water = self.high_water.max(self.used_bytes());
            return AllocHandle {
                block: block_idx,
                start,
                len,
            };
        }

        if block.data.len() < aligned + len {
            block.data.resize(aligned + len, 0);
        }
        block.offset = aligned + len;
        self.last_alloc = Some((block_idx, aligned));
        self.high_water = self.high_water.max(self.used_bytes());
        AllocHandle {
            block: block_idx,
            start: aligned,
            len,
        }
    }

    fn grow_for(&mut self, requested: usize) {
        let capacity = self.next_block_capacity.max(requested);
        self.blocks.push(Block::with_capacity(capacity));
        self.next_block_capacity = capacity * 2;
    }

    /// Resize the most recent allocation in place when it is still the last
    /// thing allocated and the block has room; otherwise a fresh allocation
    /// is made and the handle changes.
    pub fn realloc_last(&mut self, handle: AllocHandle, new_len: usize) -> AllocHandle {
        if let Some((block_idx, start)) = self.last_alloc {
            if block_idx == handle.block && start == handle.start {
                let block = &mut self.blocks[block_idx];
                if start + new_len <= block.capacity() {
                    block.data.resize(start + new_len, 0);
                    block.offset = start + new_len;
                    self.high_water = self.high_water.max(self.used_bytes());
                    return AllocHandle {
                        block: block_idx,
                        start,
                        len: new_len,
                    };
                }
            }
        }
        self.alloc(new_len)
    }

    /// Free the most recent allocation, rolling the block offset back.
    /// A no-op if `handle` is not the last allocation.
    pub fn free_last(&mut self, handle: AllocHandle) {
        if self.last_alloc == Some((handle.block, handle.start)) {
            self.blocks[handle.block].offset = handle.start;
            self.last_alloc = None;
        }
    }

    pub fn get(&self, handle: AllocHandle) -> &[u8] {
        &self.blocks[handle.block].data[handle.start..handle.start + handle.len]
    }

    pub fn get_mut(&mut self, handle: AllocHandle) -> &mut [u8] {
        &mut self.blocks[handle.block].data[handle.start..handle.start + handle.len]
    }

    fn used_bytes(&self) -> usize {
        self.blocks.iter().map(|b| b.offset).sum()
    }

    /// High-water mark across this arena's lifetime, used by the server to
    /// decide whether to recycle or rebuild the arena (§3, §4.4 step 6).
    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    /// Reset the arena for reuse: release all blocks but the first back to
    /// the per-thread free-list (up to its cap), reset the first block's
    /// offset to zero.
    pub fn free_all(&mut self) {
        while self.blocks.len() > 1 {
            let block = self.blocks.pop().expect("checked len > 1");
            FREE_BLOCKS.with(|f| f.borrow_mut().give(block.data));
        }
        self.blocks[0].offset = 0;
        self.last_alloc = None;
        self.next_block_capacity = MIN_BLOCK_CAPACITY * 2;
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

/// A stable reference into an [`Arena`]'s allocated bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocHandle {
    block: usize,
    start: usize,
    len: usize,
}

impl AllocHandle {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_requested_len() {
        let mut arena = Arena::new();
        let h = arena.alloc(128);
        assert_eq!(h.len(), 128);
        assert_eq!(arena.get(h).len(), 128);
    }

    #[test]
    fn free_all_reuses_first_block() {
        let mut arena = Arena::new();
        let _ = arena.alloc(64);
        arena.free_all();
        assert_eq!(arena.blocks.len(), 1);
        assert_eq!(arena.used_bytes(), 0);
    }

    #[test]
    fn growth_doubles_next_block_capacity() {
        let mut arena = Arena::new();
        let first_next = arena.next_block_capacity;
        let _ = arena.alloc(MIN_BLOCK_CAPACITY * 4);
        assert!(arena.next_block_capacity > first_next);
        assert_eq!(arena.blocks.len(), 2);
    }

    #[test]
    fn free_last_rolls_back_offset() {
        let mut arena = Arena::new();
        let h1 = arena.alloc(16);
        let before = arena.blocks[0].offset;
        let h2 = arena.alloc(16);
        assert!(arena.blocks[0].offset > before);
        arena.free_last(h2);
        assert_eq!(arena.blocks[0].offset, before);
        // freeing a non-last allocation is a no-op
        arena.free_last(h1);
        assert_eq!(arena.blocks[0].offset, before);
    }

    #[test]
    fn high_water_mark_tracks_peak_usage() {
        let mut arena = Arena::new();
        let _ = arena.alloc(100);
        let peak = arena.high_water_mark();
        arena.free_all();
        assert!(peak >= 100);
        assert_eq!(arena.used_bytes(), 0);
    }

    #[test]
    fn realloc_last_grows_in_place_when_possible() {
        let mut arena = Arena::new();
        let h = arena.alloc(16);
        let h2 = arena.realloc_last(h, 32);
        assert_eq!(h2.block, h.block);
        assert_eq!(h2.start, h.start);
        assert_eq!(h2.len(), 32);
    }
}
