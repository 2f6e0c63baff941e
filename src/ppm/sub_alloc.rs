//! Block sub-allocator for the PPM context trie.
//!
//! The whole arena is one `Vec<u8>` sized to the memory limit. Every block
//! carries an 8-byte header in front of its payload:
//!
//! | offset | field                                    |
//! |--------|------------------------------------------|
//! | 0      | payload size (`u32`)                     |
//! | 4      | physical predecessor size, bit 31 = free |
//!
//! Free blocks additionally store `next`/`prev` free-list links in the first
//! eight payload bytes. Callers address memory by the `u32` offset of the
//! payload; offset 0 is never a valid payload, so it doubles as "none" in
//! records stored inside the arena.

use thiserror::Error;

/// Size of the header in front of every block.
pub const BLOCK_HEADER_SIZE: u32 = 8;

/// Free-list links kept in the payload of free blocks.
const FREE_LINKS_SIZE: u32 = 8;

/// Largest payload size a header can describe.
pub const MAX_BLOCK_SIZE: u32 = u32::MAX >> 2;

const FREE_FLAG: u32 = 1 << 31;

/// Terminates the free list in both directions.
const SENTINEL: u32 = u32::MAX;

/// Returned when no free block can satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("arena exhausted while allocating {requested} bytes")]
pub struct OutOfMemory {
    /// Requested payload size in bytes.
    pub requested: u32,
}

/// One physical block as seen by [`SubAllocator::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header.
    pub offset: u32,
    /// Payload size.
    pub size: u32,
    /// Payload size of the physically preceding block.
    pub prev_size: u32,
    /// Whether the block is on the free list.
    pub is_free: bool,
}

/// Aggregate arena usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub used_blocks: u32,
    pub free_blocks: u32,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub largest_free: u32,
}

/// Fixed-capacity allocator with a first-fit free list and coalescing.
pub struct SubAllocator {
    /// Arena memory.
    heap: Vec<u8>,
    /// Allocation granularity; also the smallest block worth splitting off.
    min_use: u32,
    /// Payload cap for a single block.
    max_block: u32,
    /// Head of the free list.
    first_free: u32,
    /// Tail of the free list.
    last_free: u32,
}

const fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

impl SubAllocator {
    /// Create an allocator over `capacity` bytes whose smallest useful
    /// allocation is `min_alloc` bytes.
    pub fn new(capacity: usize, min_alloc: u32) -> Self {
        Self::with_max_block(capacity, min_alloc, MAX_BLOCK_SIZE)
    }

    /// Like [`new`](Self::new) with a custom single-block payload cap. Arenas
    /// larger than the cap start out as several adjacent free blocks.
    pub fn with_max_block(capacity: usize, min_alloc: u32, max_block: u32) -> Self {
        let min_alloc = align_up(min_alloc.max(1), 2);
        let min_use = align_up(min_alloc + BLOCK_HEADER_SIZE, 8).max(BLOCK_HEADER_SIZE + FREE_LINKS_SIZE);
        let max_block = max_block.clamp(2 * min_use, MAX_BLOCK_SIZE);
        let capacity = capacity.clamp(min_use as usize, (u32::MAX - 7) as usize);

        let mut alloc = Self {
            heap: vec![0u8; capacity],
            min_use,
            max_block,
            first_free: SENTINEL,
            last_free: SENTINEL,
        };
        alloc.reset();
        alloc
    }

    /// Total arena size in bytes.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.heap.len() as u32
    }

    /// Allocation granularity in bytes.
    pub fn granularity(&self) -> u32 {
        self.min_use
    }

    /// Forget every allocation and rebuild the free list.
    ///
    /// The arena becomes one free block, or a run of maximal free blocks when
    /// it exceeds the single-block cap. Runs in time proportional to the
    /// number of initial blocks.
    pub fn reset(&mut self) {
        self.first_free = SENTINEL;
        self.last_free = SENTINEL;

        let total = self.capacity();
        let max_span = self.max_block + BLOCK_HEADER_SIZE;
        let mut offset = 0u32;
        let mut prev_size = 0u32;

        while offset < total {
            let left = total - offset;
            let mut span = left.min(max_span);
            let rest = left - span;
            if rest != 0 && rest < self.min_use {
                // leave room for one minimal trailing block
                span -= self.min_use - rest;
            }

            let size = span - BLOCK_HEADER_SIZE;
            self.write_header(offset, size, prev_size, true);
            self.link_before(SENTINEL, offset);

            prev_size = size;
            offset += span;
        }
        log::trace!("sub-allocator reset: {} bytes", total);
    }

    /// Allocate at least `size` bytes and return the payload offset.
    pub fn alloc(&mut self, size: u32) -> Result<u32, OutOfMemory> {
        let oom = OutOfMemory { requested: size };
        let wanted = size.max(1).div_ceil(self.min_use).checked_mul(self.min_use).ok_or(oom)?;
        if wanted > self.max_block {
            return Err(oom);
        }

        let mut block = self.first_free;
        while block != SENTINEL {
            let block_size = self.block_size(block);
            if block_size >= wanted {
                let left = block_size - wanted;
                if left >= self.min_use {
                    let split = block + BLOCK_HEADER_SIZE + wanted;
                    let mut split_size = left - BLOCK_HEADER_SIZE;
                    // the remainder may now fit together with a capped free neighbour
                    let after = self.successor(block);
                    if after < self.capacity() && self.is_free(after) {
                        let merged = split_size + BLOCK_HEADER_SIZE + self.block_size(after);
                        if merged <= self.max_block {
                            self.unlink(after);
                            split_size = merged;
                        }
                    }
                    self.write_header(split, split_size, wanted, true);
                    self.set_block_size(block, wanted);
                    self.sync_successor(split);
                    self.link_after(SENTINEL, split);
                }
                self.unlink(block);
                self.set_free(block, false);
                return Ok(block + BLOCK_HEADER_SIZE);
            }
            block = self.link_next(block);
        }
        Err(oom)
    }

    /// Return a payload to the free list, merging with free neighbours.
    pub fn dealloc(&mut self, ptr: u32) {
        debug_assert!(ptr >= BLOCK_HEADER_SIZE && ptr < self.capacity());
        let block = ptr - BLOCK_HEADER_SIZE;
        debug_assert!(!self.is_free(block), "double free at {ptr}");

        let end = self.capacity();
        let next = self.successor(block);
        if next != end && self.is_free(next) {
            let merged = self.block_size(block) + BLOCK_HEADER_SIZE + self.block_size(next);
            if merged <= self.max_block {
                self.unlink(next);
                self.set_block_size(block, merged);
                self.sync_successor(block);
            }
        }

        if block != 0 {
            let prev = block - self.prev_size(block) - BLOCK_HEADER_SIZE;
            if self.is_free(prev) {
                let merged = self.block_size(prev) + BLOCK_HEADER_SIZE + self.block_size(block);
                if merged <= self.max_block {
                    self.set_block_size(prev, merged);
                    self.sync_successor(prev);
                    return;
                }
            }
        }

        self.set_free(block, true);
        self.link_after(SENTINEL, block);
    }

    /// Grow an allocation to at least `new_size` bytes.
    ///
    /// Returns `ptr` unchanged when the block is already large enough.
    /// Otherwise a block of `max(prealloc, new_size)` bytes is allocated
    /// (falling back to exactly `new_size`), the old payload is copied over
    /// and the old block is released. On failure the old block is untouched.
    pub fn realloc(&mut self, ptr: u32, new_size: u32, prealloc: u32) -> Result<u32, OutOfMemory> {
        let old_size = self.usable_size(ptr);
        if new_size <= old_size {
            return Ok(ptr);
        }

        let target = prealloc.max(new_size);
        let fresh = match self.alloc(target) {
            Ok(fresh) => fresh,
            Err(_) if target > new_size => self.alloc(new_size)?,
            Err(err) => return Err(err),
        };

        let src = ptr as usize;
        self.heap.copy_within(src..src + old_size as usize, fresh as usize);
        self.dealloc(ptr);
        Ok(fresh)
    }

    /// Payload bytes available behind `ptr`.
    #[inline]
    pub fn usable_size(&self, ptr: u32) -> u32 {
        self.block_size(ptr - BLOCK_HEADER_SIZE)
    }

    /// Walk the arena in physical order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let end = self.capacity();
        let mut offset = 0u32;
        std::iter::from_fn(move || {
            if offset >= end {
                return None;
            }
            let info = BlockInfo {
                offset,
                size: self.block_size(offset),
                prev_size: self.prev_size(offset),
                is_free: self.is_free(offset),
            };
            offset = offset.saturating_add(BLOCK_HEADER_SIZE + info.size);
            Some(info)
        })
    }

    /// Summarize arena usage.
    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(HeapStats::default(), |mut stats, block| {
            if block.is_free {
                stats.free_blocks += 1;
                stats.free_bytes += u64::from(block.size);
                stats.largest_free = stats.largest_free.max(block.size);
            } else {
                stats.used_blocks += 1;
                stats.used_bytes += u64::from(block.size);
            }
            stats
        })
    }

    /// Check the structural invariants of the arena and its free list.
    pub fn validate(&self) -> Result<(), &'static str> {
        let end = u64::from(self.capacity());
        let mut covered = 0u64;
        let mut prev: Option<BlockInfo> = None;
        let mut free_blocks = 0u32;

        for block in self.blocks() {
            let span = u64::from(block.size) + u64::from(BLOCK_HEADER_SIZE);
            if u64::from(block.offset) + span > end {
                return Err("block runs past the end of the arena");
            }
            match prev {
                None if block.prev_size != 0 => return Err("first block has a predecessor size"),
                Some(p) if p.size != block.prev_size => return Err("stale predecessor size"),
                Some(p) if p.is_free && block.is_free && u64::from(p.size) + span <= u64::from(self.max_block) => {
                    return Err("adjacent free blocks were not coalesced");
                }
                _ => {}
            }
            if block.is_free {
                free_blocks += 1;
            }
            covered += span;
            prev = Some(block);
        }
        if covered != end {
            return Err("blocks do not tile the arena");
        }

        let mut listed = 0u32;
        let mut node = self.first_free;
        let mut back = SENTINEL;
        while node != SENTINEL {
            if u64::from(node) >= end || !self.is_free(node) {
                return Err("free list references a used block");
            }
            if self.link_prev(node) != back {
                return Err("free list back link mismatch");
            }
            listed += 1;
            if listed > free_blocks {
                return Err("free list is longer than the number of free blocks");
            }
            back = node;
            node = self.link_next(node);
        }
        if back != self.last_free {
            return Err("free list tail mismatch");
        }
        if listed != free_blocks {
            return Err("free block missing from the free list");
        }
        Ok(())
    }

    // Header fields.

    #[inline]
    fn block_size(&self, block: u32) -> u32 {
        self.read_u32(block)
    }

    #[inline]
    fn set_block_size(&mut self, block: u32, size: u32) {
        self.write_u32(block, size);
    }

    #[inline]
    fn prev_size(&self, block: u32) -> u32 {
        self.read_u32(block + 4) & !FREE_FLAG
    }

    #[inline]
    fn is_free(&self, block: u32) -> bool {
        self.read_u32(block + 4) & FREE_FLAG != 0
    }

    fn set_free(&mut self, block: u32, free: bool) {
        let word = self.read_u32(block + 4) & !FREE_FLAG;
        self.write_u32(block + 4, if free { word | FREE_FLAG } else { word });
    }

    fn set_prev_size(&mut self, block: u32, prev_size: u32) {
        let flag = self.read_u32(block + 4) & FREE_FLAG;
        self.write_u32(block + 4, prev_size | flag);
    }

    fn write_header(&mut self, block: u32, size: u32, prev_size: u32, free: bool) {
        self.write_u32(block, size);
        self.write_u32(block + 4, prev_size | if free { FREE_FLAG } else { 0 });
    }

    #[inline]
    fn successor(&self, block: u32) -> u32 {
        block + BLOCK_HEADER_SIZE + self.block_size(block)
    }

    /// Propagate `block`'s size into its physical successor.
    fn sync_successor(&mut self, block: u32) {
        let next = self.successor(block);
        if next < self.capacity() {
            let size = self.block_size(block);
            self.set_prev_size(next, size);
        }
    }

    // Free list.

    fn link_next(&self, node: u32) -> u32 {
        if node == SENTINEL {
            self.first_free
        } else {
            self.read_u32(node + BLOCK_HEADER_SIZE)
        }
    }

    fn link_prev(&self, node: u32) -> u32 {
        if node == SENTINEL {
            self.last_free
        } else {
            self.read_u32(node + BLOCK_HEADER_SIZE + 4)
        }
    }

    fn set_link_next(&mut self, node: u32, next: u32) {
        if node == SENTINEL {
            self.first_free = next;
        } else {
            self.write_u32(node + BLOCK_HEADER_SIZE, next);
        }
    }

    fn set_link_prev(&mut self, node: u32, prev: u32) {
        if node == SENTINEL {
            self.last_free = prev;
        } else {
            self.write_u32(node + BLOCK_HEADER_SIZE + 4, prev);
        }
    }

    fn link_after(&mut self, anchor: u32, block: u32) {
        let next = self.link_next(anchor);
        self.set_link_next(block, next);
        self.set_link_prev(block, anchor);
        self.set_link_prev(next, block);
        self.set_link_next(anchor, block);
    }

    fn link_before(&mut self, anchor: u32, block: u32) {
        let prev = self.link_prev(anchor);
        self.link_after(prev, block);
    }

    fn unlink(&mut self, block: u32) {
        let next = self.link_next(block);
        let prev = self.link_prev(block);
        self.set_link_prev(next, prev);
        self.set_link_next(prev, next);
    }

    // Raw access.

    /// Read a byte from the arena.
    #[inline]
    pub fn read_u8(&self, offset: u32) -> u8 {
        self.heap[offset as usize]
    }

    /// Write a byte to the arena.
    #[inline]
    pub fn write_u8(&mut self, offset: u32, val: u8) {
        self.heap[offset as usize] = val;
    }

    /// Read a little-endian u16 from the arena.
    #[inline]
    pub fn read_u16(&self, offset: u32) -> u16 {
        let at = offset as usize;
        u16::from_le_bytes([self.heap[at], self.heap[at + 1]])
    }

    /// Write a little-endian u16 to the arena.
    #[inline]
    pub fn write_u16(&mut self, offset: u32, val: u16) {
        let at = offset as usize;
        self.heap[at..at + 2].copy_from_slice(&val.to_le_bytes());
    }

    /// Read a little-endian u32 from the arena.
    #[inline]
    pub fn read_u32(&self, offset: u32) -> u32 {
        let at = offset as usize;
        u32::from_le_bytes([self.heap[at], self.heap[at + 1], self.heap[at + 2], self.heap[at + 3]])
    }

    /// Write a little-endian u32 to the arena.
    #[inline]
    pub fn write_u32(&mut self, offset: u32, val: u32) {
        let at = offset as usize;
        self.heap[at..at + 4].copy_from_slice(&val.to_le_bytes());
    }

    /// Zero `len` bytes starting at `offset`.
    pub fn zero(&mut self, offset: u32, len: u32) {
        let at = offset as usize;
        self.heap[at..at + len as usize].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(capacity: usize) -> SubAllocator {
        SubAllocator::new(capacity, 16)
    }

    #[test]
    fn test_fresh_arena_is_one_free_block() {
        let alloc = arena(4096);
        let blocks: Vec<_> = alloc.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_free);
        assert_eq!(blocks[0].size, 4096 - BLOCK_HEADER_SIZE);
        assert_eq!(alloc.validate(), Ok(()));
    }

    #[test]
    fn test_granularity_covers_header() {
        let alloc = arena(4096);
        assert_eq!(alloc.granularity(), 24);
        let tiny = SubAllocator::new(4096, 1);
        assert_eq!(tiny.granularity(), 16);
    }

    #[test]
    fn test_alloc_rounds_and_splits() {
        let mut alloc = arena(4096);
        let a = alloc.alloc(10).unwrap();
        assert_eq!(a, BLOCK_HEADER_SIZE);
        assert_eq!(alloc.usable_size(a), 24);

        let b = alloc.alloc(25).unwrap();
        assert_eq!(alloc.usable_size(b), 48);
        assert_eq!(b, a + 24 + BLOCK_HEADER_SIZE);

        let stats = alloc.stats();
        assert_eq!(stats.used_blocks, 2);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(alloc.validate(), Ok(()));
    }

    #[test]
    fn test_exhaustion_reports_out_of_memory() {
        let mut alloc = arena(256);
        let mut live = Vec::new();
        loop {
            match alloc.alloc(16) {
                Ok(ptr) => live.push(ptr),
                Err(err) => {
                    assert_eq!(err, OutOfMemory { requested: 16 });
                    break;
                }
            }
        }
        assert!(!live.is_empty());
        assert_eq!(alloc.validate(), Ok(()));
        assert!(alloc.alloc(1 << 20).is_err());
    }

    #[test]
    fn test_dealloc_coalesces_both_sides() {
        let mut alloc = arena(4096);
        let a = alloc.alloc(16).unwrap();
        let b = alloc.alloc(16).unwrap();
        let c = alloc.alloc(16).unwrap();
        let _guard = alloc.alloc(16).unwrap();

        alloc.dealloc(a);
        alloc.dealloc(c);
        assert_eq!(alloc.validate(), Ok(()));
        assert_eq!(alloc.stats().free_blocks, 3);

        // freeing the middle block merges a, b and c into one
        alloc.dealloc(b);
        assert_eq!(alloc.validate(), Ok(()));
        let stats = alloc.stats();
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(alloc.blocks().next().map(|blk| blk.size), Some(3 * 24 + 2 * BLOCK_HEADER_SIZE));
    }

    #[test]
    fn test_dealloc_all_restores_single_block() {
        let mut alloc = arena(4096);
        let ptrs: Vec<u32> = (1..20).map(|n| alloc.alloc(n * 7).unwrap()).collect();
        for (i, ptr) in ptrs.iter().enumerate() {
            if i % 2 == 0 {
                alloc.dealloc(*ptr);
            }
        }
        for (i, ptr) in ptrs.iter().enumerate() {
            if i % 2 == 1 {
                alloc.dealloc(*ptr);
            }
        }
        assert_eq!(alloc.validate(), Ok(()));
        let blocks: Vec<_> = alloc.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_free);
    }

    #[test]
    fn test_realloc_in_place_when_large_enough() {
        let mut alloc = arena(4096);
        let a = alloc.alloc(16).unwrap();
        assert_eq!(alloc.realloc(a, 20, 64).unwrap(), a);
        assert_eq!(alloc.realloc(a, 24, 0).unwrap(), a);
    }

    #[test]
    fn test_realloc_moves_and_preserves_payload() {
        let mut alloc = arena(4096);
        let a = alloc.alloc(16).unwrap();
        let _pin = alloc.alloc(16).unwrap();
        for i in 0..24 {
            alloc.write_u8(a + i, i as u8 + 1);
        }

        let moved = alloc.realloc(a, 40, 96).unwrap();
        assert_ne!(moved, a);
        assert!(alloc.usable_size(moved) >= 96);
        for i in 0..24 {
            assert_eq!(alloc.read_u8(moved + i), i as u8 + 1);
        }
        assert_eq!(alloc.validate(), Ok(()));
    }

    #[test]
    fn test_realloc_falls_back_to_exact_size() {
        let mut alloc = arena(160);
        let a = alloc.alloc(16).unwrap();
        // the prealloc hint cannot fit, the exact request can
        let moved = alloc.realloc(a, 40, 4096).unwrap();
        assert_eq!(alloc.usable_size(moved), 48);
        assert_eq!(alloc.validate(), Ok(()));
    }

    #[test]
    fn test_realloc_failure_keeps_old_block() {
        let mut alloc = arena(128);
        let a = alloc.alloc(16).unwrap();
        alloc.write_u32(a, 0xDEAD_BEEF);
        assert!(alloc.realloc(a, 4096, 0).is_err());
        assert_eq!(alloc.read_u32(a), 0xDEAD_BEEF);
        assert_eq!(alloc.validate(), Ok(()));
    }

    #[test]
    fn test_reset_forgets_allocations() {
        let mut alloc = arena(2048);
        while alloc.alloc(40).is_ok() {}
        alloc.reset();
        assert_eq!(alloc.validate(), Ok(()));
        assert_eq!(alloc.stats().used_blocks, 0);
        assert!(alloc.alloc(1024).is_ok());
    }

    #[test]
    fn test_large_arena_starts_as_several_blocks() {
        let alloc = SubAllocator::with_max_block(10_000, 16, 1_000);
        let blocks: Vec<_> = alloc.blocks().collect();
        assert!(blocks.len() > 1);
        assert!(blocks.iter().all(|b| b.is_free && b.size <= 1_000));
        assert_eq!(alloc.validate(), Ok(()));
    }

    #[test]
    fn test_split_remainder_joins_free_neighbour() {
        // 400-byte block followed by a 184-byte block
        let mut alloc = SubAllocator::with_max_block(600, 16, 400);
        assert_eq!(alloc.stats().free_blocks, 2);

        let a = alloc.alloc(300).unwrap();
        assert_eq!(alloc.usable_size(a), 312);
        let blocks: Vec<_> = alloc.blocks().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].size, 80 + BLOCK_HEADER_SIZE + 184);
        assert_eq!(alloc.validate(), Ok(()));
    }

    #[test]
    fn test_block_cap_limits_merging() {
        let mut alloc = SubAllocator::with_max_block(4_000, 16, 500);
        let ptrs: Vec<u32> = std::iter::from_fn(|| alloc.alloc(100).ok()).collect();
        for ptr in ptrs {
            alloc.dealloc(ptr);
        }
        assert_eq!(alloc.validate(), Ok(()));
        assert!(alloc.blocks().all(|b| b.size <= 500));
        assert!(alloc.alloc(600).is_err());
    }
}
