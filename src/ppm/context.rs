//! Context and symbol records stored in the sub-allocator arena.
//!
//! A context is a 12-byte record:
//!
//! | offset | field                                  |
//! |--------|----------------------------------------|
//! | 0      | symbol array (`u32` payload offset)    |
//! | 4      | suffix context, 0 if unknown           |
//! | 8      | total frequency incl. escape (`u16`)   |
//! | 10     | symbol count (`u16`)                   |
//!
//! Its symbol array holds 8-byte entries: successor context (`u32`),
//! frequency (`u16`), symbol byte and one byte of padding.

use super::sub_alloc::{OutOfMemory, SubAllocator};

pub(crate) const CONTEXT_SIZE: u32 = 12;
pub(crate) const ENTRY_SIZE: u32 = 8;

/// Entries reserved for a freshly allocated context.
const INITIAL_ENTRIES: u32 = 2;

/// A decoded symbol entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub symbol: u8,
    pub freq: u32,
    pub next: u32,
}

/// How many entries to reserve when a context with `count` symbols grows.
///
/// Contexts whose symbols are individually rare are likely to keep growing,
/// so they get headroom in steps that widen with their size.
pub(crate) fn prealloc_entries(count: u32, total_freq: u32) -> u32 {
    let mut entries = count;
    if count * 16 > total_freq {
        entries += match count {
            0..=15 => 6,
            16..=31 => 9,
            32..=63 => 12,
            _ => 15,
        };
    }
    entries.min(256)
}

/// Typed view over the arena.
pub(crate) struct ContextArena {
    alloc: SubAllocator,
    contexts: u64,
}

impl ContextArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            alloc: SubAllocator::new(capacity, ENTRY_SIZE * INITIAL_ENTRIES),
            contexts: 0,
        }
    }

    pub fn reset(&mut self) {
        self.alloc.reset();
        self.contexts = 0;
    }

    pub fn allocator(&self) -> &SubAllocator {
        &self.alloc
    }

    /// Contexts allocated since the last reset.
    pub fn context_count(&self) -> u64 {
        self.contexts
    }

    /// Allocate an empty context with room for `entries` symbols.
    pub fn alloc_context(&mut self, entries: u32) -> Result<u32, OutOfMemory> {
        let ctx = self.alloc.alloc(CONTEXT_SIZE)?;
        let data = match self.alloc.alloc(entries.max(INITIAL_ENTRIES) * ENTRY_SIZE) {
            Ok(data) => data,
            Err(err) => {
                self.alloc.dealloc(ctx);
                return Err(err);
            }
        };
        self.alloc.zero(ctx, CONTEXT_SIZE);
        self.set_data(ctx, data);
        self.contexts += 1;
        Ok(ctx)
    }

    /// Allocate a context holding exactly one symbol.
    pub fn alloc_single(&mut self, symbol: u8, freq: u32) -> Result<u32, OutOfMemory> {
        let ctx = self.alloc_context(INITIAL_ENTRIES)?;
        self.write_entry(self.data(ctx), Entry { symbol, freq, next: 0 });
        self.set_count(ctx, 1);
        self.set_total(ctx, freq + 1);
        Ok(ctx)
    }

    /// Append a zeroed entry, growing the symbol array if needed.
    /// Returns the offset of the new entry.
    pub fn grow(&mut self, ctx: u32) -> Result<u32, OutOfMemory> {
        let count = self.count(ctx);
        let prealloc = prealloc_entries(count, self.total(ctx));
        let data = self.alloc.realloc(self.data(ctx), (count + 1) * ENTRY_SIZE, prealloc * ENTRY_SIZE)?;
        self.set_data(ctx, data);
        self.set_count(ctx, count + 1);
        let at = data + count * ENTRY_SIZE;
        self.alloc.zero(at, ENTRY_SIZE);
        Ok(at)
    }

    #[inline]
    pub fn data(&self, ctx: u32) -> u32 {
        self.alloc.read_u32(ctx)
    }

    #[inline]
    fn set_data(&mut self, ctx: u32, data: u32) {
        self.alloc.write_u32(ctx, data);
    }

    #[inline]
    pub fn suffix(&self, ctx: u32) -> u32 {
        self.alloc.read_u32(ctx + 4)
    }

    #[inline]
    pub fn set_suffix(&mut self, ctx: u32, suffix: u32) {
        self.alloc.write_u32(ctx + 4, suffix);
    }

    #[inline]
    pub fn total(&self, ctx: u32) -> u32 {
        u32::from(self.alloc.read_u16(ctx + 8))
    }

    #[inline]
    pub fn set_total(&mut self, ctx: u32, total: u32) {
        debug_assert!(total <= u32::from(u16::MAX));
        self.alloc.write_u16(ctx + 8, total as u16);
    }

    #[inline]
    pub fn count(&self, ctx: u32) -> u32 {
        u32::from(self.alloc.read_u16(ctx + 10))
    }

    #[inline]
    pub fn set_count(&mut self, ctx: u32, count: u32) {
        self.alloc.write_u16(ctx + 10, count as u16);
    }

    /// Offset of entry `index` of `ctx`.
    #[inline]
    pub fn entry(&self, ctx: u32, index: u32) -> u32 {
        self.data(ctx) + index * ENTRY_SIZE
    }

    #[inline]
    pub fn symbol(&self, at: u32) -> u8 {
        self.alloc.read_u8(at + 6)
    }

    #[inline]
    pub fn freq(&self, at: u32) -> u32 {
        u32::from(self.alloc.read_u16(at + 4))
    }

    #[inline]
    pub fn set_freq(&mut self, at: u32, freq: u32) {
        self.alloc.write_u16(at + 4, freq as u16);
    }

    #[inline]
    pub fn next(&self, at: u32) -> u32 {
        self.alloc.read_u32(at)
    }

    #[inline]
    pub fn set_next(&mut self, at: u32, next: u32) {
        self.alloc.write_u32(at, next);
    }

    pub fn read_entry(&self, at: u32) -> Entry {
        Entry {
            symbol: self.symbol(at),
            freq: self.freq(at),
            next: self.next(at),
        }
    }

    pub fn write_entry(&mut self, at: u32, entry: Entry) {
        self.alloc.write_u32(at, entry.next);
        self.alloc.write_u16(at + 4, entry.freq as u16);
        self.alloc.write_u8(at + 6, entry.symbol);
        self.alloc.write_u8(at + 7, 0);
    }

    pub fn swap_entries(&mut self, a: u32, b: u32) {
        let first = self.read_entry(a);
        let second = self.read_entry(b);
        self.write_entry(a, second);
        self.write_entry(b, first);
    }

    /// Index of `symbol` in `ctx`.
    pub fn find(&self, ctx: u32, symbol: u8) -> Option<u32> {
        let data = self.data(ctx);
        (0..self.count(ctx)).find(|&i| self.symbol(data + i * ENTRY_SIZE) == symbol)
    }

    pub fn entries(&self, ctx: u32) -> Vec<Entry> {
        (0..self.count(ctx)).map(|i| self.read_entry(self.entry(ctx, i))).collect()
    }

    /// Overwrite the leading entries of `ctx` and shrink its count to match.
    /// The symbol array keeps its capacity.
    pub fn store_entries(&mut self, ctx: u32, entries: &[Entry]) {
        debug_assert!(entries.len() as u32 <= self.count(ctx));
        for (i, entry) in entries.iter().enumerate() {
            self.write_entry(self.entry(ctx, i as u32), *entry);
        }
        self.set_count(ctx, entries.len() as u32);
    }

    /// Check the frequency bookkeeping of one context.
    pub fn validate_context(&self, ctx: u32, max_total: u32) -> Result<(), &'static str> {
        let count = self.count(ctx);
        if count > 256 {
            return Err("more than 256 symbols in a context");
        }
        let mut seen = [false; 256];
        let mut sum = 0u32;
        for entry in self.entries(ctx) {
            if entry.freq == 0 {
                return Err("zero-frequency symbol");
            }
            if std::mem::replace(&mut seen[entry.symbol as usize], true) {
                return Err("duplicate symbol in a context");
            }
            sum += entry.freq;
        }
        let total = self.total(ctx);
        if count > 0 && total <= sum {
            return Err("no escape mass left");
        }
        if total > max_total {
            return Err("total frequency above the coder limit");
        }
        Ok(())
    }
}
