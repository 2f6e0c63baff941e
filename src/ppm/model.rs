//! PPM context model.
//!
//! Contexts form a trie keyed by symbol sequences read oldest-first: the
//! node reached from the root by following `s1 s2 .. sk` is the order-k
//! context for the history `s1 s2 .. sk`, and its entries count the symbols
//! that followed that history. An entry's successor link doubles as the trie
//! edge to the longer sequence.
//!
//! For every byte the model replays the last `k` symbols of its window from
//! the root for `k = window length .. 0`, tries to code the byte in each
//! context found, escapes to the next shorter one on a miss and finally falls
//! back to a static context in which every byte value and the end-of-stream
//! symbol are equiprobable. Afterwards every context that escaped learns the
//! byte and missing contexts are created along the replayed path.
//!
//! Encoding and decoding share one code path: the coder side either supplies
//! the symbol to look for or the cumulative frequency read from the stream.

use log::debug;

use super::context::{ContextArena, Entry, ENTRY_SIZE};
use super::see::{SeeState, EXP_ESCAPE, MAX_BIN_FREQ};
use super::sub_alloc::OutOfMemory;
use crate::coder::{Prob, SymbolDecoder, SymbolEncoder, FREQ_MAX_VALUE};
use crate::config::PpmConfig;
use crate::error::Result;

/// Symbol index of the end-of-stream marker.
pub const END_OF_STREAM: u16 = 256;

/// Frequency beyond which a context is rescaled.
const MAX_FREQ: u32 = 124;

/// Frequency added on every hit in a multi-symbol context.
const FREQ_STEP: u32 = 4;

/// Context totals are rescaled before reaching this.
const MAX_TOTAL_FREQ: u32 = FREQ_MAX_VALUE;

/// "No context" in records and links.
const NIL: u32 = 0;

/// One context visited while coding a symbol.
#[derive(Debug, Clone, Copy)]
struct Find {
    ctx: u32,
    /// First window position replayed to reach this order.
    look_at: usize,
    /// Window symbols consumed before the replay stopped.
    depth: usize,
    /// The whole replay succeeded and `ctx` is the context itself.
    complete: bool,
}

/// Result of offering a symbol to one context.
enum Outcome {
    Found { symbol: u8, freq: u32 },
    Escaped,
    /// Every symbol of the context was already excluded; nothing was coded.
    Skipped,
}

/// What the coder side wants resolved inside a context.
#[derive(Debug, Clone, Copy)]
enum Target {
    Symbol(u16),
    Freq(u32),
}

impl Target {
    #[inline]
    fn hits(self, symbol: u8, cum: u32, freq: u32) -> bool {
        match self {
            Target::Symbol(s) => s == u16::from(symbol),
            Target::Freq(f) => f < cum + freq,
        }
    }
}

trait Side {
    fn target(&mut self, scale: u32) -> Target;
    fn code(&mut self, prob: Prob);
}

struct EncodeSide<'a, E> {
    coder: &'a mut E,
    symbol: u16,
}

impl<E: SymbolEncoder> Side for EncodeSide<'_, E> {
    #[inline]
    fn target(&mut self, _scale: u32) -> Target {
        Target::Symbol(self.symbol)
    }

    #[inline]
    fn code(&mut self, prob: Prob) {
        self.coder.encode(prob);
    }
}

struct DecodeSide<'a, D> {
    coder: &'a mut D,
}

impl<D: SymbolDecoder> Side for DecodeSide<'_, D> {
    #[inline]
    fn target(&mut self, scale: u32) -> Target {
        Target::Freq(self.coder.current_freq(scale))
    }

    #[inline]
    fn code(&mut self, prob: Prob) {
        self.coder.update_range(prob);
    }
}

/// Statistics the matched context passes on to contexts learning the symbol.
#[derive(Debug, Clone, Copy)]
struct Inherit {
    /// Frequency of the symbol where it was found.
    freq: u32,
    /// Symbol count of the context it was found in.
    symbols: u32,
    /// Frequency mass of the other symbols there.
    others: u32,
}

/// Adaptive PPM model.
///
/// Encoder and decoder must be built with the same configuration and fed
/// the same operations in the same order.
pub struct PpmModel {
    heap: ContextArena,
    see: Box<SeeState>,
    max_order: usize,
    /// Order -1 context: every byte value plus end-of-stream.
    static_ctx: u32,
    /// Order 0 context.
    root: u32,
    /// Most recent symbols, oldest first.
    window: Vec<u8>,
    /// Contexts visited for the current symbol, highest order first.
    stack: Vec<Find>,
    excluded: [bool; 256],
    masked: u32,
    /// Escape estimate for a binary context promoted to two symbols.
    init_esc: u32,
    restarts: u64,
    symbols_coded: u64,
}

impl PpmModel {
    /// Build a model for `config`.
    pub fn new(config: &PpmConfig) -> Result<Self> {
        config.validate()?;
        let max_order = config.max_order as usize;
        let mut model = Self {
            heap: ContextArena::new(config.memory_limit),
            see: Box::new(SeeState::new()),
            max_order,
            static_ctx: NIL,
            root: NIL,
            window: Vec::with_capacity(max_order),
            stack: Vec::with_capacity(max_order + 1),
            excluded: [false; 256],
            masked: 0,
            init_esc: 1,
            restarts: 0,
            symbols_coded: 0,
        };
        model.init_model()?;
        Ok(model)
    }

    /// Shorthand for a default configuration with the given order and limit.
    pub fn with_order(max_order: u32, memory_limit: usize) -> Result<Self> {
        Self::new(&PpmConfig::new(max_order, memory_limit))
    }

    /// Maximum context order.
    pub fn max_order(&self) -> u32 {
        self.max_order as u32
    }

    /// Times the model restarted after running out of memory.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Contexts allocated since the last reset, including the two fixed ones.
    pub fn context_count(&self) -> u64 {
        self.heap.context_count()
    }

    /// Arena bytes currently handed out.
    pub fn memory_used(&self) -> u64 {
        self.heap.allocator().stats().used_bytes
    }

    /// Encode one byte.
    pub fn encode<E: SymbolEncoder>(&mut self, coder: &mut E, symbol: u8) {
        let coded = self.code_symbol(&mut EncodeSide {
            coder,
            symbol: u16::from(symbol),
        });
        debug_assert_eq!(coded, u16::from(symbol));
    }

    /// Encode the end-of-stream marker.
    pub fn encode_end_of_stream<E: SymbolEncoder>(&mut self, coder: &mut E) {
        let coded = self.code_symbol(&mut EncodeSide {
            coder,
            symbol: END_OF_STREAM,
        });
        debug_assert_eq!(coded, END_OF_STREAM);
    }

    /// Decode one symbol: a byte value, or [`END_OF_STREAM`].
    pub fn decode<D: SymbolDecoder>(&mut self, coder: &mut D) -> u16 {
        self.code_symbol(&mut DecodeSide { coder })
    }

    /// Forget all statistics and the symbol window.
    ///
    /// Rebuilding cannot fail: the arena is emptied first and the skeleton
    /// (static and root contexts, about 2 KiB) is far below
    /// [`MIN_MEMORY_LIMIT`](crate::config::MIN_MEMORY_LIMIT), which every
    /// model's arena is at least as large as.
    pub fn reset(&mut self) {
        let restored = self.init_model();
        debug_assert!(restored.is_ok());
    }

    fn init_model(&mut self) -> std::result::Result<(), OutOfMemory> {
        self.heap.reset();
        self.see.init();
        self.window.clear();
        self.stack.clear();
        self.begin_symbol();
        self.init_esc = 1;

        let static_ctx = self.heap.alloc_context(256)?;
        let data = self.heap.data(static_ctx);
        for symbol in 0..=255u8 {
            self.heap.write_entry(
                data + u32::from(symbol) * ENTRY_SIZE,
                Entry {
                    symbol,
                    freq: 1,
                    next: NIL,
                },
            );
        }
        self.heap.set_count(static_ctx, 256);
        self.heap.set_total(static_ctx, 257);

        let root = self.heap.alloc_context(0)?;
        self.heap.set_total(root, 1);
        self.heap.set_suffix(root, static_ctx);

        self.static_ctx = static_ctx;
        self.root = root;
        Ok(())
    }

    fn begin_symbol(&mut self) {
        self.excluded = [false; 256];
        self.masked = 0;
        self.stack.clear();
    }

    fn code_symbol<S: Side>(&mut self, side: &mut S) -> u16 {
        self.begin_symbol();
        let top = self.window.len();
        let mut cached = NIL;
        let mut resolved = None;

        for look_at in 0..=top {
            let find = if cached != NIL && cached != self.static_ctx {
                Find {
                    ctx: cached,
                    look_at,
                    depth: top - look_at,
                    complete: true,
                }
            } else {
                self.find_context(look_at)
            };
            cached = NIL;

            if find.complete {
                match self.code_in_context(side, find.ctx, look_at == 0) {
                    Outcome::Found { symbol, freq } => {
                        resolved = Some((find.ctx, symbol, freq));
                        break;
                    }
                    Outcome::Escaped | Outcome::Skipped => cached = self.heap.suffix(find.ctx),
                }
            }
            self.stack.push(find);
        }

        let symbol = match resolved {
            Some((_, symbol, _)) => u16::from(symbol),
            None => self.code_static(side),
        };
        if symbol != END_OF_STREAM {
            let found = resolved.map(|(ctx, _, freq)| (ctx, freq));
            self.learn(symbol as u8, found);
        }
        symbol
    }

    /// Replay `window[look_at..]` from the root.
    fn find_context(&self, look_at: usize) -> Find {
        let mut ctx = self.root;
        for (depth, &symbol) in self.window[look_at..].iter().enumerate() {
            let next = match self.heap.find(ctx, symbol) {
                Some(index) => self.heap.next(self.heap.entry(ctx, index)),
                None => NIL,
            };
            if next == NIL {
                return Find {
                    ctx,
                    look_at,
                    depth,
                    complete: false,
                };
            }
            ctx = next;
        }
        Find {
            ctx,
            look_at,
            depth: self.window.len() - look_at,
            complete: true,
        }
    }

    fn unmasked_count(&self, ctx: u32) -> u32 {
        let count = self.heap.count(ctx);
        if self.masked == 0 {
            return count;
        }
        let data = self.heap.data(ctx);
        (0..count)
            .filter(|&i| !self.excluded[self.heap.symbol(data + i * ENTRY_SIZE) as usize])
            .count() as u32
    }

    fn exclude(&mut self, symbol: u8) {
        if !std::mem::replace(&mut self.excluded[symbol as usize], true) {
            self.masked += 1;
        }
    }

    fn exclude_context(&mut self, ctx: u32) {
        let data = self.heap.data(ctx);
        for i in 0..self.heap.count(ctx) {
            let symbol = self.heap.symbol(data + i * ENTRY_SIZE);
            self.exclude(symbol);
        }
    }

    fn suffix_symbols(&self, ctx: u32) -> u32 {
        match self.heap.suffix(ctx) {
            NIL => 0,
            suffix => self.heap.count(suffix),
        }
    }

    fn code_in_context<S: Side>(&mut self, side: &mut S, ctx: u32, is_top: bool) -> Outcome {
        let unmasked = self.unmasked_count(ctx);
        if unmasked == 0 {
            return Outcome::Skipped;
        }
        if self.heap.count(ctx) == 1 {
            self.code_binary(side, ctx)
        } else if self.masked == 0 {
            self.code_direct(side, ctx, is_top)
        } else {
            self.code_masked(side, ctx, unmasked, is_top)
        }
    }

    /// Single-symbol context: the hit probability comes from SEE.
    fn code_binary<S: Side>(&mut self, side: &mut S, ctx: u32) -> Outcome {
        let at = self.heap.entry(ctx, 0);
        let entry = self.heap.read_entry(at);
        let slot = self.see.bin_slot(entry.freq, self.suffix_symbols(ctx));
        let scale = self.see.bin_scale(slot);

        if side.target(FREQ_MAX_VALUE).hits(entry.symbol, 0, scale) {
            side.code(Prob::new(0, scale, FREQ_MAX_VALUE));
            self.see.bin_hit(slot);
            self.see.set_prev_success(true);
            let freq = if entry.freq < MAX_BIN_FREQ { entry.freq + 1 } else { entry.freq };
            self.heap.set_freq(at, freq);
            let total = self.heap.total(ctx);
            self.heap.set_total(ctx, total + freq - entry.freq);
            Outcome::Found {
                symbol: entry.symbol,
                freq,
            }
        } else {
            side.code(Prob::new(scale, FREQ_MAX_VALUE, FREQ_MAX_VALUE));
            let scale = self.see.bin_miss(slot);
            self.init_esc = u32::from(EXP_ESCAPE[(scale >> 10) as usize]);
            self.see.set_prev_success(false);
            self.exclude(entry.symbol);
            Outcome::Escaped
        }
    }

    /// Nothing excluded yet: code straight from the context's counts.
    fn code_direct<S: Side>(&mut self, side: &mut S, ctx: u32, is_top: bool) -> Outcome {
        let total = self.heap.total(ctx);
        let target = side.target(total);
        let data = self.heap.data(ctx);
        let mut cum = 0;

        for i in 0..self.heap.count(ctx) {
            let at = data + i * ENTRY_SIZE;
            let freq = self.heap.freq(at);
            if target.hits(self.heap.symbol(at), cum, freq) {
                side.code(Prob::new(cum, cum + freq, total));
                self.see.set_prev_success(i == 0 && 2 * freq > total);
                return self.reward(ctx, i, is_top);
            }
            cum += freq;
        }

        side.code(Prob::new(cum, total, total));
        self.see.set_prev_success(false);
        self.exclude_context(ctx);
        Outcome::Escaped
    }

    /// Some symbols are excluded: their counts drop out and the escape
    /// frequency comes from SEE.
    fn code_masked<S: Side>(&mut self, side: &mut S, ctx: u32, unmasked: u32, is_top: bool) -> Outcome {
        let count = self.heap.count(ctx);
        let data = self.heap.data(ctx);
        let slot = self.see.esc_slot(
            count,
            self.heap.total(ctx),
            self.suffix_symbols(ctx),
            unmasked,
            self.masked,
        );
        let escape = self.see.esc_mean(slot);
        let visible: u32 = (0..count)
            .map(|i| data + i * ENTRY_SIZE)
            .filter(|&at| !self.excluded[self.heap.symbol(at) as usize])
            .map(|at| self.heap.freq(at))
            .sum();
        let scale = visible + escape;
        let target = side.target(scale);
        let mut cum = 0;

        for i in 0..count {
            let at = data + i * ENTRY_SIZE;
            let symbol = self.heap.symbol(at);
            if self.excluded[symbol as usize] {
                continue;
            }
            let freq = self.heap.freq(at);
            if target.hits(symbol, cum, freq) {
                side.code(Prob::new(cum, cum + freq, scale));
                self.see.esc_hit(slot);
                return self.reward(ctx, i, is_top);
            }
            cum += freq;
        }

        side.code(Prob::new(visible, scale, scale));
        self.see.esc_miss(slot, scale);
        self.exclude_context(ctx);
        Outcome::Escaped
    }

    /// Order -1: every non-excluded byte and end-of-stream weigh 1.
    fn code_static<S: Side>(&mut self, side: &mut S) -> u16 {
        let visible = 256 - self.masked;
        let scale = visible + 1;
        let (lo, symbol) = match side.target(scale) {
            Target::Symbol(END_OF_STREAM) => (visible, END_OF_STREAM),
            Target::Symbol(symbol) => {
                debug_assert!(!self.excluded[symbol as usize]);
                let lo = self.excluded[..symbol as usize].iter().filter(|&&x| !x).count();
                (lo as u32, symbol)
            }
            Target::Freq(f) if f >= visible => (visible, END_OF_STREAM),
            Target::Freq(f) => {
                let symbol = (0..256u16)
                    .filter(|&s| !self.excluded[s as usize])
                    .nth(f as usize)
                    .unwrap_or(END_OF_STREAM);
                (f, symbol)
            }
        };
        side.code(Prob::new(lo, lo + 1, scale));
        symbol
    }

    /// Credit a hit to entry `index` of `ctx`.
    fn reward(&mut self, ctx: u32, index: u32, is_top: bool) -> Outcome {
        let at = self.heap.entry(ctx, index);
        let symbol = self.heap.symbol(at);
        let freq = self.heap.freq(at) + FREQ_STEP;
        self.heap.set_freq(at, freq);
        let total = self.heap.total(ctx) + FREQ_STEP;
        self.heap.set_total(ctx, total);

        let mut index = index;
        if index > 0 {
            let before = at - ENTRY_SIZE;
            if freq > self.heap.freq(before) {
                self.heap.swap_entries(at, before);
                index -= 1;
            }
        }

        if freq > MAX_FREQ || total >= MAX_TOTAL_FREQ {
            self.rescale(ctx, Some(index), u32::from(!is_top));
            // the hit keeps at least half of its boosted count
            index = self.heap.find(ctx, symbol).unwrap_or(0);
        }
        Outcome::Found {
            symbol,
            freq: self.heap.freq(self.heap.entry(ctx, index)),
        }
    }

    /// Halve all frequencies of `ctx`.
    ///
    /// Entries are re-sorted by descending frequency; the hit entry (if any)
    /// leads its ties. Symbols that drop to zero are removed and their mass
    /// joins the escape estimate. With `adder == 1` nothing drops.
    fn rescale(&mut self, ctx: u32, hit: Option<u32>, adder: u32) {
        let mut entries = self.heap.entries(ctx);
        if let Some(hit) = hit {
            entries[..=hit as usize].rotate_right(1);
        }
        let old_sum: u32 = entries.iter().map(|e| e.freq).sum();
        let mut escape = self.heap.total(ctx).saturating_sub(old_sum).max(1);

        for entry in &mut entries {
            entry.freq = (entry.freq + adder) >> 1;
        }
        entries.sort_by(|a, b| b.freq.cmp(&a.freq));
        entries[0].freq = entries[0].freq.max(1);

        let kept = entries.iter().take_while(|e| e.freq > 0).count();
        escape += entries.len() as u32 - kept as u32;
        entries.truncate(kept);

        let total = if let [only] = entries.as_mut_slice() {
            loop {
                only.freq -= only.freq >> 1;
                escape >>= 1;
                if escape <= 1 {
                    break;
                }
            }
            only.freq + 1
        } else {
            let sum: u32 = entries.iter().map(|e| e.freq).sum();
            sum + escape - (escape >> 1)
        };

        self.heap.store_entries(ctx, &entries);
        self.heap.set_total(ctx, total);
    }

    /// Teach the coded byte to every context that escaped and push it into
    /// the window. Restarts the model when the arena runs out.
    fn learn(&mut self, symbol: u8, found: Option<(u32, u32)>) {
        self.symbols_coded += 1;
        match self.update(symbol, found) {
            Ok(()) => self.push_window(symbol),
            Err(err) => {
                self.restarts += 1;
                debug!(
                    "PPM model restart after {} symbols: {} ({} contexts, {} byte arena)",
                    self.symbols_coded,
                    err,
                    self.heap.context_count(),
                    self.heap.allocator().capacity()
                );
                self.reset();
            }
        }
    }

    fn update(&mut self, symbol: u8, found: Option<(u32, u32)>) -> std::result::Result<(), OutOfMemory> {
        let (matched, freq) = found.unwrap_or((self.static_ctx, 1));
        let inherit = self.inherit(matched, freq);

        let mut suffix = matched;
        for i in (0..self.stack.len()).rev() {
            let find = self.stack[i];
            let ctx = if find.complete {
                self.add_symbol(find.ctx, symbol, inherit)?;
                find.ctx
            } else {
                self.grow_path(find.look_at, symbol, inherit)?
            };
            self.heap.set_suffix(ctx, suffix);
            suffix = ctx;
        }
        Ok(())
    }

    fn inherit(&self, ctx: u32, freq: u32) -> Inherit {
        if ctx == self.static_ctx {
            return Inherit {
                freq: 1,
                symbols: 256,
                others: 256,
            };
        }
        let symbols = self.heap.count(ctx);
        let rest = self.heap.total(ctx).saturating_sub(symbols);
        Inherit {
            freq,
            symbols,
            others: rest.saturating_sub(freq - 1).max(1),
        }
    }

    /// Initial frequency of the lone symbol of a brand-new context.
    fn new_context_freq(inherit: Inherit) -> u32 {
        let freq = if inherit.symbols == 1 {
            inherit.freq
        } else {
            let cf = inherit.freq - 1;
            let s0 = inherit.others;
            if cf <= s0 {
                1 + u32::from(4 * cf > s0)
            } else {
                1 + (cf + s0 - 1) / s0
            }
        };
        freq.clamp(1, MAX_BIN_FREQ)
    }

    /// Add `symbol` to an existing context.
    fn add_symbol(&mut self, ctx: u32, symbol: u8, inherit: Inherit) -> std::result::Result<(), OutOfMemory> {
        if self.heap.find(ctx, symbol).is_some() {
            return Ok(());
        }
        let count = self.heap.count(ctx);
        if count == 0 {
            let freq = Self::new_context_freq(inherit);
            let at = self.heap.grow(ctx)?;
            self.heap.write_entry(at, Entry { symbol, freq, next: NIL });
            self.heap.set_total(ctx, freq + 1);
            return Ok(());
        }

        let at = self.heap.grow(ctx)?;
        let mut total = self.heap.total(ctx);
        if count == 1 {
            let first = self.heap.entry(ctx, 0);
            let freq = self.heap.freq(first);
            let freq = if freq < MAX_FREQ / 4 - 1 { 2 * freq } else { MAX_FREQ - 4 };
            self.heap.set_freq(first, freq);
            total = self.init_esc.max(1) + freq + u32::from(inherit.symbols > 3);
        } else {
            total += u32::from(2 * count < inherit.symbols);
            total += 2 * u32::from(4 * count <= inherit.symbols && total <= 8 * count);
        }

        let cf = 2 * inherit.freq * (total + 6);
        let sf = inherit.others + total;
        let freq = if cf < 6 * sf {
            total += 3;
            1 + u32::from(cf >= sf) + u32::from(cf >= 4 * sf)
        } else {
            let freq = 4 + u32::from(cf >= 9 * sf) + u32::from(cf >= 12 * sf) + u32::from(cf >= 15 * sf);
            total += freq;
            freq
        };

        self.heap.write_entry(at, Entry { symbol, freq, next: NIL });
        self.heap.set_total(ctx, total);
        if total >= MAX_TOTAL_FREQ {
            self.rescale(ctx, None, 1);
        }
        Ok(())
    }

    /// Create the missing contexts on the replay path of `window[look_at..]`
    /// and return the final one, which holds `symbol`.
    fn grow_path(&mut self, look_at: usize, symbol: u8, inherit: Inherit) -> std::result::Result<u32, OutOfMemory> {
        // lower orders may have built part of this path already
        let find = self.find_context(look_at);
        if find.complete {
            self.add_symbol(find.ctx, symbol, inherit)?;
            return Ok(find.ctx);
        }

        let anchor = find.ctx;
        let mut pos = look_at + find.depth;
        let edge_symbol = self.window[pos];
        let mut edge = match self.heap.find(anchor, edge_symbol) {
            Some(index) => self.heap.entry(anchor, index),
            None => {
                let at = self.heap.grow(anchor)?;
                self.heap.write_entry(
                    at,
                    Entry {
                        symbol: edge_symbol,
                        freq: 1,
                        next: NIL,
                    },
                );
                let total = self.heap.total(anchor);
                self.heap.set_total(anchor, total + 1);
                at
            }
        };

        pos += 1;
        while pos < self.window.len() {
            let child = self.heap.alloc_single(self.window[pos], 1)?;
            self.heap.set_next(edge, child);
            edge = self.heap.data(child);
            pos += 1;
        }
        let leaf = self.heap.alloc_single(symbol, Self::new_context_freq(inherit))?;
        self.heap.set_next(edge, leaf);

        if self.heap.total(anchor) >= MAX_TOTAL_FREQ {
            self.rescale(anchor, None, 1);
        }
        Ok(leaf)
    }

    fn push_window(&mut self, symbol: u8) {
        if self.window.len() < self.max_order {
            self.window.push(symbol);
        } else {
            self.window.copy_within(1.., 0);
            if let Some(last) = self.window.last_mut() {
                *last = symbol;
            }
        }
    }

    /// Check every context reachable from the root plus the allocator.
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        self.heap.allocator().validate()?;
        let mut pending = vec![self.root];
        let mut visited = 0u64;
        while let Some(ctx) = pending.pop() {
            visited += 1;
            if visited > self.heap.context_count() {
                return Err("context trie has a cycle");
            }
            self.heap.validate_context(ctx, MAX_TOTAL_FREQ)?;
            pending.extend(self.heap.entries(ctx).iter().map(|e| e.next).filter(|&n| n != NIL));
        }
        Ok(())
    }

    /// Arena footprint of one context holding `entries` symbols.
    #[cfg(test)]
    fn context_footprint(&self, entries: u32) -> u32 {
        let granule = self.heap.allocator().granularity();
        let round = |n: u32| n.div_ceil(granule) * granule + super::sub_alloc::BLOCK_HEADER_SIZE;
        round(super::context::CONTEXT_SIZE) + round(entries.max(2) * ENTRY_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::{ArithDecoder, ArithEncoder};

    /// Encoder that only records the intervals it was handed.
    #[derive(Default)]
    struct Recorder {
        probs: Vec<Prob>,
    }

    impl SymbolEncoder for Recorder {
        fn encode(&mut self, prob: Prob) {
            assert!(prob.is_valid(), "invalid interval {prob:?}");
            self.probs.push(prob);
        }
    }

    fn model(order: u32) -> PpmModel {
        PpmModel::with_order(order, 1 << 20).unwrap()
    }

    fn round_trip(model_order: u32, data: &[u8]) -> Vec<u8> {
        let mut enc_model = model(model_order);
        let mut out = Vec::new();
        let mut enc = ArithEncoder::new(&mut out);
        for &b in data {
            enc_model.encode(&mut enc, b);
        }
        enc_model.encode_end_of_stream(&mut enc);
        enc.flush();
        assert_eq!(enc_model.validate(), Ok(()));

        let mut dec_model = model(model_order);
        let mut dec = ArithDecoder::new(&out);
        let mut decoded = Vec::new();
        loop {
            match dec_model.decode(&mut dec) {
                END_OF_STREAM => break,
                symbol => decoded.push(symbol as u8),
            }
            assert!(decoded.len() <= data.len());
        }
        decoded
    }

    #[test]
    fn test_first_symbol_goes_through_static_context() {
        let mut m = model(3);
        let mut rec = Recorder::default();
        m.encode(&mut rec, b'x');
        // the empty root is skipped, only the order -1 interval is coded
        assert_eq!(rec.probs, vec![Prob::new(u32::from(b'x'), u32::from(b'x') + 1, 257)]);
    }

    #[test]
    fn test_end_of_stream_on_fresh_model() {
        let mut m = model(2);
        let mut rec = Recorder::default();
        m.encode_end_of_stream(&mut rec);
        assert_eq!(rec.probs, vec![Prob::new(256, 257, 257)]);
    }

    #[test]
    fn test_escape_excludes_seen_symbols() {
        let mut m = model(1);
        let mut rec = Recorder::default();
        m.encode(&mut rec, b'a');
        rec.probs.clear();
        m.encode(&mut rec, b'b');
        // order 1 is still missing, the binary root escapes, 'a' is excluded
        assert_eq!(rec.probs.len(), 2);
        assert_eq!(rec.probs[0].hi, FREQ_MAX_VALUE);
        assert_eq!(rec.probs[1], Prob::new(u32::from(b'b') - 1, u32::from(b'b'), 256));
    }

    #[test]
    fn test_window_replay_finds_learned_context() {
        let mut m = model(2);
        let mut rec = Recorder::default();
        for &b in b"abcab" {
            m.encode(&mut rec, b);
        }
        rec.probs.clear();
        // "ab" was followed by 'c' before: one binary hit at order 2
        m.encode(&mut rec, b'c');
        assert_eq!(rec.probs.len(), 1);
        assert_eq!(rec.probs[0].lo, 0);
        assert_eq!(rec.probs[0].scale, FREQ_MAX_VALUE);
    }

    #[test]
    fn test_all_intervals_valid() {
        let mut m = model(4);
        let mut rec = Recorder::default();
        let text = b"the quick brown fox jumps over the lazy dog; the quick brown fox again";
        for _ in 0..40 {
            for &b in text {
                m.encode(&mut rec, b);
            }
        }
        m.encode_end_of_stream(&mut rec);
        assert!(rec.probs.len() > text.len() * 40);
        assert_eq!(m.validate(), Ok(()));
    }

    #[test]
    fn test_round_trip_repetitive_and_binary() {
        let repetitive: Vec<u8> = b"abracadabra ".iter().copied().cycle().take(3000).collect();
        assert_eq!(round_trip(3, &repetitive), repetitive);

        let binary: Vec<u8> = (0..4000u32).map(|i| (i.wrapping_mul(2654435761) >> 24) as u8).collect();
        assert_eq!(round_trip(2, &binary), binary);
    }

    #[test]
    fn test_long_run_rescales() {
        let run = vec![b'z'; 5000];
        assert_eq!(round_trip(1, &run), run);

        let mut m = model(1);
        let mut rec = Recorder::default();
        for &b in &run {
            m.encode(&mut rec, b);
        }
        assert_eq!(m.validate(), Ok(()));
        // order 1 context "z" is binary and saturates at the binary cap
        let zz = m.find_context(0);
        assert!(zz.complete);
        assert_eq!(m.heap.count(zz.ctx), 1);
        assert_eq!(m.heap.freq(m.heap.entry(zz.ctx, 0)), MAX_BIN_FREQ);
    }

    #[test]
    fn test_rescale_halves_and_drops() {
        let mut m = model(2);
        let ctx = m.heap.alloc_context(4).unwrap();
        let entries = [
            Entry { symbol: 1, freq: 1, next: NIL },
            Entry { symbol: 2, freq: 40, next: NIL },
            Entry { symbol: 3, freq: 130, next: NIL },
            Entry { symbol: 4, freq: 9, next: NIL },
        ];
        for entry in entries {
            let at = m.heap.grow(ctx).unwrap();
            m.heap.write_entry(at, entry);
        }
        m.heap.set_total(ctx, 180 + 10);

        m.rescale(ctx, Some(2), 0);
        let after = m.heap.entries(ctx);
        let symbols: Vec<u8> = after.iter().map(|e| e.symbol).collect();
        let freqs: Vec<u32> = after.iter().map(|e| e.freq).collect();
        assert_eq!(symbols, vec![3, 2, 4]);
        assert_eq!(freqs, vec![65, 20, 4]);
        // escape 10 plus the dropped symbol's slot, halved rounding up
        assert_eq!(m.heap.total(ctx), 89 + 6);
        assert_eq!(m.heap.validate_context(ctx, MAX_TOTAL_FREQ), Ok(()));
    }

    #[test]
    fn test_rescale_after_low_frequency_hit_keeps_order() {
        let mut m = model(2);
        let ctx = m.heap.alloc_context(3).unwrap();
        for (symbol, freq) in [(1u8, 100u32), (2, 60), (3, 6)] {
            let at = m.heap.grow(ctx).unwrap();
            m.heap.write_entry(at, Entry { symbol, freq, next: NIL });
        }
        m.heap.set_total(ctx, 176);

        m.rescale(ctx, Some(2), 0);
        let after = m.heap.entries(ctx);
        assert_eq!(after.iter().map(|e| e.symbol).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(after.iter().map(|e| e.freq).collect::<Vec<_>>(), vec![50, 30, 3]);
        assert_eq!(m.heap.validate_context(ctx, MAX_TOTAL_FREQ), Ok(()));
    }

    #[test]
    fn test_reward_reports_hit_after_total_rescale() {
        let mut m = model(2);
        let ctx = m.heap.alloc_context(3).unwrap();
        for (symbol, freq) in [(1u8, 100u32), (2, 90), (3, 6)] {
            let at = m.heap.grow(ctx).unwrap();
            m.heap.write_entry(at, Entry { symbol, freq, next: NIL });
        }
        m.heap.set_total(ctx, MAX_TOTAL_FREQ - 2);

        // the total limit, not the symbol's own count, forces the rescale
        match m.reward(ctx, 2, true) {
            Outcome::Found { symbol, freq } => {
                assert_eq!(symbol, 3);
                assert_eq!(freq, 5);
            }
            _ => panic!("hit not reported"),
        }
        let freqs: Vec<u32> = m.heap.entries(ctx).iter().map(|e| e.freq).collect();
        assert_eq!(freqs, vec![50, 45, 5]);
    }

    #[test]
    fn test_rescale_with_adder_keeps_everything() {
        let mut m = model(2);
        let ctx = m.heap.alloc_context(3).unwrap();
        for (symbol, freq) in [(9u8, 1u32), (8, 3), (7, 2)] {
            let at = m.heap.grow(ctx).unwrap();
            m.heap.write_entry(at, Entry { symbol, freq, next: NIL });
        }
        m.heap.set_total(ctx, 6 + 3);
        m.rescale(ctx, None, 1);
        let after = m.heap.entries(ctx);
        assert_eq!(after.len(), 3);
        // stable among equal frequencies
        assert_eq!(after.iter().map(|e| e.symbol).collect::<Vec<_>>(), vec![8, 9, 7]);
        assert_eq!(m.heap.validate_context(ctx, MAX_TOTAL_FREQ), Ok(()));
    }

    #[test]
    fn test_rescale_to_single_symbol() {
        let mut m = model(2);
        let ctx = m.heap.alloc_context(2).unwrap();
        for (symbol, freq) in [(5u8, 125u32), (6, 1)] {
            let at = m.heap.grow(ctx).unwrap();
            m.heap.write_entry(at, Entry { symbol, freq, next: NIL });
        }
        m.heap.set_total(ctx, 126 + 8);
        m.rescale(ctx, Some(0), 0);
        assert_eq!(m.heap.count(ctx), 1);
        let only = m.heap.read_entry(m.heap.entry(ctx, 0));
        assert_eq!(only.symbol, 5);
        assert_eq!(m.heap.total(ctx), only.freq + 1);
    }

    #[test]
    fn test_exhaustion_restarts_model() {
        let config = PpmConfig::new(4, crate::config::MIN_MEMORY_LIMIT);
        let mut m = PpmModel::new(&config).unwrap();
        let mut rec = Recorder::default();
        let mut state = 12345u32;
        for _ in 0..20_000 {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            m.encode(&mut rec, b'a' + ((state >> 16) % 20) as u8);
        }
        assert!(m.restarts() > 0);
        assert_eq!(m.validate(), Ok(()));
        assert!(u64::from(m.context_footprint(1)) * m.context_count() <= config.memory_limit as u64);
        assert!(m.memory_used() <= config.memory_limit as u64);
        assert_eq!(m.max_order(), 4);
    }

    #[test]
    fn test_skeleton_fits_smallest_arena() {
        let config = PpmConfig::new(32, crate::config::MIN_MEMORY_LIMIT);
        let mut m = PpmModel::new(&config).unwrap();
        m.reset();
        assert_eq!(m.context_count(), 2);
        let skeleton = m.memory_used();
        assert!(skeleton > 0);
        assert!(skeleton * 4 < config.memory_limit as u64, "{skeleton}");
    }

    #[test]
    fn test_reset_matches_fresh_model() {
        let mut used = model(3);
        let mut rec = Recorder::default();
        for &b in b"some history that will be forgotten" {
            used.encode(&mut rec, b);
        }
        used.reset();
        assert_eq!(used.context_count(), 2);

        let mut fresh = model(3);
        let mut a = Recorder::default();
        let mut b = Recorder::default();
        for &byte in b"after reset" {
            used.encode(&mut a, byte);
            fresh.encode(&mut b, byte);
        }
        assert_eq!(a.probs, b.probs);
    }
}
