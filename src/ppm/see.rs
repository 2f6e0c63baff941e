//! Secondary symbol estimation.
//!
//! Escape probabilities are poor when read straight from a context's counts,
//! so they are looked up in small adaptive tables keyed by cheap features of
//! the context instead. Two tables exist:
//!
//! - binary scales for contexts holding a single symbol, indexed by that
//!   symbol's frequency and the suffix context's size;
//! - escape estimators for masked multi-symbol contexts, indexed by how many
//!   symbols are still possible and a few shape bits.

use crate::coder::FREQ_MAX_VALUE;

/// Adaptation period of the escape estimators.
const PERIOD_BITS: u8 = 7;

/// Step added to a binary scale on every hit.
pub(crate) const INTERVAL: u32 = 1 << PERIOD_BITS;

/// Largest frequency a binary context indexes by.
pub(crate) const MAX_BIN_FREQ: u32 = 128;

const BIN_ROWS: usize = MAX_BIN_FREQ as usize;
const BIN_COLS: usize = 16;
const ESC_ROWS: usize = 44;
const ESC_COLS: usize = 8;

/// Row reserved for contexts that already hold every byte value.
const FULL_ROW: usize = ESC_ROWS - 1;

const INIT_BIN_ESC: [u16; BIN_COLS] = [
    0x3CDD, 0x1F3F, 0x59BF, 0x48F3, 0x5FFB, 0x5545, 0x63D1, 0x5D9D, 0x64A1, 0x5ABC, 0x6632,
    0x6051, 0x68F6, 0x549B, 0x6BCA, 0x3AB0,
];

/// Initial escape estimate for a context that was just promoted from binary,
/// indexed by the binary scale's top bits.
pub(crate) const EXP_ESCAPE: [u8; 16] = [25, 14, 9, 7, 5, 5, 4, 4, 4, 3, 3, 3, 2, 2, 2, 2];

/// Adaptive escape estimator.
#[derive(Debug, Clone, Copy)]
struct SeeContext {
    summ: u16,
    shift: u8,
    count: u8,
}

impl SeeContext {
    fn new(init_val: u16) -> Self {
        Self {
            summ: init_val << (PERIOD_BITS - 4),
            shift: PERIOD_BITS - 4,
            count: 4,
        }
    }

    /// Current estimate; debits it from the running sum.
    fn mean(&mut self) -> u32 {
        let ret = self.summ >> self.shift;
        self.summ = self.summ.wrapping_sub(ret);
        u32::from(ret.max(1))
    }

    /// Periodically double the sum and lengthen the period.
    fn update(&mut self) {
        if self.shift < PERIOD_BITS {
            self.count = self.count.wrapping_sub(1);
            if self.count == 0 {
                self.summ = self.summ.wrapping_add(self.summ);
                self.count = 3 << self.shift;
                self.shift += 1;
            }
        }
    }
}

/// Handle to a binary scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BinSlot {
    row: u8,
    col: u8,
}

/// Handle to an escape estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EscSlot {
    row: u8,
    col: u8,
}

/// SEE tables and the success flag feeding the binary index.
pub(crate) struct SeeState {
    prev_success: bool,
    /// Suffix symbol count bucket.
    n_to_index: [u8; 256],
    /// Remaining-symbol count bucket.
    diff_to_index: [u8; 256],
    bin: [[u16; BIN_COLS]; BIN_ROWS],
    esc: [[SeeContext; ESC_COLS]; ESC_ROWS],
}

impl SeeState {
    pub fn new() -> Self {
        let mut see = Self {
            prev_success: false,
            n_to_index: [0; 256],
            diff_to_index: [0; 256],
            bin: [[0; BIN_COLS]; BIN_ROWS],
            esc: [[SeeContext::new(0); ESC_COLS]; ESC_ROWS],
        };
        for i in 0..256 {
            see.n_to_index[i] = match i {
                0..=5 => 2 * i as u8,
                6..=49 => 12,
                _ => 14,
            };
            see.diff_to_index[i] = match i {
                0..=3 => i as u8,
                4..=11 => 4 + ((i - 4) >> 1) as u8,
                12..=43 => 8 + ((i - 12) >> 2) as u8,
                _ => 16 + ((i - 44) >> 3) as u8,
            };
        }
        see.init();
        see
    }

    /// Restore every table to its initial estimate.
    pub fn init(&mut self) {
        self.prev_success = false;
        for (i, row) in self.bin.iter_mut().enumerate() {
            for (j, scale) in row.iter_mut().enumerate() {
                *scale = (FREQ_MAX_VALUE - u32::from(INIT_BIN_ESC[j]) / (i as u32 + 2)) as u16;
            }
        }
        for (i, row) in self.esc.iter_mut().enumerate() {
            *row = [SeeContext::new(4 * i as u16 + 8); ESC_COLS];
        }
    }

    #[inline]
    pub fn set_prev_success(&mut self, success: bool) {
        self.prev_success = success;
    }

    /// Binary scale slot for a lone symbol with frequency `freq` whose suffix
    /// context holds `suffix_symbols` symbols.
    pub fn bin_slot(&self, freq: u32, suffix_symbols: u32) -> BinSlot {
        let row = freq.clamp(1, MAX_BIN_FREQ) - 1;
        let bucket = self.n_to_index[suffix_symbols.clamp(1, 256) as usize - 1];
        BinSlot {
            row: row as u8,
            col: bucket + u8::from(self.prev_success),
        }
    }

    /// Probability (out of `FREQ_MAX_VALUE`) that the lone symbol occurs.
    #[inline]
    pub fn bin_scale(&self, slot: BinSlot) -> u32 {
        u32::from(self.bin[slot.row as usize][slot.col as usize])
    }

    pub fn bin_hit(&mut self, slot: BinSlot) {
        let scale = &mut self.bin[slot.row as usize][slot.col as usize];
        *scale = scale.wrapping_add(INTERVAL as u16).wrapping_sub(bin_mean(*scale));
    }

    /// Shrink the scale after an escape and return the new value.
    pub fn bin_miss(&mut self, slot: BinSlot) -> u32 {
        let scale = &mut self.bin[slot.row as usize][slot.col as usize];
        *scale = scale.wrapping_sub(bin_mean(*scale));
        u32::from(*scale)
    }

    /// Escape estimator for a masked context.
    ///
    /// `diff` is the number of symbols of the context still possible,
    /// `masked` the number of symbols excluded so far.
    pub fn esc_slot(
        &self,
        symbols: u32,
        total_freq: u32,
        suffix_symbols: u32,
        diff: u32,
        masked: u32,
    ) -> EscSlot {
        if symbols >= 256 {
            return EscSlot {
                row: FULL_ROW as u8,
                col: 0,
            };
        }
        debug_assert!(diff >= 1);
        let mut col = 0u8;
        if diff < suffix_symbols.saturating_sub(symbols) {
            col += 4;
        }
        if total_freq < 11 * symbols {
            col += 2;
        }
        if masked > diff {
            col += 1;
        }
        let row = self.diff_to_index[(diff.clamp(1, 256) - 1) as usize];
        EscSlot { row, col }
    }

    #[inline]
    pub fn esc_mean(&mut self, slot: EscSlot) -> u32 {
        self.esc[slot.row as usize][slot.col as usize].mean()
    }

    /// The context coded a symbol.
    pub fn esc_hit(&mut self, slot: EscSlot) {
        self.esc[slot.row as usize][slot.col as usize].update();
    }

    /// The context escaped; credit the whole coded scale to the estimator.
    pub fn esc_miss(&mut self, slot: EscSlot, scale: u32) {
        let ctx = &mut self.esc[slot.row as usize][slot.col as usize];
        ctx.summ = ctx.summ.wrapping_add(scale as u16);
    }
}

#[inline]
fn bin_mean(scale: u16) -> u16 {
    (scale + (1 << 5)) >> 7
}
