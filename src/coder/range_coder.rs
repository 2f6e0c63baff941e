//! Carryless range coder.
//!
//! Based on Dmitry Subbotin's implementation. Renormalizes a byte at a time;
//! when the range gets too small without the top byte settling, the range is
//! clipped to the next `BOT` boundary instead of propagating a carry.

use super::{Prob, SymbolDecoder, SymbolEncoder};

/// Range coder constants.
const TOP: u32 = 1 << 24;
const BOT: u32 = 1 << 15;

/// Range encoder appending to a caller-owned buffer.
pub struct RangeEncoder<'a> {
    low: u32,
    range: u32,
    out: &'a mut Vec<u8>,
}

impl<'a> RangeEncoder<'a> {
    /// Start a new stream at the end of `out`.
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self {
            low: 0,
            range: u32::MAX,
            out,
        }
    }

    /// Write out the four bytes of `low`.
    pub fn flush(self) {
        self.out.extend_from_slice(&self.low.to_be_bytes());
    }

    #[inline]
    fn normalize(&mut self) {
        while (self.low ^ self.low.wrapping_add(self.range)) < TOP
            || self.range < BOT && {
                self.range = self.low.wrapping_neg() & (BOT - 1);
                true
            }
        {
            self.out.push((self.low >> 24) as u8);
            self.range <<= 8;
            self.low <<= 8;
        }
    }
}

impl SymbolEncoder for RangeEncoder<'_> {
    #[inline]
    fn encode(&mut self, prob: Prob) {
        debug_assert!(prob.is_valid(), "invalid interval {prob:?}");
        self.range /= prob.scale;
        self.low = self.low.wrapping_add(prob.lo * self.range);
        self.range *= prob.hi - prob.lo;
        self.normalize();
    }
}

/// Range decoder over a borrowed byte slice.
///
/// Reading past the end of the input yields zero bytes.
pub struct RangeDecoder<'a> {
    low: u32,
    code: u32,
    range: u32,
    input: &'a [u8],
    pos: usize,
}

impl<'a> RangeDecoder<'a> {
    /// Initialize the code register from the first four bytes.
    pub fn new(input: &'a [u8]) -> Self {
        let mut dec = Self {
            low: 0,
            code: 0,
            range: u32::MAX,
            input,
            pos: 0,
        };
        for _ in 0..4 {
            dec.code = (dec.code << 8) | u32::from(dec.next_byte());
        }
        dec
    }

    /// Number of input bytes consumed so far, including padding past the end.
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    fn next_byte(&mut self) -> u8 {
        let byte = self.input.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        byte
    }

    #[inline]
    fn normalize(&mut self) {
        while (self.low ^ self.low.wrapping_add(self.range)) < TOP
            || self.range < BOT && {
                self.range = self.low.wrapping_neg() & (BOT - 1);
                true
            }
        {
            self.code = (self.code << 8) | u32::from(self.next_byte());
            self.range <<= 8;
            self.low <<= 8;
        }
    }
}

impl SymbolDecoder for RangeDecoder<'_> {
    #[inline]
    fn current_freq(&mut self, scale: u32) -> u32 {
        self.range /= scale;
        // corrupt input can put the code outside the interval
        (self.code.wrapping_sub(self.low) / self.range).min(scale - 1)
    }

    #[inline]
    fn update_range(&mut self, prob: Prob) {
        debug_assert!(prob.is_valid(), "invalid interval {prob:?}");
        self.low = self.low.wrapping_add(prob.lo * self.range);
        self.range *= prob.hi - prob.lo;
        self.normalize();
    }
}
