//! Bit-oriented arithmetic coder.
//!
//! Classic CACM-87 style coder over 24-bit `lo`/`hi` registers. When the
//! interval straddles the midpoint without fitting into either half but sits
//! inside the middle half, it is expanded around the midpoint and the
//! decision is deferred as a pending bit, emitted inverted after the next
//! resolved bit.

use super::{Prob, SymbolDecoder, SymbolEncoder};

const CODE_BITS: u32 = 24;
const CODE_MAX_VALUE: u32 = (1 << CODE_BITS) - 1;
const ONE_FOURTH: u32 = 1 << (CODE_BITS - 2);
const ONE_HALF: u32 = 2 * ONE_FOURTH;
const THREE_FOURTHS: u32 = 3 * ONE_FOURTH;

/// Arithmetic encoder appending to a caller-owned buffer.
pub struct ArithEncoder<'a> {
    lo: u32,
    hi: u32,
    pending: u32,
    bit_buf: u8,
    bits_left: u8,
    out: &'a mut Vec<u8>,
}

impl<'a> ArithEncoder<'a> {
    /// Start a new stream at the end of `out`.
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self {
            lo: 0,
            hi: CODE_MAX_VALUE,
            pending: 0,
            bit_buf: 0,
            bits_left: 8,
            out,
        }
    }

    /// Emit the bits that disambiguate the final interval and the last
    /// partial byte.
    pub fn flush(mut self) {
        self.pending += 1;
        let bit = self.lo >= ONE_FOURTH;
        self.write_bit(bit);
        if self.bit_buf != 0 {
            self.out.push(self.bit_buf);
        }
    }

    #[inline]
    fn put_bit(&mut self, bit: bool) {
        self.bits_left -= 1;
        self.bit_buf |= u8::from(bit) << self.bits_left;
        if self.bits_left == 0 {
            self.out.push(self.bit_buf);
            self.bit_buf = 0;
            self.bits_left = 8;
        }
    }

    #[inline]
    fn write_bit(&mut self, bit: bool) {
        self.put_bit(bit);
        while self.pending > 0 {
            self.put_bit(!bit);
            self.pending -= 1;
        }
    }
}

impl SymbolEncoder for ArithEncoder<'_> {
    #[inline]
    fn encode(&mut self, prob: Prob) {
        debug_assert!(prob.is_valid(), "invalid interval {prob:?}");
        let step = (self.hi - self.lo + 1) / prob.scale;
        self.hi = self.lo + step * prob.hi - 1;
        self.lo += step * prob.lo;

        loop {
            if self.hi < ONE_HALF {
                self.write_bit(false);
            } else if self.lo >= ONE_HALF {
                self.write_bit(true);
            } else if self.lo >= ONE_FOURTH && self.hi < THREE_FOURTHS {
                self.pending += 1;
                self.lo -= ONE_FOURTH;
                self.hi -= ONE_FOURTH;
            } else {
                break;
            }
            self.hi = ((self.hi << 1) | 1) & CODE_MAX_VALUE;
            self.lo = (self.lo << 1) & CODE_MAX_VALUE;
        }
    }
}

/// Arithmetic decoder over a borrowed byte slice.
///
/// Reading past the end of the input yields zero bits.
pub struct ArithDecoder<'a> {
    lo: u32,
    hi: u32,
    code: u32,
    input: &'a [u8],
    pos: usize,
    bits_left: u8,
}

impl<'a> ArithDecoder<'a> {
    /// Prime the code register from the first bytes of `input`.
    pub fn new(input: &'a [u8]) -> Self {
        let mut dec = Self {
            lo: 0,
            hi: CODE_MAX_VALUE,
            code: 0,
            input,
            pos: 0,
            bits_left: 8,
        };
        for _ in 0..CODE_BITS / 8 {
            let byte = dec.input.get(dec.pos).copied().unwrap_or(0);
            dec.pos += 1;
            dec.code = (dec.code << 8) | u32::from(byte);
        }
        dec
    }

    /// Number of input bytes consumed so far, including padding past the end.
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    fn next_bit(&mut self) -> u32 {
        let Some(&byte) = self.input.get(self.pos) else {
            return 0;
        };
        self.bits_left -= 1;
        let bit = (byte >> self.bits_left) & 1;
        if self.bits_left == 0 {
            self.bits_left = 8;
            self.pos += 1;
        }
        u32::from(bit)
    }
}

impl SymbolDecoder for ArithDecoder<'_> {
    #[inline]
    fn current_freq(&mut self, scale: u32) -> u32 {
        let step = (self.hi - self.lo + 1) / scale;
        (self.code.wrapping_sub(self.lo) / step).min(scale - 1)
    }

    #[inline]
    fn update_range(&mut self, prob: Prob) {
        debug_assert!(prob.is_valid(), "invalid interval {prob:?}");
        let step = (self.hi - self.lo + 1) / prob.scale;
        self.hi = self.lo + step * prob.hi - 1;
        self.lo += step * prob.lo;

        loop {
            if self.hi < ONE_HALF || self.lo >= ONE_HALF {
                // top bit resolved; the shift below drops it
            } else if self.lo >= ONE_FOURTH && self.hi < THREE_FOURTHS {
                self.code = self.code.wrapping_sub(ONE_FOURTH);
                self.lo -= ONE_FOURTH;
                self.hi -= ONE_FOURTH;
            } else {
                break;
            }
            self.hi = ((self.hi << 1) | 1) & CODE_MAX_VALUE;
            self.lo = (self.lo << 1) & CODE_MAX_VALUE;
            self.code = ((self.code << 1) | self.next_bit()) & CODE_MAX_VALUE;
        }
    }
}
