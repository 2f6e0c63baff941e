//! Entropy coders driven by the PPM model.
//!
//! The model never touches bits or bytes directly. It hands every decision
//! to a coder as a [`Prob`]: a sub-interval `[lo, hi)` of `[0, scale)`.
//!
//! Two interchangeable backends are provided:
//!
//! - [`ArithEncoder`] / [`ArithDecoder`]: bit-oriented arithmetic coder with
//!   24-bit registers and explicit underflow (pending bit) tracking.
//! - [`RangeEncoder`] / [`RangeDecoder`]: byte-oriented carryless range coder.
//!
//! Both produce a stream only their own decoder understands.

mod arith;
mod range_coder;

pub use arith::{ArithDecoder, ArithEncoder};
pub use range_coder::{RangeDecoder, RangeEncoder};

/// Bits of precision for frequency scales handed to the coders.
pub const FREQ_BITS: u32 = 15;

/// Largest scale a coder accepts.
pub const PROB_MAX_VALUE: u32 = 1 << FREQ_BITS;

/// Bits of precision of binary-context probabilities.
pub const FREQ_MAX_BITS: u32 = 14;

/// Scale used for binary contexts; context totals are kept below it.
pub const FREQ_MAX_VALUE: u32 = 1 << FREQ_MAX_BITS;

const _: () = assert!(FREQ_MAX_BITS < FREQ_BITS);

/// A coding interval `[lo, hi)` out of `scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prob {
    pub lo: u32,
    pub hi: u32,
    pub scale: u32,
}

impl Prob {
    /// Create a new interval.
    #[inline]
    pub const fn new(lo: u32, hi: u32, scale: u32) -> Self {
        Self { lo, hi, scale }
    }

    /// Whether the interval is non-empty and fits the coder precision.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.lo < self.hi && self.hi <= self.scale && self.scale <= PROB_MAX_VALUE
    }
}

/// Sink side of an entropy coder.
pub trait SymbolEncoder {
    /// Narrow the current interval to `prob`.
    fn encode(&mut self, prob: Prob);
}

/// Source side of an entropy coder.
///
/// Every [`current_freq`](Self::current_freq) call must be followed by
/// exactly one [`update_range`](Self::update_range) with the same scale.
pub trait SymbolDecoder {
    /// Cumulative frequency in `[0, scale)` the next symbol falls on.
    fn current_freq(&mut self, scale: u32) -> u32;

    /// Consume the interval the model resolved the frequency to.
    fn update_range(&mut self, prob: Prob);
}

impl<T: SymbolEncoder + ?Sized> SymbolEncoder for &mut T {
    #[inline]
    fn encode(&mut self, prob: Prob) {
        (**self).encode(prob);
    }
}

impl<T: SymbolDecoder + ?Sized> SymbolDecoder for &mut T {
    #[inline]
    fn current_freq(&mut self, scale: u32) -> u32 {
        (**self).current_freq(scale)
    }

    #[inline]
    fn update_range(&mut self, prob: Prob) {
        (**self).update_range(prob);
    }
}
