//! Model and codec configuration.
//!
//! The compressed stream carries no header: the decoder must be built with
//! the same `max_order`, `memory_limit` and `coder` as the encoder.

use crate::error::{PpmError, Result};

/// Highest supported context order.
pub const MAX_ORDER: u32 = 32;

/// Default context order.
pub const DEFAULT_MAX_ORDER: u32 = 5;

/// Smallest arena that holds the model skeleton with room to learn.
pub const MIN_MEMORY_LIMIT: usize = 16 * 1024;

/// Largest arena addressable with 32-bit offsets.
pub const MAX_MEMORY_LIMIT: usize = (u32::MAX - 7) as usize;

/// Default arena size.
pub const DEFAULT_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

/// Default cap on bytes produced by [`decompress`](crate::decompress).
pub const DEFAULT_MAX_OUTPUT: usize = 1 << 30;

/// Entropy coder backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoderKind {
    /// Bit-oriented arithmetic coder.
    #[default]
    Arithmetic,
    /// Byte-oriented carryless range coder.
    Range,
}

/// Model and codec settings.
///
/// # Example
///
/// ```
/// use ppm_arith::{CoderKind, PpmConfig};
///
/// let config = PpmConfig::new(4, 1 << 20).with_coder(CoderKind::Range);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpmConfig {
    /// Longest context, in symbols.
    pub max_order: u32,
    /// Arena size in bytes.
    pub memory_limit: usize,
    /// Entropy coder backend.
    pub coder: CoderKind,
    /// Decoding fails once this many bytes were produced without an
    /// end-of-stream marker.
    pub max_output: usize,
}

impl Default for PpmConfig {
    fn default() -> Self {
        Self {
            max_order: DEFAULT_MAX_ORDER,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            coder: CoderKind::default(),
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }
}

impl PpmConfig {
    /// Configuration with the given order and arena size.
    pub fn new(max_order: u32, memory_limit: usize) -> Self {
        Self {
            max_order,
            memory_limit,
            ..Self::default()
        }
    }

    pub fn with_coder(mut self, coder: CoderKind) -> Self {
        self.coder = coder;
        self
    }

    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    /// Check the settings against the supported ranges.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_ORDER).contains(&self.max_order) {
            return Err(PpmError::InvalidOrder {
                order: self.max_order,
                max: MAX_ORDER,
            });
        }
        if self.memory_limit < MIN_MEMORY_LIMIT {
            return Err(PpmError::MemoryLimitTooSmall {
                limit: self.memory_limit,
                min: MIN_MEMORY_LIMIT,
            });
        }
        if self.memory_limit > MAX_MEMORY_LIMIT {
            return Err(PpmError::MemoryLimitTooLarge {
                limit: self.memory_limit,
                max: MAX_MEMORY_LIMIT,
            });
        }
        Ok(())
    }
}
