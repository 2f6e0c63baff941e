//! Error types for model construction and the codec drivers.
//!
//! Coding a single symbol never fails: arena exhaustion is handled inside the
//! model by restarting it, and corrupt input decodes to *some* symbol
//! sequence. Errors surface only where a caller can act on them.
//!
//! ## Error Categories
//!
//! | Category | Errors | Description |
//! |----------|--------|-------------|
//! | Configuration | [`InvalidOrder`], [`MemoryLimitTooSmall`], [`MemoryLimitTooLarge`] | Rejected [`PpmConfig`](crate::PpmConfig) |
//! | Stream | [`OutputLimitExceeded`], [`LengthMismatch`], [`MissingEndOfStream`] | Decoded data does not look like what was expected |
//! | Memory | [`OutOfMemory`] | The arena cannot hold the model skeleton |
//!
//! [`InvalidOrder`]: PpmError::InvalidOrder
//! [`MemoryLimitTooSmall`]: PpmError::MemoryLimitTooSmall
//! [`MemoryLimitTooLarge`]: PpmError::MemoryLimitTooLarge
//! [`OutputLimitExceeded`]: PpmError::OutputLimitExceeded
//! [`LengthMismatch`]: PpmError::LengthMismatch
//! [`MissingEndOfStream`]: PpmError::MissingEndOfStream
//! [`OutOfMemory`]: PpmError::OutOfMemory

use thiserror::Error;

use crate::ppm::OutOfMemory;

/// Error type for PPM operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PpmError {
    /// Model order outside the supported range.
    #[error("invalid model order {order} (supported: 1..={max})")]
    InvalidOrder { order: u32, max: u32 },

    /// Memory limit too small to hold the model skeleton.
    #[error("memory limit of {limit} bytes is below the minimum of {min} bytes")]
    MemoryLimitTooSmall { limit: usize, min: usize },

    /// Memory limit not addressable by the arena.
    #[error("memory limit of {limit} bytes exceeds the maximum of {max} bytes")]
    MemoryLimitTooLarge { limit: usize, max: usize },

    /// Decoding produced more than the configured output cap.
    #[error("decoded output exceeds the limit of {limit} bytes")]
    OutputLimitExceeded { limit: usize },

    /// Decoded length differs from the length the caller expected.
    #[error("expected {expected} decoded bytes, stream ended after {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The expected number of bytes decoded but no end-of-stream marker followed.
    #[error("end-of-stream marker missing")]
    MissingEndOfStream,

    /// Arena exhausted while building the model skeleton.
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),
}

/// Result type for PPM operations.
pub type Result<T> = std::result::Result<T, PpmError>;
