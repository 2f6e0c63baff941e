//! Adaptive PPM byte compressor with arithmetic coding.
//!
//! Finite-context models of order 1 to 32 kept in a trie, escapes to shorter
//! contexts with symbol exclusion and secondary escape estimation. All
//! contexts live in one fixed arena; when it fills up the model restarts.
//!
//! ## Features
//! - Dependencies limited to `log` and `thiserror`
//! - Bit-oriented arithmetic coder or carryless range coder
//! - Bounded memory, set per model
//!
//! ```
//! use ppm_arith::{compress, decompress_exact, PpmConfig};
//!
//! let text = b"how much wood would a woodchuck chuck";
//! let config = PpmConfig::default();
//! let packed = compress(text, &config)?;
//! assert_eq!(decompress_exact(&packed, &config, text.len())?, text);
//! # Ok::<(), ppm_arith::PpmError>(())
//! ```

mod codec;
pub mod coder;
pub mod config;
pub mod error;
pub mod ppm;

pub use codec::{compress, decompress, decompress_exact};
pub use config::{CoderKind, PpmConfig};
pub use error::{PpmError, Result};
pub use ppm::{PpmModel, END_OF_STREAM};
