//! PPM context modelling.
//!
//! Based on Dmitry Shkarin's PPMd design: a trie of finite-order contexts,
//! escape to shorter contexts with symbol exclusion, secondary escape
//! estimation and a fixed-size arena that is wiped when it fills up.

mod context;
mod model;
mod see;
pub mod sub_alloc;

pub use model::{PpmModel, END_OF_STREAM};
pub use sub_alloc::{BlockInfo, HeapStats, OutOfMemory, SubAllocator};
