//! Spatial indexing over the arena.

mod grid;

pub use grid::{Grid, SharedObject};
