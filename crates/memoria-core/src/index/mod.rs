//! Approximate nearest-neighbor indexing over a [`crate::buffer::VectorBuffer`].

pub mod hnsw;

pub use hnsw::{HnswIndex, HnswParams};
