//! Pure, single-threaded transformations from raw per-symbol signals to a final
//! recommendation set. Nothing here performs I/O or keeps state between calls.

pub mod chip_flow;
pub mod normalizer;
pub mod reversal;
pub mod scoring;
pub mod selection;
