//! Masked attention pooling for the hierarchical encoder.
//!
//! The crate collapses a sequence shaped `[batch, steps, dim]` into a single
//! vector per batch element by scoring every step against a learned context
//! vector `u`. Scores are exponentiated, multiplied by the padding mask and
//! normalised with a small epsilon in the denominator, so padded steps receive
//! exactly zero weight and fully padded rows pool to zeros instead of NaN.
//!
//! Both the pooled vectors and the per-step weights are returned; the weights
//! are what the diagnostic model exposes. Mask builders for token ids and
//! sentence rows live in [`masks`].

pub mod core;
pub mod masks;
pub mod pooling;

pub use core::{AttentionError, PooledOutput, Pooling, PoolingConfig};
pub use pooling::AttentionPooling;
