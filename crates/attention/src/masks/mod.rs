//! Padding masks derived from raw token ids.
//!
//! Masks produced here are multiplicative `{0, 1}` tensors with dtype `f32`:
//! `1.0` marks real content and `0.0` marks padding. The reserved id `0` is the
//! only padding marker; every other id counts as content.

pub mod padding;

use candle_core::DType;

/// Dtype shared by all masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use padding::{sentence_mask, token_mask};
