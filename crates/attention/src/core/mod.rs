//! Core traits and types shared by pooling implementations.
//!
//! Implementations take activations laid out as `[batch, steps, dim]` and an
//! optional `{0, 1}` mask shaped `[batch, steps]`. They return the pooled
//! `[batch, dim]` tensor together with the `[batch, steps, 1]` weights that
//! produced it.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{PoolingConfig, DEFAULT_EPSILON};
pub use errors::AttentionError;

/// Result of a pooling pass.
#[derive(Debug, Clone)]
pub struct PooledOutput {
    /// Weighted sum over the step axis, `[batch, dim]`.
    pub pooled: Tensor,
    /// Normalised weight of every step, `[batch, steps, 1]`.
    pub weights: Tensor,
}

/// Unified interface for sequence pooling.
///
/// * `build` creates the parameters for a feature size ahead of the first call.
///   Calling it again with the same size is a no-op.
/// * `pool` builds lazily from the last input dimension when `build` was not
///   called.
/// * `propagate_mask` hands the step mask on to the next stage; pooling does
///   not consume it.
pub trait Pooling: Send + Sync {
    /// Creates the learned parameters for inputs with `dim` features.
    fn build(&self, dim: usize) -> Result<(), AttentionError>;

    /// Pools `x` over its step axis, ignoring steps where `mask` is zero.
    fn pool(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<PooledOutput, AttentionError>;

    /// Returns the mask for downstream consumers.
    fn propagate_mask<'a>(&self, mask: Option<&'a Tensor>) -> Option<&'a Tensor> {
        mask
    }
}
