//! Configuration options for attention pooling.
//!
//! [`PoolingConfig`] holds the numeric knobs of the weight normalisation. The
//! defaults reproduce plain `exp(score) / (sum + 1e-7)` without any
//! max-subtraction.

/// Epsilon added to the normaliser of the attention weights.
pub const DEFAULT_EPSILON: f64 = 1e-7;

/// Configuration driving pooling behaviour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolingConfig {
    /// Added to the per-row sum of exponentiated scores.
    pub epsilon: f64,
    /// Subtract the per-row maximum score before exponentiating.
    ///
    /// The weights are unchanged up to the epsilon term but large scores no
    /// longer overflow to infinity.
    pub stabilize: bool,
}

impl Default for PoolingConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            stabilize: false,
        }
    }
}

impl PoolingConfig {
    pub fn stabilized(mut self, stabilize: bool) -> Self {
        self.stabilize = stabilize;
        self
    }
}
