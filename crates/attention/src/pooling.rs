//! Learned-context attention pooling.
//!
//! For an input `x` of shape `[batch, steps, dim]` and a context vector `u`:
//!
//! ```text
//! score[b, t]  = x[b, t, :] . u
//! e[b, t]      = exp(score[b, t]) * mask[b, t]
//! w[b, t]      = e[b, t] / (sum_t e[b, :] + epsilon)
//! pooled[b, :] = sum_t w[b, t] * x[b, t, :]
//! ```
//!
//! Masked steps get a weight of exactly zero. A row with no valid step yields
//! all-zero weights and an all-zero pooled vector.

use std::fmt;
use std::sync::OnceLock;

use candle_core::Tensor;
use candle_nn::{Init, VarBuilder};
use layers::glorot_bound;

use crate::core::{AttentionError, PooledOutput, Pooling, PoolingConfig};

/// Attention pooling over the step axis with a single learned context vector.
pub struct AttentionPooling {
    config: PoolingConfig,
    builder: Option<VarBuilder<'static>>,
    context: OnceLock<Tensor>,
}

impl AttentionPooling {
    /// Creates the context vector for `dim` features immediately.
    pub fn new(dim: usize, config: PoolingConfig, vb: VarBuilder) -> Result<Self, AttentionError> {
        let context = OnceLock::new();
        let _ = context.set(create_context(dim, &vb)?);
        Ok(Self {
            config,
            builder: None,
            context,
        })
    }

    /// Defers parameter creation until [`Pooling::build`] or the first
    /// [`Pooling::pool`] call reveals the feature size.
    pub fn deferred(config: PoolingConfig, vb: VarBuilder<'static>) -> Self {
        Self {
            config,
            builder: Some(vb),
            context: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &PoolingConfig {
        &self.config
    }

    /// Returns the context vector once it has been built.
    pub fn context(&self) -> Option<&Tensor> {
        self.context.get()
    }

    fn ensure_context(&self, dim: usize) -> Result<&Tensor, AttentionError> {
        if let Some(context) = self.context.get() {
            let built = context.dim(0)?;
            if built != dim {
                return Err(AttentionError::shape(format!(
                    "attention pooling was built for {built} features, got {dim}"
                )));
            }
            return Ok(context);
        }
        let vb = self.builder.as_ref().ok_or_else(|| {
            AttentionError::shape("attention pooling has neither parameters nor a builder")
        })?;
        let _ = self.context.set(create_context(dim, vb)?);
        self.context
            .get()
            .ok_or_else(|| AttentionError::shape("attention context failed to initialise"))
    }
}

impl fmt::Debug for AttentionPooling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttentionPooling")
            .field("config", &self.config)
            .field("dim", &self.context.get().map(|u| u.dims().to_vec()))
            .finish()
    }
}

fn create_context(dim: usize, vb: &VarBuilder) -> Result<Tensor, AttentionError> {
    if dim == 0 {
        return Err(AttentionError::shape("attention pooling needs dim > 0"));
    }
    let bound = glorot_bound(&[dim]);
    let context = vb.get_with_hints(
        dim,
        "context",
        Init::Uniform {
            lo: -bound,
            up: bound,
        },
    )?;
    log::debug!("attention context created with dim {dim}");
    Ok(context)
}

/// Score assigned to masked steps before the row maximum is taken.
const MASKED_SCORE: f64 = -1e30;

/// Subtracts the per-row maximum over valid steps from `scores`.
///
/// Masked steps are pinned to [`MASKED_SCORE`] so they neither set the
/// maximum nor overflow in `exp`. Rows without a valid step are not shifted.
fn shift_by_valid_max(scores: &Tensor, mask: Option<&Tensor>) -> Result<Tensor, AttentionError> {
    let Some(mask) = mask else {
        return Ok(scores.broadcast_sub(&scores.max_keepdim(1)?)?);
    };
    let valid = mask.ne(0f32)?;
    let floor = scores.zeros_like()?.affine(1.0, MASKED_SCORE)?;
    let masked = valid.where_cond(scores, &floor)?;

    let row_max = masked.max_keepdim(1)?;
    let shift = valid
        .max_keepdim(1)?
        .where_cond(&row_max, &row_max.zeros_like()?)?;
    Ok(masked.broadcast_sub(&shift)?)
}

impl Pooling for AttentionPooling {
    fn build(&self, dim: usize) -> Result<(), AttentionError> {
        self.ensure_context(dim).map(|_| ())
    }

    fn pool(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<PooledOutput, AttentionError> {
        let (batch, steps, dim) = match x.dims() {
            [b, s, d] => (*b, *s, *d),
            dims => {
                return Err(AttentionError::shape(format!(
                    "attention pooling expects [batch, steps, dim], got {dims:?}"
                )))
            }
        };
        if !x.dtype().is_float() {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{:?}", x.dtype()),
            });
        }
        let context = self.ensure_context(dim)?.to_dtype(x.dtype())?;

        if let Some(mask) = mask {
            if mask.dims() != &[batch, steps] {
                return Err(AttentionError::shape(format!(
                    "mask must be [{batch}, {steps}], got {:?}",
                    mask.dims()
                )));
            }
        }

        let scores = x
            .reshape((batch * steps, dim))?
            .matmul(&context.unsqueeze(1)?)?
            .reshape((batch, steps))?;
        let scores = if self.config.stabilize {
            shift_by_valid_max(&scores, mask)?
        } else {
            scores
        };
        let mut exp_scores = scores.exp()?;
        if let Some(mask) = mask {
            exp_scores = exp_scores.mul(&mask.to_dtype(x.dtype())?)?;
        }

        let denominator = exp_scores.sum_keepdim(1)?.affine(1.0, self.config.epsilon)?;
        let weights = exp_scores.broadcast_div(&denominator)?.unsqueeze(2)?;
        let pooled = x.broadcast_mul(&weights)?.sum(1)?;
        Ok(PooledOutput { pooled, weights })
    }
}
