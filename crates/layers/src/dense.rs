//! Dense output head.
//!
//! Inputs are shaped `(batch, in_dim)` and outputs `(batch, out_dim)`. The
//! weight matrix is stored as `(out_dim, in_dim)` under `weight` with a `bias`
//! vector beside it, which is the layout [`candle_nn::Linear`] expects.

use candle_core::{bail, Result, Tensor};
use candle_nn::{Module, VarBuilder};

use crate::checks;

/// Non-linearity applied after the affine projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DenseActivation {
    /// Logistic sigmoid, producing probabilities in `(0, 1)`.
    #[default]
    Sigmoid,
    /// Raw affine output.
    Identity,
}

#[derive(Debug, Clone)]
pub struct Dense {
    inner: candle_nn::Linear,
    input_dim: usize,
    output_dim: usize,
    activation: DenseActivation,
}

impl Dense {
    pub fn new(
        input_dim: usize,
        output_dim: usize,
        activation: DenseActivation,
        vb: VarBuilder,
    ) -> Result<Self> {
        if input_dim == 0 || output_dim == 0 {
            bail!("dense layer requires non-zero sizes, got {input_dim} -> {output_dim}");
        }
        let inner = candle_nn::linear(input_dim, output_dim, vb)?;
        Ok(Self {
            inner,
            input_dim,
            output_dim,
            activation,
        })
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Applies the projection without the activation.
    pub fn logits(&self, input: &Tensor) -> Result<Tensor> {
        checks::expect_rank("dense.input", input, 2)?;
        let (_, features) = input.dims2()?;
        if features != self.input_dim {
            bail!(
                "dense.input: expected {} features, got {features}",
                self.input_dim
            );
        }
        self.inner.forward(input)
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let logits = self.logits(input)?;
        match self.activation {
            DenseActivation::Sigmoid => candle_nn::ops::sigmoid(&logits),
            DenseActivation::Identity => Ok(logits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn sigmoid_head_outputs_probabilities() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let head = Dense::new(6, 1, DenseActivation::Sigmoid, vb.pp("head"))?;
        let input = Tensor::randn(0f32, 3.0, (4, 6), &Device::Cpu)?;
        let probs = head.forward(&input)?;
        assert_eq!(probs.dims(), &[4, 1]);
        let values = probs.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|p| *p > 0.0 && *p < 1.0));

        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.contains(&"head.weight".to_string()));
        assert!(names.contains(&"head.bias".to_string()));
        Ok(())
    }

    #[test]
    fn rejects_wrong_feature_width() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let head = Dense::new(6, 1, DenseActivation::Identity, vb)?;
        let input = Tensor::zeros((4, 5), DType::F32, &Device::Cpu)?;
        assert!(head.forward(&input).is_err());
        let rank3 = Tensor::zeros((4, 1, 6), DType::F32, &Device::Cpu)?;
        assert!(head.forward(&rank3).is_err());
        Ok(())
    }
}
