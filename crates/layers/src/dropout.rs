//! Train-only inverted dropout with a seeded, reproducible mask stream.
//!
//! Dropout never touches padding masks: callers pass masks alongside the
//! activations and those masks flow through unchanged.

use std::sync::Mutex;

use candle_core::{bail, Error, Result, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Inverted dropout: kept activations are scaled by `1 / (1 - p)` during training.
#[derive(Debug)]
pub struct Dropout {
    probability: f32,
    rng: Mutex<StdRng>,
}

impl Dropout {
    /// Builds a dropout stage, or `None` when `probability` is zero so callers
    /// can skip the stage entirely.
    pub fn from_probability(probability: f32, seed: u64) -> Result<Option<Self>> {
        if !(0.0..1.0).contains(&probability) {
            bail!("dropout probability must be in [0, 1), got {probability}");
        }
        if probability == 0.0 {
            return Ok(None);
        }
        Ok(Some(Self {
            probability,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }))
    }

    /// Returns the drop probability.
    pub fn probability(&self) -> f32 {
        self.probability
    }

    /// Applies dropout when `train` is set; identity otherwise.
    pub fn forward(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        if !train {
            return Ok(input.clone());
        }
        let keep_prob = 1.0 - self.probability;
        let scale = 1.0 / keep_prob;
        let total = input.elem_count();
        let mask_data = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| Error::Msg("dropout RNG mutex poisoned".into()))?;
            (0..total)
                .map(|_| {
                    if rng.gen::<f32>() < keep_prob {
                        scale
                    } else {
                        0.0
                    }
                })
                .collect::<Vec<f32>>()
        };
        let mask = Tensor::from_vec(mask_data, input.dims(), input.device())?
            .to_dtype(input.dtype())?;
        input.mul(&mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn zero_probability_builds_no_stage() -> Result<()> {
        assert!(Dropout::from_probability(0.0, 1)?.is_none());
        assert!(Dropout::from_probability(0.3, 1)?.is_some());
        Ok(())
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        assert!(Dropout::from_probability(1.0, 1).is_err());
        assert!(Dropout::from_probability(-0.1, 1).is_err());
    }

    #[test]
    fn inference_is_identity() -> Result<()> {
        let dropout = Dropout::from_probability(0.5, 7)?.expect("stage");
        let input = Tensor::ones((2, 3, 4), DType::F32, &Device::Cpu)?;
        let output = dropout.forward(&input, false)?;
        assert_eq!(
            output.flatten_all()?.to_vec1::<f32>()?,
            input.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn training_zeroes_or_rescales() -> Result<()> {
        let dropout = Dropout::from_probability(0.5, 7)?.expect("stage");
        let input = Tensor::ones((4, 8, 16), DType::F32, &Device::Cpu)?;
        let values = dropout.forward(&input, true)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| *v == 0.0 || (*v - 2.0).abs() < 1e-6));
        let kept = values.iter().filter(|v| **v > 0.0).count();
        assert!(kept > 128 && kept < 384, "kept {kept} of 512");
        Ok(())
    }

    #[test]
    fn same_seed_gives_same_masks() -> Result<()> {
        let input = Tensor::ones((2, 5, 3), DType::F32, &Device::Cpu)?;
        let a = Dropout::from_probability(0.2, 99)?.expect("stage");
        let b = Dropout::from_probability(0.2, 99)?.expect("stage");
        assert_eq!(
            a.forward(&input, true)?.flatten_all()?.to_vec1::<f32>()?,
            b.forward(&input, true)?.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }
}
