use candle_core::{DType, Tensor};

use crate::TrainingError;

/// Mean binary cross entropy over `(batch, 1)` probabilities.
#[derive(Debug, Clone)]
pub struct BinaryCrossEntropyLoss {
    epsilon: f64,
}

impl BinaryCrossEntropyLoss {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probabilities are clamped to `[epsilon, 1 - epsilon]` before the log.
    pub fn with_epsilon(mut self, epsilon: f64) -> Result<Self, TrainingError> {
        if !(epsilon > 0.0 && epsilon < 0.5) {
            return Err(TrainingError::initialization(
                "binary cross entropy epsilon must be in (0, 0.5)",
            ));
        }
        self.epsilon = epsilon;
        Ok(self)
    }

    pub fn compute(
        &self,
        probabilities: &Tensor,
        targets: &Tensor,
    ) -> Result<LossOutput, TrainingError> {
        let dims = probabilities.dims();
        if dims.len() != 2 || dims[1] != 1 {
            return Err(TrainingError::runtime(format!(
                "binary cross entropy expects probabilities shaped (batch, 1), got {:?}",
                dims
            )));
        }
        if targets.dims() != dims {
            return Err(TrainingError::runtime(format!(
                "targets {:?} must match probabilities {:?}",
                targets.dims(),
                dims
            )));
        }
        let examples = dims[0];
        if examples == 0 {
            return Err(TrainingError::runtime(
                "no examples available for loss computation",
            ));
        }

        let targets = targets
            .to_device(probabilities.device())
            .and_then(|t| t.to_dtype(probabilities.dtype()))
            .map_err(to_runtime_error)?;
        let clamped = probabilities
            .clamp(self.epsilon, 1.0 - self.epsilon)
            .map_err(to_runtime_error)?;

        let positive = (&targets * clamped.log().map_err(to_runtime_error)?)
            .map_err(to_runtime_error)?;
        let negative_target = targets.affine(-1.0, 1.0).map_err(to_runtime_error)?;
        let negative_log = clamped
            .affine(-1.0, 1.0)
            .and_then(|t| t.log())
            .map_err(to_runtime_error)?;
        let negative = (&negative_target * negative_log).map_err(to_runtime_error)?;
        let loss = (positive + negative)
            .and_then(|t| t.neg())
            .and_then(|t| t.mean_all())
            .map_err(to_runtime_error)?;

        let average_loss = loss
            .to_dtype(DType::F32)
            .and_then(|t| t.to_vec0::<f32>())
            .map_err(to_runtime_error)?;

        let predicted = probabilities.ge(0.5).map_err(to_runtime_error)?;
        let expected = targets.ge(0.5).map_err(to_runtime_error)?;
        let correct_examples = predicted
            .eq(&expected)
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.sum_all())
            .and_then(|t| t.to_vec0::<f32>())
            .map_err(to_runtime_error)?
            .round() as usize;

        Ok(LossOutput {
            loss,
            metrics: LossMetrics {
                average_loss,
                total_examples: examples,
                correct_examples,
            },
        })
    }
}

impl Default for BinaryCrossEntropyLoss {
    fn default() -> Self {
        Self { epsilon: 1e-7 }
    }
}

#[derive(Debug, Clone)]
pub struct LossOutput {
    pub loss: Tensor,
    pub metrics: LossMetrics,
}

#[derive(Debug, Clone)]
pub struct LossMetrics {
    average_loss: f32,
    total_examples: usize,
    correct_examples: usize,
}

impl LossMetrics {
    pub fn average_loss(&self) -> f32 {
        self.average_loss
    }

    pub fn total_examples(&self) -> usize {
        self.total_examples
    }

    pub fn correct_examples(&self) -> usize {
        self.correct_examples
    }

    pub fn accuracy(&self) -> f32 {
        if self.total_examples == 0 {
            0.0
        } else {
            self.correct_examples as f32 / self.total_examples as f32
        }
    }
}

fn to_runtime_error(err: candle_core::Error) -> TrainingError {
    TrainingError::runtime(err.to_string())
}
