use candle_core::{backprop::GradStore, DType, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};

use crate::{config::OptimizerConfig, TrainingError};

/// AdamW over a named parameter list, reporting the global gradient norm of
/// every step.
pub struct TrainerOptimizer {
    inner: AdamW,
    names: Vec<String>,
    params: Vec<Var>,
    step: usize,
}

impl TrainerOptimizer {
    pub fn new(
        named_parameters: Vec<(String, Var)>,
        config: &OptimizerConfig,
    ) -> Result<Self, TrainingError> {
        if named_parameters.is_empty() {
            return Err(TrainingError::initialization(
                "optimizer requires at least one parameter",
            ));
        }
        if let Some((name, _)) = named_parameters
            .iter()
            .find(|(_, var)| !var.as_tensor().dtype().is_float())
        {
            return Err(TrainingError::initialization(format!(
                "optimizer received non-floating parameter '{name}'"
            )));
        }

        let params_adamw = ParamsAdamW {
            lr: config.learning_rate,
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.epsilon,
            weight_decay: config.weight_decay,
        };
        let (names, params): (Vec<_>, Vec<_>) = named_parameters.into_iter().unzip();
        let inner = AdamW::new(params.clone(), params_adamw).map_err(to_runtime_error)?;
        Ok(Self {
            inner,
            names,
            params,
            step: 0,
        })
    }

    /// Every variable in `varmap`, ordered by name.
    pub fn from_varmap(varmap: &VarMap, config: &OptimizerConfig) -> Result<Self, TrainingError> {
        let mut named: Vec<(String, Var)> = varmap
            .data()
            .lock()
            .map_err(|_| TrainingError::runtime("parameter store lock poisoned"))?
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Self::new(named, config)
    }

    pub fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    pub fn steps_taken(&self) -> usize {
        self.step
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.names
    }

    /// Backpropagates `loss`, applies one update and returns the gradient norm.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<f64, TrainingError> {
        let grads = loss.backward().map_err(to_runtime_error)?;
        let norm = self.global_grad_norm(&grads)?;
        self.inner.step(&grads).map_err(to_runtime_error)?;
        self.step += 1;
        Ok(norm)
    }

    fn global_grad_norm(&self, grads: &GradStore) -> Result<f64, TrainingError> {
        let mut total = 0f64;
        for param in &self.params {
            if let Some(grad) = grads.get(param.as_tensor()) {
                total += tensor_sq_sum(grad)?;
            }
        }
        Ok(total.sqrt())
    }
}

fn tensor_sq_sum(tensor: &Tensor) -> Result<f64, TrainingError> {
    tensor
        .to_dtype(DType::F32)
        .and_then(|t| t.sqr())
        .and_then(|t| t.sum_all())
        .and_then(|t| t.to_vec0::<f32>())
        .map(f64::from)
        .map_err(to_runtime_error)
}

fn to_runtime_error(err: candle_core::Error) -> TrainingError {
    TrainingError::runtime(err.to_string())
}
