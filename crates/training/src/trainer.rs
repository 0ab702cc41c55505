use std::path::{Path, PathBuf};

use candle_core::{
    utils::{cuda_is_available, metal_is_available},
    Device,
};
use model::HierarchicalAttentionNetwork;

use crate::{
    checkpoint::{self, CheckpointDescriptor, SaveRequest},
    data::{DocumentBatch, DocumentBatcher, DocumentDataset},
    logging::{Logger, LoggingSettings},
    loss::{BinaryCrossEntropyLoss, LossMetrics, LossOutput},
    metrics::{EvaluationMetrics, EvaluationSummary, TrainingMetrics},
    optimizer::TrainerOptimizer,
    TrainingConfig, TrainingError,
};

/// Picks Metal, then CUDA, then CPU.
pub fn select_device() -> Device {
    let cuda_available = cuda_is_available();
    let metal_available = metal_is_available();
    log::debug!(
        "device detection: cuda_available={} metal_available={}",
        cuda_available,
        metal_available
    );

    if metal_available {
        match Device::new_metal(0) {
            Ok(device) => {
                log::info!("device: using Metal GPU #0");
                return device;
            }
            Err(err) => log::warn!("failed to initialize metal device, falling back: {err}"),
        }
    }
    if cuda_available {
        match Device::cuda_if_available(0) {
            Ok(device) => {
                log::info!("device: using CUDA GPU #0");
                return device;
            }
            Err(err) => log::warn!("cuda reported available but initialization failed: {err}"),
        }
    }
    log::info!("device: using CPU");
    Device::Cpu
}

/// Outcome of one pass over the training set.
#[derive(Debug, Clone)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: usize,
    pub train: EvaluationSummary,
    pub validation: Option<EvaluationSummary>,
    pub checkpoint: Option<PathBuf>,
}

pub struct Trainer {
    config: TrainingConfig,
    device: Device,
    network: HierarchicalAttentionNetwork,
    optimizer: TrainerOptimizer,
    loss: BinaryCrossEntropyLoss,
    train_data: DocumentDataset,
    validation_data: Option<DocumentDataset>,
    batcher: DocumentBatcher,
    metrics: TrainingMetrics,
    logger: Logger,
    optimizer_steps: usize,
    epochs_completed: usize,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self, TrainingError> {
        let device = select_device();
        Self::with_device(config, device)
    }

    pub fn with_device(config: TrainingConfig, device: Device) -> Result<Self, TrainingError> {
        config.validate()?;

        let max_seq = config.model.max_seq;
        let train_data =
            DocumentDataset::from_jsonl(&config.data.train_path, max_seq, config.data.max_sentences)?;
        if !train_data.is_labelled() {
            return Err(TrainingError::data(format!(
                "every training document in {} needs a label",
                config.data.train_path.display()
            )));
        }
        let validation_data = match &config.data.validation_path {
            Some(path) => {
                let dataset = DocumentDataset::from_jsonl(path, max_seq, config.data.max_sentences)?;
                if !dataset.is_labelled() {
                    return Err(TrainingError::data(format!(
                        "every validation document in {} needs a label",
                        path.display()
                    )));
                }
                Some(dataset)
            }
            None => None,
        };

        let network = HierarchicalAttentionNetwork::new(config.han_config(&device)?)?;
        let optimizer = TrainerOptimizer::from_varmap(network.varmap(), &config.optimizer)?;
        let batcher = DocumentBatcher::new(
            config.data.batch_size,
            config.data.shuffle,
            config.runtime.seed,
            device.clone(),
        )?;
        let logger = Logger::new(LoggingSettings::from_config(
            config.runtime.enable_stdout,
            config.runtime.log_every_n_steps,
        ));

        log::info!(
            "trainer ready: {} training documents, {} validation documents, {} parameters in {} tensors",
            train_data.len(),
            validation_data.as_ref().map_or(0, |d| d.len()),
            network.parameter_count(),
            optimizer.parameter_names().len()
        );

        Ok(Self {
            config,
            device,
            network,
            optimizer,
            loss: BinaryCrossEntropyLoss::new(),
            train_data,
            validation_data,
            batcher,
            metrics: TrainingMetrics::new(),
            logger,
            optimizer_steps: 0,
            epochs_completed: 0,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn network(&self) -> &HierarchicalAttentionNetwork {
        &self.network
    }

    pub fn optimizer_steps(&self) -> usize {
        self.optimizer_steps
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    /// Forward in training mode, backward, and one optimizer update.
    pub fn train_step(&mut self, batch: &DocumentBatch) -> Result<LossMetrics, TrainingError> {
        let labels = batch
            .labels
            .as_ref()
            .ok_or_else(|| TrainingError::data("training batch has no labels"))?;
        let probabilities = self
            .network
            .classifier()
            .forward(&batch.documents, true)?;
        let LossOutput { loss, metrics } = self.loss.compute(&probabilities, labels)?;
        if !metrics.average_loss().is_finite() {
            return Err(TrainingError::runtime(format!(
                "non-finite loss at step {}",
                self.optimizer_steps + 1
            )));
        }

        let grad_norm = self.optimizer.backward_step(&loss)?;
        self.optimizer_steps += 1;

        let snapshot = self.metrics.record_step(
            batch.len() as u64,
            metrics.average_loss() as f64,
            metrics.accuracy() as f64,
            grad_norm,
        );
        if self.logger.should_log(self.optimizer_steps) {
            self.logger.log_training_step(
                self.optimizer_steps,
                self.optimizer.learning_rate(),
                &snapshot,
            );
        }
        Ok(metrics)
    }

    /// One shuffled pass over the training set.
    pub fn train_epoch(&mut self) -> Result<EvaluationSummary, TrainingError> {
        let batches = self.batcher.batches(&self.train_data, self.epochs_completed)?;
        let mut totals = EvaluationMetrics::default();
        for batch in &batches {
            let metrics = self.train_step(batch)?;
            totals.update(
                metrics.average_loss() as f64,
                metrics.total_examples() as u64,
                metrics.correct_examples() as u64,
            );
        }
        self.epochs_completed += 1;
        totals
            .finalize()
            .ok_or_else(|| TrainingError::data("training set produced no batches"))
    }

    /// Inference-mode loss and accuracy over a labelled dataset.
    pub fn evaluate(&self, dataset: &DocumentDataset) -> Result<EvaluationSummary, TrainingError> {
        let batcher = DocumentBatcher::new(
            self.config.data.batch_size,
            false,
            self.config.runtime.seed,
            self.device.clone(),
        )?;
        let classifier = self.network.classifier();
        let mut totals = EvaluationMetrics::default();
        for batch in batcher.batches(dataset, 0)? {
            let labels = batch
                .labels
                .as_ref()
                .ok_or_else(|| TrainingError::data("evaluation requires labelled documents"))?;
            let probabilities = classifier.predict(&batch.documents)?;
            let LossOutput { metrics, .. } = self.loss.compute(&probabilities, labels)?;
            totals.update(
                metrics.average_loss() as f64,
                metrics.total_examples() as u64,
                metrics.correct_examples() as u64,
            );
        }
        totals
            .finalize()
            .ok_or_else(|| TrainingError::data("evaluation dataset is empty"))
    }

    /// Runs the configured number of epochs, evaluating and checkpointing
    /// after each one.
    pub fn fit(&mut self) -> Result<Vec<EpochReport>, TrainingError> {
        log::info!(
            "starting training on {:?}: {} epochs, batch size {}",
            self.device,
            self.config.runtime.epochs,
            self.config.data.batch_size
        );
        let mut reports = Vec::with_capacity(self.config.runtime.epochs);
        while self.epochs_completed < self.config.runtime.epochs {
            let train = self.train_epoch()?;
            let epoch = self.epochs_completed;
            self.logger.log_epoch(epoch, &train);

            let validation = match &self.validation_data {
                Some(dataset) => {
                    let summary = self.evaluate(dataset)?;
                    self.logger.log_evaluation(epoch, &summary);
                    Some(summary)
                }
                None => None,
            };

            let checkpoint = match self.config.runtime.checkpoint_dir.clone() {
                Some(dir) => Some(self.save_checkpoint(&dir, &train, validation.as_ref())?.directory),
                None => None,
            };

            reports.push(EpochReport {
                epoch,
                train,
                validation,
                checkpoint,
            });
        }
        log::info!(
            "training finished after {} epochs: {} optimizer steps this run, {} in total",
            self.epochs_completed,
            self.optimizer.steps_taken(),
            self.optimizer_steps
        );
        Ok(reports)
    }

    fn save_checkpoint(
        &self,
        dir: &Path,
        train: &EvaluationSummary,
        validation: Option<&EvaluationSummary>,
    ) -> Result<CheckpointDescriptor, TrainingError> {
        checkpoint::save_checkpoint(SaveRequest {
            base_dir: dir,
            config: &self.config,
            network: &self.network,
            epoch: self.epochs_completed,
            optimizer_step: self.optimizer_steps,
            train: Some(train),
            validation,
        })
    }

    /// Restores weights and epoch count from the newest checkpoint in the
    /// configured directory. Optimizer moments start fresh.
    pub fn resume_from_latest(&mut self) -> Result<Option<CheckpointDescriptor>, TrainingError> {
        let Some(dir) = self.config.runtime.checkpoint_dir.clone() else {
            return Ok(None);
        };
        let Some(descriptor) = checkpoint::latest_checkpoint(&dir)? else {
            return Ok(None);
        };
        self.resume_from_path(&descriptor.directory).map(Some)
    }

    pub fn resume_from_path(
        &mut self,
        directory: &Path,
    ) -> Result<CheckpointDescriptor, TrainingError> {
        let manifest = checkpoint::load_checkpoint(directory, &mut self.network)?;
        if !manifest.matches_config(&self.config)? {
            log::warn!(
                "checkpoint {} was written under a different configuration",
                directory.display()
            );
        }
        self.epochs_completed = manifest.epoch;
        self.optimizer_steps = manifest.optimizer_step;
        log::info!(
            "resumed from checkpoint {} (epoch {}, step {})",
            directory.display(),
            manifest.epoch,
            manifest.optimizer_step
        );
        Ok(CheckpointDescriptor {
            directory: directory.to_path_buf(),
            manifest,
        })
    }
}
