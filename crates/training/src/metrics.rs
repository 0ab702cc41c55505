use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    alpha: f64,
    value: Option<f64>,
}

impl ExponentialMovingAverage {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let v = match self.value {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        };
        self.value = Some(v);
        v
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Running loss and throughput over training steps.
#[derive(Debug)]
pub struct TrainingMetrics {
    step_timer: Instant,
    start_time: Instant,
    documents_processed: u64,
    loss_ema: ExponentialMovingAverage,
    throughput_ema: ExponentialMovingAverage,
    grad_norm_ema: ExponentialMovingAverage,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            step_timer: now,
            start_time: now,
            documents_processed: 0,
            loss_ema: ExponentialMovingAverage::new(0.1),
            throughput_ema: ExponentialMovingAverage::new(0.1),
            grad_norm_ema: ExponentialMovingAverage::new(0.1),
        }
    }

    pub fn record_step(
        &mut self,
        documents: u64,
        loss: f64,
        accuracy: f64,
        grad_norm: f64,
    ) -> StepSnapshot {
        let now = Instant::now();
        let step_duration = now.duration_since(self.step_timer);
        self.step_timer = now;

        self.documents_processed = self.documents_processed.saturating_add(documents);
        let step_docs_per_sec = if step_duration > Duration::ZERO {
            documents as f64 / step_duration.as_secs_f64()
        } else {
            0.0
        };

        StepSnapshot {
            loss: self.loss_ema.update(loss),
            step_loss: loss,
            accuracy,
            documents,
            docs_per_sec: self.throughput_ema.update(step_docs_per_sec),
            grad_norm: self.grad_norm_ema.update(grad_norm),
            raw_grad_norm: grad_norm,
            total_documents: self.documents_processed,
            wall_time: now.duration_since(self.start_time),
            step_duration,
        }
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct StepSnapshot {
    /// Smoothed loss.
    pub loss: f64,
    pub step_loss: f64,
    pub accuracy: f64,
    pub documents: u64,
    pub docs_per_sec: f64,
    pub grad_norm: f64,
    pub raw_grad_norm: f64,
    pub total_documents: u64,
    pub wall_time: Duration,
    pub step_duration: Duration,
}

/// Example-weighted accumulation of per-batch loss and accuracy.
#[derive(Debug, Default)]
pub struct EvaluationMetrics {
    loss_sum: f64,
    example_count: u64,
    correct_examples: u64,
}

impl EvaluationMetrics {
    pub fn update(&mut self, loss: f64, examples: u64, correct: u64) {
        self.loss_sum += loss * examples as f64;
        self.example_count += examples;
        self.correct_examples += correct;
    }

    pub fn finalize(self) -> Option<EvaluationSummary> {
        if self.example_count == 0 {
            None
        } else {
            Some(EvaluationSummary {
                average_loss: self.loss_sum / self.example_count as f64,
                accuracy: self.correct_examples as f64 / self.example_count as f64,
                examples: self.example_count,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSummary {
    pub average_loss: f64,
    pub accuracy: f64,
    pub examples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_starts_from_first_sample() {
        let mut ema = ExponentialMovingAverage::new(0.5);
        assert_eq!(ema.value(), None);
        assert_eq!(ema.update(2.0), 2.0);
        assert_eq!(ema.update(4.0), 3.0);
    }

    #[test]
    fn evaluation_weights_batches_by_size() {
        let mut metrics = EvaluationMetrics::default();
        metrics.update(1.0, 3, 2);
        metrics.update(0.0, 1, 1);
        let summary = metrics.finalize().expect("summary");
        assert!((summary.average_loss - 0.75).abs() < 1e-12);
        assert!((summary.accuracy - 0.75).abs() < 1e-12);
        assert_eq!(summary.examples, 4);
        assert!(EvaluationMetrics::default().finalize().is_none());
    }

    #[test]
    fn steps_accumulate_documents() {
        let mut metrics = TrainingMetrics::new();
        metrics.record_step(4, 0.7, 0.5, 1.0);
        let snapshot = metrics.record_step(2, 0.5, 1.0, 0.5);
        assert_eq!(snapshot.total_documents, 6);
        assert_eq!(snapshot.step_loss, 0.5);
        assert!(snapshot.loss > 0.5 && snapshot.loss < 0.7);
        assert_eq!(snapshot.raw_grad_norm, 0.5);
    }
}
