//! Progress reporting for training runs.
//!
//! Every line goes through the `log` facade; `enable_stdout` additionally
//! prints a compact summary so runs without a logger installed stay readable.

use crate::metrics::{EvaluationSummary, StepSnapshot};

#[derive(Clone, Debug)]
pub struct LoggingSettings {
    pub enable_stdout: bool,
    pub log_every_n_steps: usize,
}

impl LoggingSettings {
    pub fn from_config(enable_stdout: bool, log_every_n_steps: usize) -> Self {
        Self {
            enable_stdout,
            log_every_n_steps: log_every_n_steps.max(1),
        }
    }
}

#[derive(Debug)]
pub struct Logger {
    settings: LoggingSettings,
}

impl Logger {
    pub fn new(settings: LoggingSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LoggingSettings {
        &self.settings
    }

    /// Whether `step` falls on the reporting interval.
    pub fn should_log(&self, step: usize) -> bool {
        step % self.settings.log_every_n_steps == 0
    }

    pub fn log_training_step(&mut self, step: usize, lr: f64, snapshot: &StepSnapshot) {
        let line = training_step_line(step, lr, snapshot);
        log::info!("{line}");
        if self.settings.enable_stdout {
            println!("{line}");
        }
    }

    pub fn log_evaluation(&mut self, epoch: usize, summary: &EvaluationSummary) {
        let line = format!(
            "eval epoch={} loss={:.4} acc={:.2}% docs={}",
            epoch,
            summary.average_loss,
            summary.accuracy * 100.0,
            summary.examples
        );
        log::info!("{line}");
        if self.settings.enable_stdout {
            println!("{line}");
        }
    }

    pub fn log_epoch(&mut self, epoch: usize, summary: &EvaluationSummary) {
        let line = format!(
            "epoch={} train_loss={:.4} train_acc={:.2}% docs={}",
            epoch,
            summary.average_loss,
            summary.accuracy * 100.0,
            summary.examples
        );
        log::info!("{line}");
        if self.settings.enable_stdout {
            println!("{line}");
        }
    }
}

fn training_step_line(step: usize, lr: f64, snapshot: &StepSnapshot) -> String {
    format!(
        "train step={} loss={:.4} loss_ema={:.4} acc={:.2}% docs={}/{} docs/s={:.1} grad_norm={:.3} grad_norm_ema={:.3} lr={:.5e} step_ms={:.1} elapsed={:.1}s",
        step,
        snapshot.step_loss,
        snapshot.loss,
        snapshot.accuracy * 100.0,
        snapshot.documents,
        snapshot.total_documents,
        snapshot.docs_per_sec,
        snapshot.raw_grad_norm,
        snapshot.grad_norm,
        lr,
        snapshot.step_duration.as_secs_f64() * 1000.0,
        snapshot.wall_time.as_secs_f64()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn interval_is_at_least_one() {
        let logger = Logger::new(LoggingSettings::from_config(false, 0));
        assert_eq!(logger.settings().log_every_n_steps, 1);
        assert!(logger.should_log(7));

        let sparse = Logger::new(LoggingSettings::from_config(false, 5));
        assert!(sparse.should_log(10));
        assert!(!sparse.should_log(11));
    }

    #[test]
    fn step_line_reports_timing_and_smoothed_norm() {
        let snapshot = StepSnapshot {
            loss: 0.6,
            step_loss: 0.5,
            accuracy: 0.75,
            documents: 4,
            docs_per_sec: 80.0,
            grad_norm: 1.25,
            raw_grad_norm: 1.5,
            total_documents: 12,
            wall_time: Duration::from_millis(2500),
            step_duration: Duration::from_millis(50),
        };
        let line = training_step_line(3, 1e-3, &snapshot);
        assert!(line.starts_with("train step=3 loss=0.5000 loss_ema=0.6000 acc=75.00% docs=4/12"));
        assert!(line.contains("grad_norm=1.500 grad_norm_ema=1.250"));
        assert!(line.contains("step_ms=50.0 elapsed=2.5s"));
    }
}
