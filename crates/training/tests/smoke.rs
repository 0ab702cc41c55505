use std::{fs, path::Path};

use anyhow::Result;
use candle_core::{Device, Tensor};
use tempfile::tempdir;
use training::{
    apply_overrides, DocumentBatcher, DocumentDataset, OverrideArg, Trainer, TrainingConfig,
    TrainingError,
};

fn write_corpus(path: &Path, documents: usize, labelled: bool) -> Result<()> {
    let mut lines = Vec::with_capacity(documents);
    for i in 0..documents {
        let positive = i % 2 == 0;
        let marker = if positive { 1 } else { 2 };
        let sentences: Vec<Vec<u32>> = (0..(1 + i % 3))
            .map(|s| {
                (0..(2 + (i + s) % 4))
                    .map(|t| if t == 0 { marker } else { 3 + ((i + s + t) % 15) as u32 })
                    .collect()
            })
            .collect();
        let line = if labelled {
            serde_json::json!({"sentences": sentences, "label": u8::from(positive)})
        } else {
            serde_json::json!({ "sentences": sentences })
        };
        lines.push(line.to_string());
    }
    fs::write(path, lines.join("\n"))?;
    Ok(())
}

fn write_config(dir: &Path, extra_model: &str, epochs: usize, checkpoints: bool) -> Result<TrainingConfig> {
    let extra_runtime = if checkpoints { "checkpoint_dir = \"ckpt\"" } else { "" };
    write_corpus(&dir.join("train.jsonl"), 12, true)?;
    write_corpus(&dir.join("valid.jsonl"), 4, true)?;
    let toml = format!(
        r#"
[model]
max_seq = 6
word_rnn_size = 4
sentence_rnn_size = 3
{extra_model}

[data]
train_path = "train.jsonl"
validation_path = "valid.jsonl"
batch_size = 4

[optimizer]
learning_rate = 0.01

[runtime]
epochs = {epochs}
seed = 5
enable_stdout = false
{extra_runtime}
"#
    );
    let path = dir.join("han.toml");
    fs::write(&path, toml)?;
    Ok(TrainingConfig::from_path(&path)?)
}

fn parameter(trainer: &Trainer, name: &str) -> Result<Vec<f32>> {
    let data = trainer.network().varmap().data().lock().unwrap();
    let var = data.get(name).expect("parameter present");
    Ok(var.as_tensor().flatten_all()?.to_vec1::<f32>()?)
}

fn predictions(trainer: &Trainer, dataset: &DocumentDataset) -> Result<Vec<f32>> {
    let batcher = DocumentBatcher::new(8, false, 0, Device::Cpu)?;
    let classifier = trainer.network().classifier();
    let mut out = Vec::new();
    for batch in batcher.batches(dataset, 0)? {
        out.extend(classifier.predict(&batch.documents)?.flatten_all()?.to_vec1::<f32>()?);
    }
    Ok(out)
}

#[test]
fn one_step_updates_parameters() -> Result<()> {
    let tmp = tempdir()?;
    let config = write_config(tmp.path(), "vocab_size = 20\nembedding_size = 5", 2, false)?;
    let mut trainer = Trainer::with_device(config, Device::Cpu)?;

    let before = parameter(&trainer, "document_encoder.output.weight")?;
    let context_before = parameter(&trainer, "sentence_encoder.word_attention.context")?;

    let dataset = DocumentDataset::from_jsonl(tmp.path().join("train.jsonl"), 6, None)?;
    let batcher = DocumentBatcher::new(4, false, 0, Device::Cpu)?;
    let batch = batcher.batches(&dataset, 0)?.remove(0);
    let metrics = trainer.train_step(&batch)?;

    assert!(metrics.average_loss().is_finite());
    assert_eq!(metrics.total_examples(), 4);
    assert_eq!(trainer.optimizer_steps(), 1);
    assert_ne!(parameter(&trainer, "document_encoder.output.weight")?, before);
    assert_ne!(
        parameter(&trainer, "sentence_encoder.word_attention.context")?,
        context_before
    );
    Ok(())
}

#[test]
fn fit_reports_every_epoch_and_checkpoints() -> Result<()> {
    let tmp = tempdir()?;
    let config = write_config(
        tmp.path(),
        "vocab_size = 20\nembedding_size = 5\nrecurrent = \"lstm\"",
        2,
        true,
    )?;
    let mut trainer = Trainer::with_device(config.clone(), Device::Cpu)?;
    let reports = trainer.fit()?;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].epoch, 1);
    assert_eq!(reports[1].epoch, 2);
    for report in &reports {
        assert_eq!(report.train.examples, 12);
        assert!(report.train.average_loss.is_finite());
        let validation = report.validation.as_ref().expect("validation summary");
        assert_eq!(validation.examples, 4);
        let dir = report.checkpoint.as_ref().expect("checkpoint");
        assert!(dir.join("model.safetensors").is_file());
        assert!(dir.join("manifest.json").is_file());
    }

    // A fresh trainer with a different seed resumes the latest weights.
    let valid = DocumentDataset::from_jsonl(tmp.path().join("valid.jsonl"), 6, None)?;
    let expected = predictions(&trainer, &valid)?;
    let reseeded = apply_overrides(config, &["runtime.seed=99".parse::<OverrideArg>().unwrap()])?;
    let mut resumed = Trainer::with_device(reseeded, Device::Cpu)?;
    assert_ne!(predictions(&resumed, &valid)?, expected);

    let descriptor = resumed.resume_from_latest()?.expect("latest checkpoint");
    assert_eq!(descriptor.manifest.epoch, 2);
    assert!(descriptor.manifest.matches_config(trainer.config())?);
    assert!(!descriptor.manifest.matches_config(resumed.config())?);
    assert_eq!(resumed.epochs_completed(), 2);
    assert_eq!(predictions(&resumed, &valid)?, expected);
    assert!(resumed.fit()?.is_empty());
    Ok(())
}

#[test]
fn corrupted_checkpoint_is_rejected() -> Result<()> {
    let tmp = tempdir()?;
    let config = write_config(tmp.path(), "vocab_size = 20\nembedding_size = 5", 1, true)?;
    let mut trainer = Trainer::with_device(config, Device::Cpu)?;
    let reports = trainer.fit()?;
    let dir = reports[0].checkpoint.clone().expect("checkpoint");

    let weights = dir.join("model.safetensors");
    let mut bytes = fs::read(&weights)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&weights, bytes)?;

    assert!(trainer.resume_from_path(&dir).is_err());
    Ok(())
}

#[test]
fn pretrained_embeddings_stay_frozen() -> Result<()> {
    let tmp = tempdir()?;
    let matrix = Tensor::randn(0f32, 1.0, (20, 5), &Device::Cpu)?;
    matrix.write_npy(tmp.path().join("embeddings.npy"))?;
    let config = write_config(tmp.path(), "pretrained_embeddings = \"embeddings.npy\"", 1, false)?;

    let mut trainer = Trainer::with_device(config, Device::Cpu)?;
    trainer.train_epoch()?;

    let table = trainer
        .network()
        .graph()
        .sentence_encoder()
        .embedding()
        .weight();
    assert_eq!(
        table.flatten_all()?.to_vec1::<f32>()?,
        matrix.flatten_all()?.to_vec1::<f32>()?
    );
    let data = trainer.network().varmap().data().lock().unwrap();
    assert!(!data.is_empty());
    assert!(data.keys().all(|name| !name.contains("embedding")));
    Ok(())
}

#[test]
fn unlabelled_training_data_is_rejected() -> Result<()> {
    let tmp = tempdir()?;
    let mut config = write_config(tmp.path(), "vocab_size = 20\nembedding_size = 5", 2, false)?;
    let unlabelled = tmp.path().join("unlabelled.jsonl");
    write_corpus(&unlabelled, 3, false)?;
    config.data.train_path = unlabelled;

    assert!(matches!(
        Trainer::with_device(config, Device::Cpu),
        Err(TrainingError::Data(_))
    ));
    Ok(())
}
