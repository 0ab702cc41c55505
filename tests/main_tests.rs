use std::{fs, path::Path, process::Command};

use anyhow::Result;
use candle_core::Device;
use han::{predict_dataset, setup_device};
use model::HierarchicalAttentionNetwork;
use tempfile::tempdir;
use training::{checkpoint, DocumentDataset, Trainer, TrainingConfig};

const DOCUMENTS: &[&str] = &[
    r#"{"sentences": [[1, 4, 5], [6, 7]], "label": 1}"#,
    r#"{"sentences": [[2, 8], [9, 10, 11, 12, 13, 14]], "label": 0}"#,
    r#"{"sentences": [[1, 9]], "label": 1}"#,
    r#"{"sentences": [[2], [3, 3], [4]], "label": 0}"#,
];

fn write_run(dir: &Path) -> Result<TrainingConfig> {
    fs::write(dir.join("docs.jsonl"), DOCUMENTS.join("\n"))?;
    let config = r#"
[model]
max_seq = 5
vocab_size = 16
embedding_size = 4
word_rnn_size = 3
sentence_rnn_size = 2

[data]
train_path = "docs.jsonl"
batch_size = 2

[runtime]
epochs = 1
seed = 3
enable_stdout = false
checkpoint_dir = "ckpt"
"#;
    fs::write(dir.join("han.toml"), config)?;
    Ok(TrainingConfig::from_path(dir.join("han.toml"))?)
}

#[test]
fn device_setup_honours_force_cpu() {
    std::env::set_var("CANDLE_FORCE_CPU", "1");
    assert!(matches!(setup_device(), Device::Cpu));
}

#[test]
fn checkpoint_predictions_match_trained_network() -> Result<()> {
    let tmp = tempdir()?;
    let config = write_run(tmp.path())?;
    let mut trainer = Trainer::with_device(config.clone(), Device::Cpu)?;
    let reports = trainer.fit()?;
    let checkpoint_dir = reports[0].checkpoint.clone().expect("checkpoint");

    let dataset = DocumentDataset::from_jsonl(tmp.path().join("docs.jsonl"), 5, None)?;
    let expected = predict_dataset(trainer.network(), &dataset, 2, false)?;

    let mut restored = HierarchicalAttentionNetwork::new(config.han_config(&Device::Cpu)?)?;
    checkpoint::load_checkpoint(&checkpoint_dir, &mut restored)?;
    let actual = predict_dataset(&restored, &dataset, 2, false)?;
    assert_eq!(actual, expected);
    assert!(actual.iter().all(|p| p.probability > 0.0 && p.probability < 1.0));
    Ok(())
}

#[test]
fn cli_trains_then_predicts() -> Result<()> {
    let tmp = tempdir()?;
    write_run(tmp.path())?;
    let config = tmp.path().join("han.toml");

    let status = Command::new(env!("CARGO_BIN_EXE_han"))
        .env("CANDLE_FORCE_CPU", "1")
        .arg("train")
        .arg("--config")
        .arg(&config)
        .arg("--override")
        .arg("runtime.epochs=2")
        .status()?;
    assert!(status.success());
    let latest = checkpoint::latest_checkpoint(&tmp.path().join("ckpt"))?.expect("checkpoint");
    assert_eq!(latest.manifest.epoch, 2);

    let output = Command::new(env!("CARGO_BIN_EXE_han"))
        .env("CANDLE_FORCE_CPU", "1")
        .arg("predict")
        .arg("--config")
        .arg(&config)
        .arg("--weights")
        .arg(&latest.directory)
        .arg("--input")
        .arg(tmp.path().join("docs.jsonl"))
        .arg("--attention")
        .output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8(output.stdout)?;
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(serde_json::from_str::<serde_json::Value>)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), DOCUMENTS.len());
    assert_eq!(lines[1]["word_attention"][1].as_array().map(Vec::len), Some(5));
    assert_eq!(lines[3]["sentence_attention"].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[test]
fn missing_weights_fail_with_status_one() -> Result<()> {
    let tmp = tempdir()?;
    write_run(tmp.path())?;
    let output = Command::new(env!("CARGO_BIN_EXE_han"))
        .env("CANDLE_FORCE_CPU", "1")
        .arg("predict")
        .arg("--config")
        .arg(tmp.path().join("han.toml"))
        .arg("--weights")
        .arg(tmp.path().join("absent.safetensors"))
        .arg("--input")
        .arg(tmp.path().join("docs.jsonl"))
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not exist"));
    Ok(())
}
