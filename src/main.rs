use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use han::{predict_dataset, setup_device};
use model::HierarchicalAttentionNetwork;
use training::{
    apply_overrides, checkpoint, DocumentDataset, OverrideArg, Trainer, TrainingConfig,
};

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("han failed: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Hierarchical attention network document classifier", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a network from a TOML or JSON config.
    Train {
        #[arg(short, long, value_name = "PATH", help = "Path to training config file")]
        config: PathBuf,

        #[arg(
            long = "override",
            value_name = "KEY=VALUE",
            help = "Override configuration value using dot-separated paths"
        )]
        overrides: Vec<OverrideArg>,

        #[arg(long, help = "Resume from the latest checkpoint if available")]
        resume: bool,
    },
    /// Print one JSON line per input document.
    Predict {
        #[arg(short, long, value_name = "PATH", help = "Config the weights were trained with")]
        config: PathBuf,

        #[arg(
            long = "override",
            value_name = "KEY=VALUE",
            help = "Override configuration value using dot-separated paths"
        )]
        overrides: Vec<OverrideArg>,

        #[arg(
            short,
            long,
            value_name = "PATH",
            help = "Safetensors weights file or checkpoint directory"
        )]
        weights: PathBuf,

        #[arg(short, long, value_name = "PATH", help = "JSON-lines documents to classify")]
        input: PathBuf,

        #[arg(long, help = "Include word and sentence attention weights")]
        attention: bool,
    },
}

fn run() -> Result<()> {
    match Args::parse().command {
        Command::Train {
            config,
            overrides,
            resume,
        } => train(&config, &overrides, resume),
        Command::Predict {
            config,
            overrides,
            weights,
            input,
            attention,
        } => predict(&config, &overrides, &weights, &input, attention),
    }
}

fn load_config(path: &Path, overrides: &[OverrideArg]) -> Result<TrainingConfig> {
    let config = TrainingConfig::load(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    Ok(apply_overrides(config, overrides)?)
}

fn train(config_path: &Path, overrides: &[OverrideArg], resume: bool) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    let mut trainer = Trainer::with_device(config, setup_device())?;

    if resume {
        match trainer.resume_from_latest()? {
            Some(descriptor) => log::info!(
                "resumed from checkpoint {} (epoch {})",
                descriptor.directory.display(),
                descriptor.manifest.epoch
            ),
            None => log::warn!("--resume given but no checkpoint was found"),
        }
    }

    let reports = trainer.fit()?;
    if let Some(last) = reports.last() {
        log::info!(
            "finished {} epochs: train loss {:.4}, accuracy {:.2}%",
            last.epoch,
            last.train.average_loss,
            last.train.accuracy * 100.0
        );
    }
    Ok(())
}

fn predict(
    config_path: &Path,
    overrides: &[OverrideArg],
    weights: &Path,
    input: &Path,
    with_attention: bool,
) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    let device = setup_device();
    let mut network = HierarchicalAttentionNetwork::new(config.han_config(&device)?)?;

    if weights.is_dir() {
        checkpoint::load_checkpoint(weights, &mut network)?;
    } else if weights.is_file() {
        network
            .load_weights(weights)
            .with_context(|| format!("failed to load weights {}", weights.display()))?;
    } else {
        bail!("weights path {} does not exist", weights.display());
    }

    let dataset =
        DocumentDataset::from_jsonl(input, config.model.max_seq, config.data.max_sentences)?;
    let predictions = predict_dataset(&network, &dataset, config.data.batch_size, with_attention)?;
    for prediction in &predictions {
        println!("{}", serde_json::to_string(prediction)?);
    }
    Ok(())
}
