use anyhow::{Context, Result};
use burn::config::Config;
use clap::{Parser, Subcommand};
use dinoseg::{
    burn_backend_types::{InferenceBackend, InferenceDevice, NAME},
    inspect::{run_inspect, InspectArgs},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dinoseg")]
#[command(about = "Segmentation data pipeline for fine-tuning vision transformer backbones")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one epoch of the training and validation loaders and report what they produce
    Inspect(InspectArgs),

    /// Show backend information
    Info,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let device = InferenceDevice::default();

    match cli.command {
        Commands::Inspect(args) => {
            let config = args.resolve()?;
            if let Some(path) = &args.save_config {
                config
                    .save(path)
                    .with_context(|| format!("Failed to write config file: {}", path.display()))?;
                tracing::info!(path = %path.display(), "configuration saved");
            }

            tracing::info!(backend = NAME, root = %config.root.display(), "inspecting dataset");
            let report = run_inspect::<InferenceBackend>(&config, args.check_pairing, &device)?;

            println!("Dataset: {}", config.root.display());
            println!(
                "  train: {} images, {} masks, {} batches",
                report.splits.train_images.len(),
                report.splits.train_masks.len(),
                report.train.batches
            );
            println!(
                "  valid: {} images, {} masks, {} batches",
                report.splits.valid_images.len(),
                report.splits.valid_masks.len(),
                report.valid.batches
            );
            if let Some(dims) = report.train.image_dims.or(report.valid.image_dims) {
                println!("  batch shape: {dims:?}");
            }
            Ok(())
        }

        Commands::Info => {
            println!("dinoseg Information:");
            println!("  Backend: {}", NAME);
            println!("  Device: {device:?}");
            Ok(())
        }
    }
}
