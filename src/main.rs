//! Photo Seed command line
//!
//! Scans a photo for a seed, benchmarks a labelled photo directory, or
//! manages the trained recognizer's model files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use photo_seed::bench::{mime_type_for_path, run_benchmark};
use photo_seed::config::{self, AppConfig};
use photo_seed::ocr::models::ModelManager;
use photo_seed::{PhotoPipelineOptions, PhotoSeedPipeline};

/// Photo Seed - turn a photo into a short numeric seed
#[derive(Parser, Debug)]
#[command(name = "photo-seed")]
#[command(about = "Extract a numeric seed from a photo via OCR, with palette and random fallbacks")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract a seed from one photo
    Scan {
        image: PathBuf,

        /// Brightness tweak, -40..=40
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        brightness: i32,

        /// Overall OCR budget in milliseconds
        #[arg(long)]
        ocr_timeout_ms: Option<u64>,

        /// Palette extraction budget in milliseconds
        #[arg(long)]
        palette_timeout_ms: Option<u64>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run every photo in a directory and report exact-match accuracy
    Bench {
        dir: PathBuf,

        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        brightness: i32,

        /// Print CSV rows instead of the JSON report
        #[arg(long)]
        csv: bool,
    },

    /// Show trained recognizer model status
    Models {
        /// Download missing model files
        #[arg(long)]
        fetch: bool,
    },

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Scan {
            image,
            brightness,
            ocr_timeout_ms,
            palette_timeout_ms,
            json,
        } => {
            let pipeline = PhotoSeedPipeline::new(load_or_default_config(args.config.as_deref())?);
            let options = PhotoPipelineOptions {
                brightness_tweak: brightness,
                ocr_timeout_ms,
                palette_timeout_ms,
            };
            scan(&pipeline, &image, &options, json).await
        }
        Command::Bench { dir, brightness, csv } => {
            let pipeline = PhotoSeedPipeline::new(load_or_default_config(args.config.as_deref())?);
            let options = PhotoPipelineOptions {
                brightness_tweak: brightness,
                ..Default::default()
            };
            let report = run_benchmark(&pipeline, &dir, &options).await?;
            if csv {
                print!("{}", report.to_csv());
            } else {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(())
        }
        Command::Models { fetch } => {
            let config = load_or_default_config(args.config.as_deref())?;
            models(&config, fetch).await
        }
        Command::InitConfig { force } => {
            let path = match args.config {
                Some(path) => path,
                None => default_config_path()?,
            };
            if path.exists() && !force {
                anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
            }
            config::save_config(&AppConfig::default(), &path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

fn default_config_path() -> Result<PathBuf> {
    Ok(config::config_dir()?.join("config.toml"))
}

/// Load the given config file, or the default location when it exists
fn load_or_default_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(path) = default_config_path() {
        if path.exists() {
            let config = config::load_config(&path)?;
            info!("Loaded configuration from {:?}", path);
            return Ok(config);
        }
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}

async fn scan(pipeline: &PhotoSeedPipeline, image: &Path, options: &PhotoPipelineOptions, json: bool) -> Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read {:?}", image))?;
    let result = pipeline
        .process_photo_for_seed(&bytes, mime_type_for_path(image), options)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", result.seed);
    println!("{}", result.message);
    for block in &result.explainability {
        println!();
        println!("{}", block.title);
        for line in &block.lines {
            println!("  {}", line);
        }
    }
    Ok(())
}

async fn models(config: &AppConfig, fetch: bool) -> Result<()> {
    let manager = ModelManager::new(&config.models)?;
    println!("Models directory: {}", manager.models_dir().display());

    if fetch {
        for path in manager.fetch_missing().await? {
            println!("Downloaded {}", path.display());
        }
    }

    for status in manager.model_status() {
        let size = status
            .size_bytes
            .map(|bytes| format!("{} bytes", bytes))
            .unwrap_or_else(|| "missing".to_string());
        println!(
            "  {:<10} {:<10} {}",
            status.filename,
            if status.available { "ready" } else { "not ready" },
            size
        );
    }
    Ok(())
}
