use crate::export::{self, IdaConfig, IdaListing, ListingExporter};
use crate::loader;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressIterator;
use serde::Deserialize;
use sparse_memory::SparseImage;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Parser)]
pub struct Cli {
    #[clap(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    Generate(Generate),
    BulkGenerate(BulkGenerate),
    ShowImage(ShowImage),
}

#[derive(Debug, clap::Args)]
struct Generate {
    binary: PathBuf,
    /// Base path for the generated `.asm`/`.bytes` pair; defaults to the
    /// binary path itself.
    #[clap(short, long)]
    output_base: Option<PathBuf>,
    /// Only produce the `.bytes` file (no IDA needed).
    #[clap(long)]
    skip_listing: bool,
    #[clap(long, default_value = "generator.yaml")]
    config: PathBuf,
}

#[derive(Debug, clap::Args)]
struct BulkGenerate {
    input_directory: PathBuf,
    output_directory: PathBuf,
    /// Only produce the `.bytes` files (no IDA needed).
    #[clap(long)]
    skip_listing: bool,
    #[clap(long, default_value = "generator.yaml")]
    config: PathBuf,
}

#[derive(Debug, clap::Args)]
struct ShowImage {
    binary: PathBuf,
}

#[derive(Deserialize, Clone)]
pub struct GeneratorConfig {
    pub ida: IdaConfig,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.action {
            Action::Generate(args) => action_generate(args).await,
            Action::BulkGenerate(args) => action_bulk_generate(args).await,
            Action::ShowImage(args) => action_show_image(args).await,
        }
    }
}

fn load_generator_config(path: &Path) -> Result<GeneratorConfig> {
    let config = std::fs::read_to_string(path)
        .with_context(|| format!("Reading generator config file {}", path.display()))?;
    let config = serde_yaml::from_str(&config)
        .with_context(|| format!("Parsing generator config file {} as YAML", path.display()))?;
    Ok(config)
}

fn make_listing_exporter(skip_listing: bool, config_path: &Path) -> Result<Option<IdaListing>> {
    if skip_listing {
        return Ok(None);
    }
    let config = load_generator_config(config_path)?;
    Ok(Some(IdaListing::new(config.ida)))
}

fn load_image(path: &Path) -> Result<SparseImage> {
    let data = std::fs::read(path).with_context(|| format!("Reading {}", path.display()))?;
    let file = object::File::parse(data.as_slice())
        .with_context(|| format!("Parsing {} as an executable", path.display()))?;
    loader::load_executable(&file).with_context(|| format!("Loading {}", path.display()))
}

async fn action_generate(args: Generate) -> Result<()> {
    let exporter = make_listing_exporter(args.skip_listing, &args.config)?;
    let image = load_image(&args.binary)?;

    let output_base = args.output_base.unwrap_or_else(|| args.binary.clone());

    export::generate(
        exporter.as_ref().map(|e| e as &dyn ListingExporter),
        &image,
        &args.binary,
        &output_base,
    )
    .await
}

async fn action_bulk_generate(args: BulkGenerate) -> Result<()> {
    std::fs::create_dir_all(&args.output_directory).context("Creating output directory")?;

    let exporter = make_listing_exporter(args.skip_listing, &args.config)?;
    let exporter = exporter.as_ref().map(|e| e as &dyn ListingExporter);

    let binaries = walkdir::WalkDir::new(&args.input_directory)
        .into_iter()
        .map(|r| r.map_err(|e| e.into()))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect::<Vec<_>>();

    info!("Found {} binaries", binaries.len());

    let mut failures = 0usize;
    for binary in binaries.iter().progress() {
        let result: Result<()> = async {
            let image = load_image(binary)?;

            let output_base = args
                .output_directory
                .join(binary.strip_prefix(&args.input_directory).unwrap());
            std::fs::create_dir_all(output_base.parent().unwrap())?;

            export::generate(exporter, &image, binary, &output_base).await
        }
        .await;

        if let Err(e) = result {
            error!("Failed to process {}: {:?}", binary.display(), e);
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} binaries failed", failures, binaries.len());
    }

    Ok(())
}

async fn action_show_image(args: ShowImage) -> Result<()> {
    let image = load_image(&args.binary)?;

    println!("Memory map:");
    println!("{}", image.map());

    let loaded: u64 = image.iter().map(|r| r.len()).sum();
    let span = image.max_address() - image.min_address();
    println!(
        "Loaded: {}/{} bytes ({:.2}%)",
        loaded,
        span,
        100.0 * loaded as f64 / span as f64
    );

    Ok(())
}
