//! DropCraft CLI
//!
//! Command-line driver for the airdrop distribution engine: aggregate
//! contribution sources, smooth small allocations, commit the result to a
//! Merkle tree and answer proof requests against the published document.

mod pipeline;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use dropcraft_aggregator::{load_contributions, DeltaLedger};
use dropcraft_core::{
    contributions_to_json, format_hash, parse_amount, Address, ContributionMap,
};
use dropcraft_distribution::{Distribution, DistributionDocument, JsonCheckpoint, NoCheckpoint};
use dropcraft_logging::LogLevel;
use dropcraft_normalizer::{DistributionStats, NormalizeParams};
use dropcraft_settings::Settings;

/// DropCraft - Merkle airdrop distribution builder
#[derive(Parser)]
#[command(name = "dropcraft")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default settings file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Merge the configured sources into one contribution map
    Aggregate {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Raise small allocations to the threshold
    Normalize {
        /// Contribution map (`{ address: amount }` JSON)
        input: PathBuf,

        #[command(flatten)]
        smoothing: SmoothingArgs,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Build the distribution document from a contribution map
    Build {
        /// Contribution map (`{ address: amount }` JSON)
        input: PathBuf,

        #[command(flatten)]
        smoothing: SmoothingArgs,

        /// Input is already normalized
        #[arg(long)]
        skip_normalize: bool,

        /// Output file (settings document path if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print the claim record for an address
    Proof {
        address: String,

        /// Distribution document (settings document path if omitted)
        #[arg(short, long)]
        document: Option<PathBuf>,
    },

    /// Check a distribution document, or one claim in it
    Verify {
        /// Only check this address
        address: Option<String>,

        /// Distribution document (settings document path if omitted)
        #[arg(short, long)]
        document: Option<PathBuf>,
    },

    /// Summarize a contribution map or distribution document
    Stats {
        input: PathBuf,
    },

    /// Run the full pipeline from the settings file
    Run {
        /// Recompute every step, ignoring stored checkpoints
        #[arg(long)]
        no_checkpoints: bool,
    },
}

/// Overrides for the smoothing section of the settings.
#[derive(clap::Args)]
struct SmoothingArgs {
    /// Floor every recipient is raised to (base units, decimal or 0x hex)
    #[arg(long)]
    threshold: Option<String>,

    /// Amount above the floor that is never clawed back
    #[arg(long)]
    surplus_band: Option<String>,
}

impl SmoothingArgs {
    fn params(&self, settings: &Settings) -> Result<NormalizeParams> {
        let mut params = settings.smoothing.params()?;
        if let Some(threshold) = &self.threshold {
            params.threshold = parse_amount(threshold).context("Invalid --threshold")?;
        }
        if let Some(band) = &self.surplus_band {
            params.surplus_band = parse_amount(band).context("Invalid --surplus-band")?;
        }
        Ok(params)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load_or_default(),
    }
    .context("Failed to load settings")?;

    let level: LogLevel = settings
        .logging
        .level
        .parse()
        .context("Invalid logging.level in settings")?;
    dropcraft_logging::init(level.max(LogLevel::from_verbose(cli.verbose)));

    match cli.command {
        Commands::Init { force } => init_settings(&settings, force),
        Commands::Aggregate { out } => aggregate(&settings, out.as_deref()),
        Commands::Normalize { input, smoothing, out } => {
            let params = smoothing.params(&settings)?;
            let contributions = read_contributions(&input)?;
            let normalized =
                pipeline::normalize_logged(&contributions, &params, settings.smoothing.decimals)?;
            emit(out.as_deref(), &contributions_to_json(&normalized))
        }
        Commands::Build { input, smoothing, skip_normalize, out } => {
            let params = smoothing.params(&settings)?;
            build(&settings, &input, &params, skip_normalize, out)
        }
        Commands::Proof { address, document } => {
            let document = read_document(&settings, document)?;
            let address = Address::parse(&address)?;
            let claim = document.claim(&address)?;
            println!("{}", serde_json::to_string_pretty(claim)?);
            Ok(())
        }
        Commands::Verify { address, document } => verify(&settings, address, document),
        Commands::Stats { input } => stats(&settings, &input),
        Commands::Run { no_checkpoints } => {
            let document = if no_checkpoints || !settings.output.checkpoints {
                pipeline::run(&settings, &NoCheckpoint)?
            } else {
                pipeline::run(&settings, &JsonCheckpoint::new(settings.checkpoint_dir()))?
            };
            println!(
                "Distribution of {} claims, total {:#x}, root {}",
                document.claims.len(),
                document.token_total,
                format_hash(&document.merkle_root)
            );
            println!("Written to {}", settings.document_path().display());
            Ok(())
        }
    }
}

fn init_settings(settings: &Settings, force: bool) -> Result<()> {
    let path = settings
        .config_path()
        .map(Path::to_path_buf)
        .unwrap_or_else(dropcraft_settings::default_settings_path);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Settings::default().save_to(&path)?;
    println!("Wrote default settings to {}", path.display());
    Ok(())
}

fn aggregate(settings: &Settings, out: Option<&Path>) -> Result<()> {
    settings.validate().context("Invalid settings")?;
    let ledger_path = settings.ledger_path();
    let mut ledger = DeltaLedger::load(&ledger_path)
        .with_context(|| format!("Failed to load ledger {}", ledger_path.display()))?;
    let contributions = pipeline::aggregate(settings, &mut ledger)?;
    ledger.flush(&ledger_path)?;
    info!("Aggregated {} contributors", contributions.len());
    emit(out, &contributions_to_json(&contributions))
}

fn build(
    settings: &Settings,
    input: &Path,
    params: &NormalizeParams,
    skip_normalize: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    let contributions = read_contributions(input)?;
    let normalized = if skip_normalize {
        contributions
    } else {
        pipeline::normalize_logged(&contributions, params, settings.smoothing.decimals)?
    };
    let document = Distribution::from_contributions(&normalized)?.to_document()?;
    let path = out.unwrap_or_else(|| settings.document_path());
    document.save(&path)?;
    println!("Merkle root: {}", format_hash(&document.merkle_root));
    println!("Token total: {:#x}", document.token_total);
    Ok(())
}

fn verify(settings: &Settings, address: Option<String>, document: Option<PathBuf>) -> Result<()> {
    let document = read_document(settings, document)?;
    match address {
        Some(address) => {
            let address = Address::parse(&address)?;
            if !document.verify_claim(&address)? {
                bail!("Proof for {} does not fold to the root", address);
            }
            println!("Claim for {} is valid", address);
        }
        None => {
            document.validate()?;
            println!(
                "Document is valid: {} claims, total {:#x}",
                document.claims.len(),
                document.token_total
            );
        }
    }
    Ok(())
}

fn stats(settings: &Settings, input: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let contributions: ContributionMap = match DistributionDocument::from_json(&contents) {
        Ok(document) => document
            .distribution()?
            .entries()
            .iter()
            .map(|entry| (entry.address, entry.amount))
            .collect(),
        Err(_) => dropcraft_core::contributions_from_json(&contents)?,
    };
    let stats = DistributionStats::of(&contributions)?;
    stats.log(&input.display().to_string(), settings.smoothing.decimals);
    println!("{}", stats);
    Ok(())
}

fn read_contributions(path: &Path) -> Result<ContributionMap> {
    load_contributions(path).with_context(|| format!("Failed to load contributions from {}", path.display()))
}

fn read_document(settings: &Settings, path: Option<PathBuf>) -> Result<DistributionDocument> {
    let path = path.unwrap_or_else(|| settings.document_path());
    DistributionDocument::load(&path)
        .with_context(|| format!("Failed to load distribution document {}", path.display()))
}

fn emit(out: Option<&Path>, json: &str) -> Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
