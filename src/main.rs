//! Command-line entry point.
//!
//! ```text
//! market-ecm --config market_ecm.toml --panel panel.json --weights weights.json \
//!     --output results.json [--variant cross-region-price]
//! ```
//!
//! Log level comes from `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use market_ecm::{load_panel, EcmPipeline, ExogenousSpec, PipelineConfig, RunDocument, SpatialWeights};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    /// Regional conflict intensity as the second endogenous variable
    ConflictIntensity,
    /// North and south regime prices, conflict as exogenous regressors
    CrossRegionPrice,
    /// No exogenous regressors
    None,
}

impl From<Variant> for ExogenousSpec {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::ConflictIntensity => ExogenousSpec::ConflictIntensity,
            Variant::CrossRegionPrice => ExogenousSpec::CrossRegionPrice,
            Variant::None => ExogenousSpec::None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "market-ecm", version, about = "Error-correction analysis of market price panels")]
struct Args {
    /// Pipeline configuration (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Market panel rows (JSON array)
    #[arg(short, long)]
    panel: PathBuf,

    /// Region contiguity map (JSON object of neighbor lists)
    #[arg(short, long)]
    weights: PathBuf,

    /// Destination of the run document
    #[arg(short, long)]
    output: PathBuf,

    /// Overrides `analysis.exogenous_spec` from the configuration
    #[arg(long, value_enum)]
    variant: Option<Variant>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::from_file(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    if let Some(variant) = args.variant {
        config = config.with_exogenous_spec(variant.into());
        config.validate().context("validating --variant against the configuration")?;
    }

    let weights = SpatialWeights::load(&args.weights)
        .with_context(|| format!("loading spatial weights {}", args.weights.display()))?;
    let panel = load_panel(&args.panel)
        .with_context(|| format!("loading panel {}", args.panel.display()))?;

    let pipeline = EcmPipeline::new(config, Arc::new(weights));
    let results = pipeline.run(panel);

    RunDocument::new(pipeline.config(), results)
        .write_to(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    Ok(())
}
