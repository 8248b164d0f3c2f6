use anyhow::{bail, Context, Result};
use clap::Parser;
use glob::glob;
use rayon::prelude::*;
use scenmetrics::lookup::Lookups;
use scenmetrics::metrics::pipeline::Pipeline;
use scenmetrics::run::{RunContext, RunMetadata};
use scenmetrics::table::write::{output_path, skip_existing, write_metrics};
use scenmetrics::ModelConfig;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Compute scenario metrics for travel model runs.
#[derive(Parser, Debug)]
struct Args {
    /// Directory holding one subdirectory per model run.
    #[arg(long)]
    scenarios_dir: PathBuf,

    /// Directory with the shared lookup tables and the run listing.
    #[arg(long)]
    lookups_dir: PathBuf,

    /// Where the per-run metrics files are written.
    #[arg(long)]
    output_dir: PathBuf,

    /// Process only these run ids (default: every current run on disk).
    #[arg(long = "run")]
    runs: Vec<String>,

    /// Baseline run id (default: the latest current Pathway 4 run).
    #[arg(long)]
    base_run: Option<String>,

    /// Leave runs whose output file already exists untouched.
    #[arg(long)]
    skip_if_exists: bool,

    /// YAML file overriding the model constants.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let args = Args::parse();
    let cfg = ModelConfig::load(args.config.as_deref())?;

    // ─── 2) shared lookups; a failure here aborts the batch ──────────
    let lookups = Lookups::load(&args.lookups_dir)?;
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating `{}`", args.output_dir.display()))?;

    // ─── 3) pick runs: current in the listing, present on disk ───────
    let pattern = args.scenarios_dir.join("*");
    let on_disk: HashSet<String> = glob(&pattern.to_string_lossy())
        .context("globbing scenarios directory")?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_dir())
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();

    let mut run_ids: Vec<String> = lookups
        .inventory
        .current_for_year(cfg.forecast_year)
        .iter()
        .map(|r| r.directory.clone())
        .collect();
    if !args.runs.is_empty() {
        run_ids.retain(|id| args.runs.contains(id));
    }
    run_ids.retain(|id| {
        let present = on_disk.contains(id);
        if !present {
            warn!(run_id = id.as_str(), "listed run has no scenario directory, skipping");
        }
        present
    });
    if run_ids.is_empty() {
        bail!("no runs to process");
    }
    info!(runs = run_ids.len(), "selected runs for {}", cfg.forecast_year);

    // ─── 4) baseline aggregates, computed once and shared ────────────
    let base_id = match &args.base_run {
        Some(id) => id.clone(),
        None => lookups
            .inventory
            .baseline_for_year(cfg.forecast_year)
            .map(|r| r.directory.clone())
            .context("no current Pathway 4 run in the listing; pass --base-run")?,
    };
    info!(base_run = base_id.as_str(), "baseline run");

    let pipeline = Pipeline::new(&cfg, &lookups);
    let base_meta = RunMetadata::parse(&base_id, lookups.inventory.category_of(&base_id));
    if !base_meta.is_baseline_pathway() {
        warn!(
            base_run = base_id.as_str(),
            "baseline run is not a Pathway 4 (no new pricing) run"
        );
    }
    let mut base_ctx = RunContext::new(&args.scenarios_dir, base_meta);
    let baseline = pipeline.baseline_aggregates(&mut base_ctx);
    drop(base_ctx);

    // ─── 5) process runs in parallel ─────────────────────────────────
    let failures: usize = run_ids
        .par_iter()
        .map(|run_id| {
            let out = output_path(&args.output_dir, run_id);
            if skip_existing(&out, args.skip_if_exists) {
                info!(run_id = run_id.as_str(), "output exists, skipping");
                return 0;
            }

            let meta = RunMetadata::parse(run_id, lookups.inventory.category_of(run_id));
            let mut ctx = RunContext::new(&args.scenarios_dir, meta);
            let rows = pipeline.run(&mut ctx, &baseline);
            if rows.is_empty() {
                error!(run_id = run_id.as_str(), "no metrics produced");
                return 1;
            }
            match write_metrics(&out, rows) {
                Ok(()) => 0,
                Err(err) => {
                    error!(run_id = run_id.as_str(), "write failed: {err:#}");
                    1
                }
            }
        })
        .sum();

    if failures > 0 {
        bail!("{failures} run(s) produced no output");
    }
    info!("batch complete");
    Ok(())
}
