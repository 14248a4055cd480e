use anyhow::Context;
use clap::Parser;
use generator::profile::GeneratorConfig;
use sc2core::prelude::CleanConfig;
use sc2core::processing::AbortSignal;
use std::fs;
use std::path::PathBuf;
use std::thread;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Synthesise a raw detector cube and clean it offline")]
struct Args {
    /// Load a workflow config (generator + cleaning) from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 4000)]
    n_time: usize,
    #[arg(long, default_value_t = 8)]
    n_rows: usize,
    #[arg(long, default_value_t = 8)]
    n_cols: usize,
    #[arg(long, default_value_t = 200.0)]
    sample_rate: f64,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    #[arg(long, default_value_t = 1.0)]
    bad_frac: f64,
    #[arg(long, default_value_t = 1)]
    order: usize,
    #[arg(long, default_value_t = 0.0)]
    dc_thresh: f64,
    #[arg(long, default_value_t = 0)]
    dc_box: usize,
    /// Mark a detector bad instead of repairing more than this many steps (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    dc_max_steps: usize,
    #[arg(long)]
    spike_thresh: Option<f64>,
    #[arg(long, default_value_t = 0)]
    spike_iter: usize,
    #[arg(long, default_value_t = 5)]
    max_iter: usize,
    #[arg(long, default_value_t = 0.0)]
    edge_low: f64,
    #[arg(long, default_value_t = 0.0)]
    edge_high: f64,
    /// Notch band lower edges in Hz, paired with --notch-high
    #[arg(long, value_delimiter = ',')]
    notch_low: Vec<f64>,
    #[arg(long, value_delimiter = ',')]
    notch_high: Vec<f64>,
    /// Filter flagged samples as they are instead of interpolating across them
    #[arg(long)]
    no_fill_gaps: bool,
    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    fn workflow(&self) -> WorkflowConfig {
        let generator = GeneratorConfig {
            n_time: self.n_time,
            n_rows: self.n_rows,
            n_cols: self.n_cols,
            sample_rate: self.sample_rate,
            seed: self.seed,
            ..Default::default()
        };
        let cleaning = CleanConfig {
            bad_frac: self.bad_frac,
            order: self.order,
            dc_thresh: self.dc_thresh,
            dc_box: self.dc_box,
            dc_max_steps: self.dc_max_steps,
            spike_thresh: self.spike_thresh,
            spike_iter: self.spike_iter,
            max_iter: self.max_iter,
            edge_low: self.edge_low,
            edge_high: self.edge_high,
            notch_low: self.notch_low.clone(),
            notch_high: self.notch_high.clone(),
            sample_rate: self.sample_rate,
            fill_gaps: !self.no_fill_gaps,
        };
        WorkflowConfig::from_args(generator, cleaning)
    }
}

/// Raises `abort` on Ctrl+C from a background signal runtime.
fn install_interrupt_handler(abort: AbortSignal) -> anyhow::Result<()> {
    let runtime = TokioBuilder::new_current_thread()
        .enable_all()
        .build()
        .context("creating runtime for signal handling")?;
    thread::spawn(move || {
        runtime.block_on(async {
            if signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received, aborting after current detector");
                abort.raise();
            }
        });
    });
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = if let Some(path) = args.config.as_ref() {
        WorkflowConfig::load(path)?
    } else {
        args.workflow()
    };

    let abort = AbortSignal::new();
    install_interrupt_handler(abort.clone())?;

    let runner = Runner::new(workflow_config).with_abort_signal(abort);
    let result = runner.execute()?;
    let report = &result.report;

    println!(
        "Cleaned {} detectors -> bad {}, steps {}, spikes {} in {} passes{}, filtered {}, residual RMS {:.4}",
        result.cube.n_detectors(),
        result.excluded_detectors,
        report.steps_repaired,
        report.spikes_flagged,
        report.spike_iterations_used,
        if report.spike_converged { "" } else { " (not converged)" },
        report.detectors_filtered,
        result.residual_rms
    );

    if let Some(path) = args.report {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating report directory {}", parent.display()))?;
        }
        let json = report.to_json().context("serialising run report")?;
        fs::write(&path, json)
            .with_context(|| format!("writing run report {}", path.display()))?;
        log::info!("run report written to {}", path.display());
    }

    Ok(())
}
